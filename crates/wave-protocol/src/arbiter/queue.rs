use crate::types::{FloorRequest, PeerIdentity, RequestId};

/// Queue depth limit for non-emergency requests.
pub const MAX_QUEUE_DEPTH: usize = 20;

/// A request waiting at the arbiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRequest {
    pub request: FloorRequest,
    /// Local monotonic ms at receipt.
    pub received_at: u64,
}

/// The queue is at its depth limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

/// Arbiter-side pending requests, kept sorted by [`FloorRequest`] order so
/// the head is always the next to be granted.
#[derive(Debug, Clone)]
pub struct FloorQueue {
    entries: Vec<QueuedRequest>,
    max_depth: usize,
}

impl FloorQueue {
    pub fn new(max_depth: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_depth,
        }
    }

    /// Insert in order; returns the 1-based position. `force` (emergency
    /// traffic) lets the queue grow past the depth limit up to
    /// [`hard_limit`](Self::hard_limit).
    pub fn push(&mut self, request: FloorRequest, now: u64, force: bool) -> Result<usize, QueueFull> {
        let limit = if force { self.hard_limit() } else { self.max_depth };
        if self.entries.len() >= limit {
            return Err(QueueFull);
        }
        let idx = self.entries.partition_point(|e| e.request < request);
        self.entries.insert(
            idx,
            QueuedRequest {
                request,
                received_at: now,
            },
        );
        Ok(idx + 1)
    }

    /// Ceiling for forced inserts: twice the depth limit.
    pub fn hard_limit(&self) -> usize {
        self.max_depth.saturating_mul(2).max(1)
    }

    /// Take the head.
    pub fn pop(&mut self) -> Option<QueuedRequest> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    /// Remove by id. Only the original requester may cancel.
    pub fn remove(&mut self, request_id: &RequestId, requester: &PeerIdentity) -> Option<QueuedRequest> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.request.request_id == *request_id && e.request.requester == *requester)?;
        Some(self.entries.remove(idx))
    }

    pub fn contains(&self, request_id: &RequestId) -> bool {
        self.entries.iter().any(|e| e.request.request_id == *request_id)
    }

    /// `(request, 1-based position)` for every entry, head first.
    pub fn positions(&self) -> impl Iterator<Item = (&FloorRequest, u32)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (&e.request, (i + 1) as u32))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for FloorQueue {
    fn default() -> Self {
        Self::new(MAX_QUEUE_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;

    fn id(b: u8) -> PeerIdentity {
        PeerIdentity::from_bytes([b; 32])
    }

    #[test]
    fn ordered_by_priority_then_clock() {
        let mut q = FloorQueue::default();
        q.push(FloorRequest::new(id(1), Priority::Normal, 5, 1), 0, false).unwrap();
        q.push(FloorRequest::new(id(2), Priority::Normal, 3, 1), 1, false).unwrap();
        let pos = q.push(FloorRequest::new(id(3), Priority::High, 9, 1), 2, false).unwrap();
        assert_eq!(pos, 1);

        let order: Vec<_> = std::iter::from_fn(|| q.pop()).map(|e| e.request.requester).collect();
        assert_eq!(order, vec![id(3), id(2), id(1)]);
    }

    #[test]
    fn depth_limit_unless_forced() {
        let mut q = FloorQueue::new(2);
        q.push(FloorRequest::new(id(1), Priority::Low, 1, 1), 0, false).unwrap();
        q.push(FloorRequest::new(id(2), Priority::Low, 2, 1), 0, false).unwrap();
        assert_eq!(
            q.push(FloorRequest::new(id(3), Priority::Low, 3, 1), 0, false),
            Err(QueueFull)
        );
        assert_eq!(
            q.push(FloorRequest::new(id(4), Priority::Emergency, 4, 1), 0, true),
            Ok(1)
        );
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn forced_inserts_stop_at_hard_limit() {
        let mut q = FloorQueue::new(2);
        for n in 0..4u8 {
            q.push(FloorRequest::new(id(n), Priority::Emergency, n as u64, 1), 0, true)
                .unwrap();
        }
        assert_eq!(q.len(), q.hard_limit());
        assert_eq!(
            q.push(FloorRequest::new(id(9), Priority::Emergency, 9, 1), 0, true),
            Err(QueueFull)
        );
    }

    #[test]
    fn remove_requires_owner() {
        let mut q = FloorQueue::default();
        let req = FloorRequest::new(id(1), Priority::Normal, 1, 1);
        q.push(req.clone(), 0, false).unwrap();
        assert!(q.remove(&req.request_id, &id(2)).is_none());
        assert!(q.contains(&req.request_id));
        assert!(q.remove(&req.request_id, &id(1)).is_some());
        assert!(q.is_empty());
    }

    #[test]
    fn positions_are_one_based() {
        let mut q = FloorQueue::default();
        q.push(FloorRequest::new(id(1), Priority::Normal, 1, 1), 0, false).unwrap();
        q.push(FloorRequest::new(id(2), Priority::Normal, 2, 1), 0, false).unwrap();
        let positions: Vec<u32> = q.positions().map(|(_, p)| p).collect();
        assert_eq!(positions, vec![1, 2]);
    }
}
