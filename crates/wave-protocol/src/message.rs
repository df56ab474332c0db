//! Control lane messages.
//!
//! Payload layout: `[1B kind][MessagePack body]`. Bodiless kinds carry the
//! kind byte only.
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{FloorRequest, HolderSummary, PeerIdentity, Priority, RequestId};

/// Reason sent with a queue-depth denial.
pub const QUEUE_FULL_REASON: &str = "Queue full";

/// Control message kind ordinal (first payload byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum MessageKind {
    FloorRequest = 0,
    FloorRelease = 1,
    FloorCancel = 2,
    FloorGranted = 3,
    FloorDenied = 4,
    FloorQueued = 5,
    FloorRevoked = 6,
    FloorTaken = 7,
    FloorIdle = 8,
    ArbiterHeartbeat = 9,
    ArbiterAnnounce = 10,
    ArbiterResign = 11,
    Election = 12,
}

/// Arbiter grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloorGrant {
    pub request_id: RequestId,
    pub holder: PeerIdentity,
    pub priority: Priority,
    pub duration_ms: u64,
    pub emergency: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloorDenial {
    pub request_id: RequestId,
    pub requester: PeerIdentity,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePosition {
    pub request_id: RequestId,
    pub requester: PeerIdentity,
    /// 1-based.
    pub position: u32,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    pub request_id: RequestId,
    pub holder: PeerIdentity,
    pub reason: String,
}

/// Peer-mode winner announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloorTaken {
    pub request: FloorRequest,
    pub remaining_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbiterHeartbeat {
    pub priority: Priority,
    pub holder: Option<HolderSummary>,
    pub queue_size: u32,
    /// Designated successor.
    pub backup: Option<PeerIdentity>,
}

/// A decoded control lane message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    FloorRequest(FloorRequest),
    FloorRelease(RequestId),
    FloorCancel(RequestId),
    FloorGranted(FloorGrant),
    FloorDenied(FloorDenial),
    FloorQueued(QueuePosition),
    FloorRevoked(Revocation),
    FloorTaken(FloorTaken),
    FloorIdle,
    ArbiterHeartbeat(ArbiterHeartbeat),
    ArbiterAnnounce(Priority),
    ArbiterResign,
    Election(Priority),
}

impl ControlMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            ControlMessage::FloorRequest(_) => MessageKind::FloorRequest,
            ControlMessage::FloorRelease(_) => MessageKind::FloorRelease,
            ControlMessage::FloorCancel(_) => MessageKind::FloorCancel,
            ControlMessage::FloorGranted(_) => MessageKind::FloorGranted,
            ControlMessage::FloorDenied(_) => MessageKind::FloorDenied,
            ControlMessage::FloorQueued(_) => MessageKind::FloorQueued,
            ControlMessage::FloorRevoked(_) => MessageKind::FloorRevoked,
            ControlMessage::FloorTaken(_) => MessageKind::FloorTaken,
            ControlMessage::FloorIdle => MessageKind::FloorIdle,
            ControlMessage::ArbiterHeartbeat(_) => MessageKind::ArbiterHeartbeat,
            ControlMessage::ArbiterAnnounce(_) => MessageKind::ArbiterAnnounce,
            ControlMessage::ArbiterResign => MessageKind::ArbiterResign,
            ControlMessage::Election(_) => MessageKind::Election,
        }
    }

    /// Serialize to `[kind][msgpack body]`.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let body = match self {
            ControlMessage::FloorRequest(r) => rmp_serde::to_vec(r)?,
            ControlMessage::FloorRelease(id) | ControlMessage::FloorCancel(id) => {
                rmp_serde::to_vec(id)?
            }
            ControlMessage::FloorGranted(g) => rmp_serde::to_vec(g)?,
            ControlMessage::FloorDenied(d) => rmp_serde::to_vec(d)?,
            ControlMessage::FloorQueued(q) => rmp_serde::to_vec(q)?,
            ControlMessage::FloorRevoked(r) => rmp_serde::to_vec(r)?,
            ControlMessage::FloorTaken(t) => rmp_serde::to_vec(t)?,
            ControlMessage::ArbiterHeartbeat(h) => rmp_serde::to_vec(h)?,
            ControlMessage::ArbiterAnnounce(p) | ControlMessage::Election(p) => {
                rmp_serde::to_vec(p)?
            }
            ControlMessage::FloorIdle | ControlMessage::ArbiterResign => Vec::new(),
        };
        let mut out = Vec::with_capacity(1 + body.len());
        out.push(u8::from(self.kind()));
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Parse `[kind][msgpack body]`.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (&kind, body) = bytes.split_first().ok_or(ProtocolError::EmptyMessage)?;
        let kind = MessageKind::try_from(kind).map_err(|_| ProtocolError::UnknownMessageKind(kind))?;
        Ok(match kind {
            MessageKind::FloorRequest => ControlMessage::FloorRequest(body_of(body)?),
            MessageKind::FloorRelease => ControlMessage::FloorRelease(body_of(body)?),
            MessageKind::FloorCancel => ControlMessage::FloorCancel(body_of(body)?),
            MessageKind::FloorGranted => ControlMessage::FloorGranted(body_of(body)?),
            MessageKind::FloorDenied => ControlMessage::FloorDenied(body_of(body)?),
            MessageKind::FloorQueued => ControlMessage::FloorQueued(body_of(body)?),
            MessageKind::FloorRevoked => ControlMessage::FloorRevoked(body_of(body)?),
            MessageKind::FloorTaken => ControlMessage::FloorTaken(body_of(body)?),
            MessageKind::FloorIdle => ControlMessage::FloorIdle,
            MessageKind::ArbiterHeartbeat => ControlMessage::ArbiterHeartbeat(body_of(body)?),
            MessageKind::ArbiterAnnounce => ControlMessage::ArbiterAnnounce(body_of(body)?),
            MessageKind::ArbiterResign => ControlMessage::ArbiterResign,
            MessageKind::Election => ControlMessage::Election(body_of(body)?),
        })
    }

    /// Identity fields that must equal the authenticated sender.
    ///
    /// Grants, denials and queue positions name their target, not their
    /// author, so only requests and peer-mode announcements are bound.
    pub fn check_sender(&self, sender: &PeerIdentity) -> Result<(), ProtocolError> {
        let claimed = match self {
            ControlMessage::FloorRequest(r) => r.requester,
            ControlMessage::FloorTaken(t) => t.request.requester,
            _ => return Ok(()),
        };
        if claimed == *sender {
            Ok(())
        } else {
            Err(ProtocolError::IdentityMismatch {
                claimed,
                sender: *sender,
            })
        }
    }
}

fn body_of<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProtocolError> {
    Ok(rmp_serde::from_slice(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> PeerIdentity {
        PeerIdentity::from_bytes([b; 32])
    }

    #[test]
    fn kind_byte_leads() {
        let msg = ControlMessage::Election(Priority::High);
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes[0], 12);
        assert_eq!(ControlMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn bodiless_kinds() {
        assert_eq!(ControlMessage::FloorIdle.encode().unwrap(), vec![8]);
        assert_eq!(ControlMessage::ArbiterResign.encode().unwrap(), vec![11]);
        assert_eq!(
            ControlMessage::decode(&[8]).unwrap(),
            ControlMessage::FloorIdle
        );
    }

    #[test]
    fn every_kind_decodes() {
        let req = FloorRequest::new(id(1), Priority::Normal, 3, 30_000);
        let messages = vec![
            ControlMessage::FloorRequest(req.clone()),
            ControlMessage::FloorRelease(req.request_id),
            ControlMessage::FloorCancel(req.request_id),
            ControlMessage::FloorGranted(FloorGrant {
                request_id: req.request_id,
                holder: id(1),
                priority: Priority::Normal,
                duration_ms: 30_000,
                emergency: false,
            }),
            ControlMessage::FloorDenied(FloorDenial {
                request_id: req.request_id,
                requester: id(1),
                reason: QUEUE_FULL_REASON.into(),
            }),
            ControlMessage::FloorQueued(QueuePosition {
                request_id: req.request_id,
                requester: id(1),
                position: 2,
                total: 5,
            }),
            ControlMessage::FloorRevoked(Revocation {
                request_id: req.request_id,
                holder: id(1),
                reason: "preempted".into(),
            }),
            ControlMessage::FloorTaken(FloorTaken {
                request: req.clone(),
                remaining_ms: 29_000,
            }),
            ControlMessage::FloorIdle,
            ControlMessage::ArbiterHeartbeat(ArbiterHeartbeat {
                priority: Priority::High,
                holder: None,
                queue_size: 0,
                backup: Some(id(2)),
            }),
            ControlMessage::ArbiterAnnounce(Priority::Normal),
            ControlMessage::ArbiterResign,
            ControlMessage::Election(Priority::Low),
        ];
        for (ordinal, msg) in messages.into_iter().enumerate() {
            let bytes = msg.encode().unwrap();
            assert_eq!(bytes[0] as usize, ordinal);
            assert_eq!(ControlMessage::decode(&bytes).unwrap(), msg);
        }
    }

    #[test]
    fn rejects_unknown_and_empty() {
        assert!(matches!(
            ControlMessage::decode(&[]),
            Err(ProtocolError::EmptyMessage)
        ));
        assert!(matches!(
            ControlMessage::decode(&[200]),
            Err(ProtocolError::UnknownMessageKind(200))
        ));
        assert!(matches!(
            ControlMessage::decode(&[0, 0xc1]),
            Err(ProtocolError::Deserialization(_))
        ));
    }

    #[test]
    fn request_bound_to_sender() {
        let req = FloorRequest::new(id(1), Priority::Normal, 1, 1000);
        let msg = ControlMessage::FloorRequest(req);
        assert!(msg.check_sender(&id(1)).is_ok());
        assert!(matches!(
            msg.check_sender(&id(2)),
            Err(ProtocolError::IdentityMismatch { .. })
        ));
        // Grants name their target, not the author
        assert!(ControlMessage::FloorIdle.check_sender(&id(9)).is_ok());
    }
}
