//! Lane frames and the sign-then-encrypt seal.
//!
//! ```text
//! audio:   [2B cid len][cid][32B sender][4B seq BE][8B ts BE][payload]
//! control: [2B cid len][cid][32B sender][payload]
//! sealed:  encrypt(frame ‖ 64B signature)
//! ```
use bytes::Bytes;

use crate::crypto::{ChannelKey, CryptoProvider, NONCE_LEN, SIGNATURE_LEN, TAG_LEN};
use crate::{ChannelId, Identity, PeerIdentity, TransportError};

/// Sender identity length on the wire.
pub const SENDER_LEN: usize = 32;

/// Audio lane fields: sequence (u32) + timestamp (u64).
pub const AUDIO_FIELDS_LEN: usize = 4 + 8;

/// Smallest parseable frame: length prefix, 1-byte channel id, sender.
pub const MIN_FRAME_LEN: usize = 2 + 1 + SENDER_LEN;

/// Smallest datagram that can possibly open.
pub const MIN_DATAGRAM_LEN: usize = NONCE_LEN + MIN_FRAME_LEN + SIGNATURE_LEN + TAG_LEN;

/// The two logical multicast streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    Audio,
    Control,
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lane::Audio => f.write_str("audio"),
            Lane::Control => f.write_str("control"),
        }
    }
}

/// An authenticated packet from the audio lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    pub channel: ChannelId,
    pub sender: PeerIdentity,
    pub sequence: u32,
    pub timestamp: u64,
    pub payload: Bytes,
}

/// An authenticated packet from the control lane.
///
/// The first payload byte is the control message kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    pub channel: ChannelId,
    pub sender: PeerIdentity,
    pub payload: Bytes,
}

/// A parsed frame of either lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Audio(AudioPacket),
    Control(ControlPacket),
}

impl Frame {
    pub fn sender(&self) -> PeerIdentity {
        match self {
            Frame::Audio(p) => p.sender,
            Frame::Control(p) => p.sender,
        }
    }

    pub fn channel(&self) -> &ChannelId {
        match self {
            Frame::Audio(p) => &p.channel,
            Frame::Control(p) => &p.channel,
        }
    }
}

fn encode_header(channel: &ChannelId, sender: &PeerIdentity, extra: usize) -> Vec<u8> {
    let cid = channel.as_bytes();
    let mut out = Vec::with_capacity(2 + cid.len() + SENDER_LEN + extra);
    // ChannelId guarantees len <= u16::MAX
    out.extend_from_slice(&(cid.len() as u16).to_be_bytes());
    out.extend_from_slice(cid);
    out.extend_from_slice(sender.as_bytes());
    out
}

/// Build an audio frame.
pub fn encode_audio(
    channel: &ChannelId,
    sender: &PeerIdentity,
    sequence: u32,
    timestamp: u64,
    payload: &[u8],
) -> Vec<u8> {
    let mut out = encode_header(channel, sender, AUDIO_FIELDS_LEN + payload.len());
    out.extend_from_slice(&sequence.to_be_bytes());
    out.extend_from_slice(&timestamp.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Build a control frame.
pub fn encode_control(channel: &ChannelId, sender: &PeerIdentity, payload: &[u8]) -> Vec<u8> {
    let mut out = encode_header(channel, sender, payload.len());
    out.extend_from_slice(payload);
    out
}

fn parse_header(bytes: &[u8]) -> Result<(ChannelId, PeerIdentity, &[u8]), TransportError> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(TransportError::MalformedFrame {
            reason: "frame shorter than header",
        });
    }
    let cid_len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    let rest = &bytes[2..];
    if cid_len == 0 || rest.len() < cid_len + SENDER_LEN {
        return Err(TransportError::MalformedFrame {
            reason: "truncated channel id or sender",
        });
    }
    let (cid, rest) = rest.split_at(cid_len);
    let (sender, rest) = rest.split_at(SENDER_LEN);
    let channel = ChannelId::from_bytes(cid.to_vec()).map_err(|_| TransportError::MalformedFrame {
        reason: "invalid channel id",
    })?;
    let sender = PeerIdentity::from_slice(sender).ok_or(TransportError::MalformedFrame {
        reason: "truncated sender",
    })?;
    Ok((channel, sender, rest))
}

/// Parse a plaintext frame of the given lane.
pub fn parse(lane: Lane, bytes: &[u8]) -> Result<Frame, TransportError> {
    let (channel, sender, rest) = parse_header(bytes)?;
    match lane {
        Lane::Control => Ok(Frame::Control(ControlPacket {
            channel,
            sender,
            payload: Bytes::copy_from_slice(rest),
        })),
        Lane::Audio => {
            if rest.len() < AUDIO_FIELDS_LEN {
                return Err(TransportError::MalformedFrame {
                    reason: "truncated audio fields",
                });
            }
            let (fields, payload) = rest.split_at(AUDIO_FIELDS_LEN);
            let mut seq = [0u8; 4];
            seq.copy_from_slice(&fields[..4]);
            let mut ts = [0u8; 8];
            ts.copy_from_slice(&fields[4..]);
            Ok(Frame::Audio(AudioPacket {
                channel,
                sender,
                sequence: u32::from_be_bytes(seq),
                timestamp: u64::from_be_bytes(ts),
                payload: Bytes::copy_from_slice(payload),
            }))
        }
    }
}

/// Sign `frame` with `identity`, append the signature, encrypt under `key`.
pub fn seal(
    crypto: &dyn CryptoProvider,
    identity: &Identity,
    key: &ChannelKey,
    frame: &[u8],
) -> Result<Vec<u8>, TransportError> {
    let signature = crypto.sign(identity, frame);
    let mut signed = Vec::with_capacity(frame.len() + SIGNATURE_LEN);
    signed.extend_from_slice(frame);
    signed.extend_from_slice(&signature);
    crypto.encrypt(key, &signed)
}

/// Decrypt, split the trailing signature, parse and verify the claimed sender.
///
/// Errors map to drop reasons: `Crypto` (wrong key or corruption),
/// `MalformedFrame`, `InvalidSignature`.
pub fn open(
    crypto: &dyn CryptoProvider,
    key: &ChannelKey,
    lane: Lane,
    datagram: &[u8],
) -> Result<Frame, TransportError> {
    if datagram.len() < MIN_DATAGRAM_LEN {
        return Err(TransportError::MalformedFrame {
            reason: "datagram below minimum size",
        });
    }
    let signed = crypto.decrypt(key, datagram)?;
    if signed.len() < MIN_FRAME_LEN + SIGNATURE_LEN {
        return Err(TransportError::MalformedFrame {
            reason: "signed frame too short",
        });
    }
    let (frame, signature) = signed.split_at(signed.len() - SIGNATURE_LEN);
    let parsed = parse(lane, frame)?;
    crypto.verify(&parsed.sender(), frame, signature)?;
    Ok(parsed)
}

/// Sealed size of a frame of `frame_len` bytes.
pub fn sealed_len(frame_len: usize) -> usize {
    NONCE_LEN + frame_len + SIGNATURE_LEN + TAG_LEN
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MeshCrypto;

    fn channel() -> ChannelId {
        ChannelId::from_bytes(b"ops-1".to_vec()).unwrap()
    }

    #[test]
    fn audio_layout() {
        let sender = PeerIdentity::from_bytes([0xAA; 32]);
        let frame = encode_audio(&channel(), &sender, 7, 0x0102, b"pcm");
        assert_eq!(&frame[..2], &[0, 5]);
        assert_eq!(&frame[2..7], b"ops-1");
        assert_eq!(&frame[7..39], &[0xAA; 32]);
        assert_eq!(&frame[39..43], &[0, 0, 0, 7]);
        assert_eq!(&frame[43..51], &[0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(&frame[51..], b"pcm");
    }

    #[test]
    fn control_parse() {
        let sender = PeerIdentity::from_bytes([1; 32]);
        let frame = encode_control(&channel(), &sender, &[8, 1, 2]);
        match parse(Lane::Control, &frame).unwrap() {
            Frame::Control(p) => {
                assert_eq!(p.channel, channel());
                assert_eq!(p.sender, sender);
                assert_eq!(&p.payload[..], &[8, 1, 2]);
            }
            other => panic!("expected control, got {other:?}"),
        }
    }

    #[test]
    fn truncated_frames_rejected() {
        let sender = PeerIdentity::from_bytes([1; 32]);
        let frame = encode_audio(&channel(), &sender, 1, 1, b"");
        assert!(parse(Lane::Audio, &frame[..frame.len() - 1]).is_err());
        assert!(parse(Lane::Control, &frame[..20]).is_err());

        let mut lying = frame.clone();
        lying[1] = 200;
        assert!(parse(Lane::Control, &lying).is_err());
    }

    #[test]
    fn zero_length_channel_rejected() {
        let mut frame = vec![0, 0];
        frame.extend_from_slice(&[1; 40]);
        assert!(parse(Lane::Control, &frame).is_err());
    }

    #[test]
    fn seal_open_roundtrip() {
        let crypto = MeshCrypto::new();
        let id = Identity::from_seed(&[5; 32]);
        let key = crypto.derive_channel_key(&channel());
        let frame = encode_control(&channel(), &id.public(), &[3, 9]);
        let sealed = seal(&crypto, &id, &key, &frame).unwrap();
        assert_eq!(sealed.len(), sealed_len(frame.len()));

        let opened = open(&crypto, &key, Lane::Control, &sealed).unwrap();
        assert_eq!(opened.sender(), id.public());
    }

    #[test]
    fn forged_sender_fails_verification() {
        let crypto = MeshCrypto::new();
        let real = Identity::from_seed(&[5; 32]);
        let victim = Identity::from_seed(&[6; 32]);
        let key = crypto.derive_channel_key(&channel());
        // Claims to be `victim` but signed by `real`
        let frame = encode_control(&channel(), &victim.public(), &[0]);
        let sealed = seal(&crypto, &real, &key, &frame).unwrap();
        assert!(matches!(
            open(&crypto, &key, Lane::Control, &sealed),
            Err(TransportError::InvalidSignature)
        ));
    }

    #[test]
    fn undersized_datagram_rejected() {
        let crypto = MeshCrypto::new();
        let key = crypto.derive_channel_key(&channel());
        assert!(matches!(
            open(&crypto, &key, Lane::Control, &[0u8; MIN_DATAGRAM_LEN - 1]),
            Err(TransportError::MalformedFrame { .. })
        ));
    }
}
