use proptest::prelude::*;
use wave_transport::frame::{self, Frame, Lane};
use wave_transport::{ChannelId, CryptoProvider, Identity, MeshCrypto};

fn channel(bytes: &[u8]) -> ChannelId {
    ChannelId::from_bytes(bytes.to_vec()).expect("channel id")
}

proptest! {
    /// Sealed audio frames open to the exact payload under the same key.
    #[test]
    fn audio_roundtrip(
        cid in prop::collection::vec(any::<u8>(), 1..64),
        payload in prop::collection::vec(any::<u8>(), 0..1200),
        seq in any::<u32>(),
        ts in any::<u64>(),
        seed in any::<[u8; 32]>(),
    ) {
        let crypto = MeshCrypto::with_network_secret("proptest");
        let id = Identity::from_seed(&seed);
        let channel = channel(&cid);
        let key = crypto.derive_channel_key(&channel);

        let raw = frame::encode_audio(&channel, &id.public(), seq, ts, &payload);
        let sealed = frame::seal(&crypto, &id, &key, &raw).expect("seal");

        match frame::open(&crypto, &key, Lane::Audio, &sealed).expect("open") {
            Frame::Audio(p) => {
                prop_assert_eq!(p.channel, channel);
                prop_assert_eq!(p.sender, id.public());
                prop_assert_eq!(p.sequence, seq);
                prop_assert_eq!(p.timestamp, ts);
                prop_assert_eq!(&p.payload[..], &payload[..]);
            }
            Frame::Control(_) => prop_assert!(false, "wrong lane"),
        }
    }

    /// A different channel key never opens a sealed frame.
    #[test]
    fn mismatched_key_never_opens(
        a in prop::collection::vec(any::<u8>(), 1..32),
        b in prop::collection::vec(any::<u8>(), 1..32),
        payload in prop::collection::vec(any::<u8>(), 1..512),
    ) {
        prop_assume!(a != b);
        let crypto = MeshCrypto::new();
        let id = Identity::from_seed(&[7; 32]);
        let ch_a = channel(&a);
        let key_a = crypto.derive_channel_key(&ch_a);
        let key_b = crypto.derive_channel_key(&channel(&b));

        let raw = frame::encode_control(&ch_a, &id.public(), &payload);
        let sealed = frame::seal(&crypto, &id, &key_a, &raw).expect("seal");
        prop_assert!(frame::open(&crypto, &key_b, Lane::Control, &sealed).is_err());
    }

    /// Flipping any byte of a sealed datagram makes it unopenable.
    #[test]
    fn any_bit_flip_rejected(
        payload in prop::collection::vec(any::<u8>(), 1..256),
        index in any::<prop::sample::Index>(),
    ) {
        let crypto = MeshCrypto::new();
        let id = Identity::from_seed(&[9; 32]);
        let ch = channel(b"flip");
        let key = crypto.derive_channel_key(&ch);

        let raw = frame::encode_control(&ch, &id.public(), &payload);
        let mut sealed = frame::seal(&crypto, &id, &key, &raw).expect("seal");
        let i = index.index(sealed.len());
        sealed[i] ^= 0x01;
        prop_assert!(frame::open(&crypto, &key, Lane::Control, &sealed).is_err());
    }

    /// Arbitrary bytes never panic the opener.
    #[test]
    fn garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..2048)) {
        let crypto = MeshCrypto::new();
        let key = crypto.derive_channel_key(&channel(b"noise"));
        let _ = frame::open(&crypto, &key, Lane::Audio, &bytes);
        let _ = frame::parse(Lane::Control, &bytes);
    }
}
