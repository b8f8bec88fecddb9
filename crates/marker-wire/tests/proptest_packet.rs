//! Property-based tests for the packet codec.
//!
//! Run with: cargo test -p marker-wire -- proptest

use marker_wire::{MarkerPacket, Packet, WireError, encoded_len};
use proptest::prelude::*;

fn arb_marker() -> impl Strategy<Value = MarkerPacket> {
    (
        any::<i64>(),
        prop::array::uniform3(-1.0e6f32..1.0e6),
        prop::array::uniform3(-10.0f32..10.0),
    )
        .prop_map(|(id, position, orientation)| MarkerPacket {
            id,
            position,
            orientation,
        })
}

fn arb_packet(max_markers: usize) -> impl Strategy<Value = Packet> {
    (
        prop::collection::vec(arb_marker(), 0..=max_markers),
        0.0f64..10.0,
        -1.0e9f64..1.0e9,
    )
        .prop_map(|(arucos, time_elapsed, timestamp)| Packet::new(arucos, time_elapsed, timestamp))
}

proptest! {
    #[test]
    fn decode_inverts_encode(packet in arb_packet(64)) {
        let bytes = packet.encode();
        prop_assert_eq!(Packet::decode(&bytes), Ok(packet));
    }

    #[test]
    fn encoded_size_is_count_plus_markers_plus_trailer(packet in arb_packet(64)) {
        let count = packet.arucos.len();
        let bytes = packet.encode();
        prop_assert_eq!(bytes.len(), 24 + 32 * count);
        prop_assert_eq!(Some(bytes.len()), encoded_len(count));
        prop_assert_eq!(packet.encoded_len(), bytes.len());
    }

    /// Cutting or padding a valid packet is always a length mismatch.
    #[test]
    fn resized_packets_are_rejected(packet in arb_packet(16), delta in -16isize..64) {
        prop_assume!(delta != 0);
        let mut bytes = packet.encode();
        let expected = bytes.len();
        let len = (expected as isize + delta) as usize;
        bytes.resize(len, 0xAB);
        let is_length_mismatch = matches!(
            Packet::decode(&bytes),
            Err(WireError::LengthMismatch { expected: e, actual, .. })
                if e == expected && actual == len
        );
        prop_assert!(is_length_mismatch);
    }

    /// Arbitrary bytes either decode to a packet of exactly that size or fail cleanly.
    #[test]
    fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        if let Ok(packet) = Packet::decode(&bytes) {
            prop_assert_eq!(Some(bytes.len()), encoded_len(packet.arucos.len()));
        }
    }
}
