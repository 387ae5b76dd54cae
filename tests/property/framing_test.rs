// tests/property/framing_test.rs

//! Line framing does not depend on how the byte stream is chunked.

use bytes::BytesMut;
use proptest::prelude::*;
use scpi_bridge::core::protocol::LineCodec;
use tokio_util::codec::Decoder;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_chunking_does_not_change_lines(
        lines in proptest::collection::vec("[ -~]{0,40}", 1..10),
        crlf in any::<bool>(),
        chunk in 1usize..17,
    ) {
        let terminator = if crlf { "\r\n" } else { "\n" };
        let wire: String = lines.iter().map(|l| format!("{l}{terminator}")).collect();

        let mut codec = LineCodec::new(64);
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for piece in wire.as_bytes().chunks(chunk) {
            buf.extend_from_slice(piece);
            while let Some(line) = codec.decode(&mut buf).unwrap() {
                decoded.push(line);
            }
        }
        prop_assert!(buf.is_empty());
        prop_assert_eq!(decoded, lines);
    }

    #[test]
    fn test_overlong_lines_are_rejected(extra in 1usize..64, chunk in 1usize..32) {
        let mut codec = LineCodec::new(32);
        let mut buf = BytesMut::new();
        let wire = format!("{}\n", "X".repeat(32 + extra));
        let mut rejected = false;
        for piece in wire.as_bytes().chunks(chunk) {
            buf.extend_from_slice(piece);
            match codec.decode(&mut buf) {
                Ok(Some(line)) => prop_assert!(false, "accepted {} byte line", line.len()),
                Ok(None) => {}
                Err(_) => {
                    rejected = true;
                    break;
                }
            }
        }
        prop_assert!(rejected);
    }
}
