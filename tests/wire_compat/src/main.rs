fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use mqxfer_protocol::{ControlMessage, Frame, decode_frame, encode_chunk, encode_control};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture, re-serializes it, and compares the JSON values
    /// (order-independent comparison).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  Rust:    {reserialized}"
        );
        parsed
    }

    /// Decodes the raw fixture bytes the way a receiver sees them on the wire.
    fn decode_fixture(name: &str) -> ControlMessage {
        let raw = fs::read(fixtures_dir().join(name)).unwrap();
        match decode_frame(&raw) {
            Ok(Frame::Control(msg)) => msg,
            other => panic!("{name} did not decode as a control frame: {other:?}"),
        }
    }

    #[test]
    fn fixture_start() {
        match roundtrip_test::<ControlMessage>("start.json") {
            ControlMessage::Start(start) => {
                assert_eq!(start.file_name, "firmware-2.4.1.bin");
                assert_eq!(start.total_size, 1_048_576);
            }
            other => panic!("expected start, got {other:?}"),
        }
        assert!(matches!(decode_fixture("start.json"), ControlMessage::Start(_)));
    }

    #[test]
    fn fixture_start_unknown_size() {
        match roundtrip_test::<ControlMessage>("start_unknown_size.json") {
            ControlMessage::Start(start) => assert_eq!(start.total_size, 0),
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[test]
    fn fixture_end() {
        match roundtrip_test::<ControlMessage>("end.json") {
            ControlMessage::End(end) => {
                assert_eq!(end.checksum.len(), 64);
                assert_eq!(end.total_size, None);
            }
            other => panic!("expected end, got {other:?}"),
        }
        assert!(matches!(decode_fixture("end.json"), ControlMessage::End(_)));
    }

    #[test]
    fn fixture_end_with_size() {
        match roundtrip_test::<ControlMessage>("end_with_size.json") {
            ControlMessage::End(end) => assert_eq!(end.total_size, Some(5)),
            other => panic!("expected end, got {other:?}"),
        }
    }

    #[test]
    fn fixture_ack() {
        match roundtrip_test::<ControlMessage>("ack.json") {
            ControlMessage::Ack(ack) => assert_eq!(ack.sequence, 42),
            other => panic!("expected ack, got {other:?}"),
        }
        assert!(matches!(decode_fixture("ack.json"), ControlMessage::Ack(_)));
    }

    #[test]
    fn encoded_control_matches_fixture() {
        for name in ["start.json", "end.json", "end_with_size.json", "ack.json"] {
            let fixture = load_fixture(name);
            let msg: ControlMessage = serde_json::from_value(fixture.clone()).unwrap();
            let encoded = encode_control(&msg).unwrap();
            let value: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
            assert_eq!(value, fixture, "encoding drift for {name}");
        }
    }

    #[test]
    fn chunk_carrying_control_json_stays_a_chunk() {
        let raw = fs::read(fixtures_dir().join("end.json")).unwrap();
        let frame = encode_chunk(7, &raw);
        match decode_frame(&frame).unwrap() {
            Frame::Chunk { sequence, payload } => {
                assert_eq!(sequence, 7);
                assert_eq!(payload, &raw[..]);
            }
            other => panic!("expected chunk, got {other:?}"),
        }
    }
}
