// Envelope codec. One serialized envelope per binary frame.

use super::types::Envelope;
use anyhow::{bail, Context, Result};

/// Maximum encoded envelope size: 1 MB
/// Stream payloads carry audio chunks; anything larger is refused both ways.
pub const MAX_ENVELOPE_SIZE: usize = 1024 * 1024;

/// Serialize an Envelope to bytes (bincode)
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>> {
    let bytes = bincode::serialize(envelope).context("Failed to encode envelope")?;

    if bytes.len() > MAX_ENVELOPE_SIZE {
        bail!(
            "Encoded envelope too large: {} bytes (max {})",
            bytes.len(),
            MAX_ENVELOPE_SIZE
        );
    }

    Ok(bytes)
}

/// Deserialize bytes to an Envelope
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope> {
    if bytes.len() > MAX_ENVELOPE_SIZE {
        bail!(
            "Envelope too large: {} bytes (max {})",
            bytes.len(),
            MAX_ENVELOPE_SIZE
        );
    }

    let envelope: Envelope = bincode::deserialize(bytes).context("Malformed envelope")?;
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::types::{Hello, Payload, ResponseStatus};

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = Envelope::hello("desktop", Hello::new("secret", "PeroCore Desktop", "windows"))
            .with_trace_id("trace-1");

        let bytes = encode_envelope(&envelope).unwrap();
        let restored = decode_envelope(&bytes).unwrap();

        assert_eq!(envelope, restored);
    }

    #[test]
    fn test_response_roundtrip_keeps_status() {
        let envelope = Envelope::new(
            "backend",
            "desktop",
            Payload::Response {
                request_id: "req-1".into(),
                status: ResponseStatus::Partial,
                data: "chunk".into(),
                error_msg: String::new(),
            },
        );

        let restored = decode_envelope(&encode_envelope(&envelope).unwrap()).unwrap();
        match restored.payload {
            Payload::Response { status, .. } => assert_eq!(status, ResponseStatus::Partial),
            other => panic!("Wrong payload: {:?}", other),
        }
    }

    #[test]
    fn test_reject_garbage() {
        assert!(decode_envelope(&[0xff, 0x00, 0x13]).is_err());
        assert!(decode_envelope(&[]).is_err());
    }

    #[test]
    fn test_reject_oversized_decode() {
        let big_bytes = vec![0u8; MAX_ENVELOPE_SIZE + 1];
        assert!(decode_envelope(&big_bytes).is_err());
    }

    #[test]
    fn test_reject_oversized_encode() {
        let envelope = Envelope::data("a", "b", vec![0u8; MAX_ENVELOPE_SIZE]);
        assert!(encode_envelope(&envelope).is_err());
    }
}
