//! Encoding/decoding of the payload exchanged between devices as a QR
//! code image. The wire form is a plain JSON string — the image codec
//! itself lives outside this crate's scope (rendering and camera
//! capture are host/UI concerns).

use crate::models::{QrPayload, QR_PAYLOAD_VERSION};
use wallet_iframe_core::error::{ErrorKind, WalletError, WalletResult};

pub fn encode(payload: &QrPayload) -> String {
    serde_json::to_string(payload).expect("QrPayload always serializes")
}

/// Parses and validates a scanned QR string, rejecting a version mismatch
/// so a future wire format change fails loudly instead of silently
/// misinterpreting fields.
pub fn decode(raw: &str) -> WalletResult<QrPayload> {
    let payload: QrPayload = serde_json::from_str(raw)
        .map_err(|e| WalletError::new(ErrorKind::Unknown, format!("malformed QR payload: {e}")))?;
    if payload.version != QR_PAYLOAD_VERSION {
        return Err(WalletError::new(
            ErrorKind::Unknown,
            format!("unsupported QR payload version '{}'", payload.version),
        ));
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_payload_without_account_id() {
        let payload = QrPayload {
            device2_public_key: "ed25519:abc".into(),
            account_id: None,
            timestamp: 1_700_000_000,
            version: QR_PAYLOAD_VERSION.into(),
        };
        let encoded = encode(&payload);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn rejects_an_unsupported_version() {
        let raw = r#"{"device2PublicKey":"ed25519:abc","timestamp":1,"version":"99.0"}"#;
        assert!(decode(raw).is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(decode("not json").is_err());
    }
}
