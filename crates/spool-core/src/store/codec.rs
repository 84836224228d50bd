//! JSON helpers for [`StoredTask`](super::StoredTask) encode and decode
//! implementations backed by serde.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Encodes a serde-serializable task as JSON bytes.
pub fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|e| StoreError::Encode(e.to_string()))
}

/// Decodes JSON bytes produced by [`encode_json`].
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Step {
        name: String,
        retries: u8,
    }

    #[test]
    fn json_round_trip() {
        let step = Step {
            name: "copy".into(),
            retries: 3,
        };
        let bytes = encode_json(&step).unwrap();
        let back: Step = decode_json(&bytes).unwrap();
        assert_eq!(back, step);
    }

    #[test]
    fn malformed_input_is_a_decode_error() {
        let err = decode_json::<Step>(b"{not json").unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }
}
