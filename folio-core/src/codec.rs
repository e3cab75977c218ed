//! Payload codec trait.
//!
//! Cached payloads are typed. Each payload type decides how it is turned into
//! the bytes stored in its partition and how large it counts for size
//! accounting. The defaults use compact JSON; binary payloads override them.

use crate::error::CodecError;
use crate::size::{estimate_blob_size, estimate_size, estimate_str_size};
use serde::{de::DeserializeOwned, Serialize};

/// Marker trait for types that can be cached.
///
/// # Implementation Requirements
///
/// - `decode(encode(v))` must yield a value equal to `v`
/// - `estimated_size` must be deterministic for a given value
/// - Implementations must be `Clone` because the memory tier hands out copies
/// - Implementations must be `Send + Sync + 'static` for async compatibility
pub trait Cacheable: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Encode the value into the bytes stored in the persistent tier.
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode bytes read from the persistent tier.
    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Estimated footprint used for size accounting.
    fn estimated_size(&self) -> u64 {
        estimate_size(self)
    }
}

impl Cacheable for serde_json::Value {}

impl Cacheable for String {
    fn estimated_size(&self) -> u64 {
        estimate_str_size(self)
    }
}

/// Binary blobs are stored verbatim.
impl Cacheable for Vec<u8> {
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(self.clone())
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(bytes.to_vec())
    }

    fn estimated_size(&self) -> u64 {
        estimate_blob_size(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Chapter {
        number: u32,
        title: String,
    }

    impl Cacheable for Chapter {}

    #[test]
    fn test_default_codec_is_json() {
        let chapter = Chapter {
            number: 3,
            title: "The Desert".to_string(),
        };
        let bytes = chapter.encode().expect("encode should succeed");
        assert_eq!(bytes, serde_json::to_vec(&chapter).expect("json should succeed"));
        assert_eq!(Chapter::decode(&bytes).expect("decode should succeed"), chapter);
        assert_eq!(chapter.estimated_size(), bytes.len() as u64);
    }

    #[test]
    fn test_blob_is_stored_verbatim() {
        let blob = vec![0xde, 0xad, 0xbe, 0xef];
        assert_eq!(blob.encode().expect("encode should succeed"), blob);
        assert_eq!(blob.estimated_size(), 4);
    }

    #[test]
    fn test_decode_mismatch_is_codec_error() {
        let bytes = serde_json::to_vec(&json!({"unexpected": true})).expect("json should succeed");
        let err = Chapter::decode(&bytes).expect_err("decode should fail");
        assert!(!err.reason.is_empty());
    }
}
