//! Transport encoding of payloads.
//!
//! Payloads travel as standard, padded base64 text inside the `bytes` fields
//! of `StoreRequest.encoded_payload` and `RetrieveResponse.payload`.

use crate::{Error, Result};
use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;

/// Decodes a base64 frame into raw payload bytes.
///
/// # Errors
///
/// Returns [`Error::Decode`] if `encoded` is not valid standard base64. The
/// reason includes at most the first 64 bytes of the offending input.
pub fn decode_payload(encoded: &[u8]) -> Result<Bytes> {
    STANDARD
        .decode(encoded)
        .map(Bytes::from)
        .map_err(|e| Error::Decode {
            reason: format!("{e}, input: {}", preview(encoded)),
        })
}

/// Encodes raw payload bytes for transport.
pub fn encode_payload(payload: &[u8]) -> Bytes {
    Bytes::from(STANDARD.encode(payload))
}

fn preview(encoded: &[u8]) -> String {
    const MAX_PREVIEW: usize = 64;
    let head = &encoded[..encoded.len().min(MAX_PREVIEW)];
    let mut out = String::from_utf8_lossy(head).into_owned();
    if encoded.len() > MAX_PREVIEW {
        out.push_str("...");
    }
    out
}
