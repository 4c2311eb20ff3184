//! Data URL decoding for caller-supplied assets and encoding for
//! produced artifacts.
//!
//! Assets arrive either as `data:<mediatype>;base64,<payload>` or as a
//! bare base64 payload. Both forms decode to the same bytes.

use base64::Engine;

use crate::error::CoreError;

/// Scheme prefix that marks a self-describing data URL.
const DATA_URL_PREFIX: &str = "data:";

/// Decode an inline asset into raw bytes.
///
/// The media type in a data URL header is not checked; only the
/// payload after the first comma matters.
pub fn decode_asset(input: &str) -> Result<Vec<u8>, CoreError> {
    let payload = if input.starts_with(DATA_URL_PREFIX) {
        let (_header, payload) = input.split_once(',').ok_or_else(|| {
            CoreError::InvalidAssetEncoding("Invalid data URL format: missing ','".into())
        })?;
        payload
    } else {
        input
    };

    // Line-wrapped base64 is common in hand-built payloads.
    let compact: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| CoreError::InvalidAssetEncoding(format!("invalid base64 payload: {e}")))
}

/// Encode bytes as a `data:<mime>;base64,<payload>` URL.
pub fn encode_data_url(mime: &str, bytes: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("{DATA_URL_PREFIX}{mime};base64,{encoded}")
}
