//! Host protocol framing: hex length prefixes and status words.
//!
//! A service request is sent as `[4 ASCII hex digits: length][service bytes]`
//! with no terminator; the length counts the service bytes only. The server
//! answers with the 4-byte status word [`OKAY`] or [`FAIL`], the latter
//! followed by a hex-length-prefixed UTF-8 error message.

/// Status word for a successful request.
pub const OKAY: [u8; 4] = *b"OKAY";

/// Status word for a rejected request, followed by a length-prefixed message.
pub const FAIL: [u8; 4] = *b"FAIL";

/// Largest service-request length representable by the 4-digit prefix.
pub const MAX_REQUEST_LEN: usize = 0xFFFF;

/// Errors produced while encoding or decoding host-protocol framing.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WireError {
    /// A service request exceeds the 4-hex-digit length prefix.
    #[error("service request of {0} bytes exceeds the 65535-byte frame limit")]
    RequestTooLong(usize),

    /// A length prefix contained a non-hex byte.
    #[error("invalid hex length prefix {0:?}")]
    BadHexLength([u8; 4]),
}

/// Encodes `len` as the 4-digit lowercase hex ASCII prefix.
pub fn encode_hex_length(len: usize) -> Result<[u8; 4], WireError> {
    if len > MAX_REQUEST_LEN {
        return Err(WireError::RequestTooLong(len));
    }
    let digits = format!("{len:04x}");
    let bytes = digits.as_bytes();
    Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Decodes a 4-digit hex ASCII prefix (either letter case) into a length.
pub fn decode_hex_length(prefix: &[u8; 4]) -> Result<usize, WireError> {
    let mut len = 0usize;
    for &b in prefix {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => return Err(WireError::BadHexLength(*prefix)),
        };
        len = (len << 4) | usize::from(digit);
    }
    Ok(len)
}

/// Frames a service request: hex length prefix followed by the raw bytes.
pub fn encode_request(service: &str) -> Result<Vec<u8>, WireError> {
    let prefix = encode_hex_length(service.len())?;
    let mut frame = Vec::with_capacity(4 + service.len());
    frame.extend_from_slice(&prefix);
    frame.extend_from_slice(service.as_bytes());
    Ok(frame)
}
