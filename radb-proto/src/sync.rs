//! SYNC sub-protocol framing.
//!
//! Every frame starts with an 8-byte header: a 4-ASCII-byte tag followed by a
//! little-endian `u32` argument. For most tags the argument is the body
//! length; for `DONE` on the send path it carries the file modification time
//! as epoch seconds instead — a documented quirk of the ADB daemon that must
//! be preserved bit for bit.

/// Size of a SYNC frame header.
pub const HEADER_LEN: usize = 8;

/// Largest `DATA` frame body the daemon accepts.
pub const DATA_MAX: usize = 64 * 1024;

/// Longest remote path accepted by the daemon.
pub const REMOTE_PATH_MAX: usize = 1024;

/// SYNC frame tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SyncTag {
    /// Start a file upload; body is `"<path>,<mode>"`.
    Send,
    /// Start a file download; body is the remote path.
    Recv,
    /// A chunk of file content.
    Data,
    /// End of transfer. On the send path the argument carries the mtime.
    Done,
    /// Daemon-side failure; body is a UTF-8 message.
    Fail,
    /// Daemon acknowledgment of a completed upload.
    Okay,
}

impl SyncTag {
    /// The 4 ASCII bytes for this tag.
    pub const fn bytes(self) -> [u8; 4] {
        match self {
            Self::Send => *b"SEND",
            Self::Recv => *b"RECV",
            Self::Data => *b"DATA",
            Self::Done => *b"DONE",
            Self::Fail => *b"FAIL",
            Self::Okay => *b"OKAY",
        }
    }

    /// Decodes a tag, or `None` if the bytes match no known tag.
    pub fn from_bytes(bytes: &[u8; 4]) -> Option<Self> {
        match bytes {
            b"SEND" => Some(Self::Send),
            b"RECV" => Some(Self::Recv),
            b"DATA" => Some(Self::Data),
            b"DONE" => Some(Self::Done),
            b"FAIL" => Some(Self::Fail),
            b"OKAY" => Some(Self::Okay),
            _ => None,
        }
    }
}

/// Encodes a frame header from a tag and its `u32` argument.
pub fn encode_header(tag: SyncTag, arg: u32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[..4].copy_from_slice(&tag.bytes());
    header[4..].copy_from_slice(&arg.to_le_bytes());
    header
}

/// Splits a frame header into its raw tag bytes and `u32` argument.
///
/// The tag is returned raw so callers can report unknown tags verbatim;
/// use [`SyncTag::from_bytes`] to interpret it.
pub fn decode_header(header: &[u8; HEADER_LEN]) -> ([u8; 4], u32) {
    let tag = [header[0], header[1], header[2], header[3]];
    let arg = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    (tag, arg)
}
