//! Shell-v2 packet framing.
//!
//! Each packet is `[1 byte kind][4 bytes payload length, little-endian]`
//! followed by exactly that many payload bytes. Byte order is fixed
//! little-endian regardless of host platform.

/// Size of a shell-v2 packet header.
pub const HEADER_LEN: usize = 5;

/// Shell-v2 packet kinds.
///
/// Unknown kind bytes decode to [`PacketKind::Invalid`] instead of failing,
/// so callers decide whether to skip or reject unrecognized frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PacketKind {
    /// Data for the command's stdin.
    Stdin,
    /// A chunk of stdout output.
    Stdout,
    /// A chunk of stderr output.
    Stderr,
    /// Single-byte payload carrying the command's exit code.
    ExitCode,
    /// The peer will send no further stdin data.
    CloseStdin,
    /// Terminal window dimensions changed.
    WindowSizeChange,
    /// A kind byte outside the known range.
    Invalid,
}

impl PacketKind {
    /// Decodes a kind byte. Total: unknown bytes map to [`Self::Invalid`].
    pub const fn from_byte(b: u8) -> Self {
        match b {
            0 => Self::Stdin,
            1 => Self::Stdout,
            2 => Self::Stderr,
            3 => Self::ExitCode,
            4 => Self::CloseStdin,
            5 => Self::WindowSizeChange,
            _ => Self::Invalid,
        }
    }

    /// The wire byte for this kind, or `None` for [`Self::Invalid`].
    pub const fn as_byte(self) -> Option<u8> {
        match self {
            Self::Stdin => Some(0),
            Self::Stdout => Some(1),
            Self::Stderr => Some(2),
            Self::ExitCode => Some(3),
            Self::CloseStdin => Some(4),
            Self::WindowSizeChange => Some(5),
            Self::Invalid => None,
        }
    }
}

/// Encodes a packet header. Panics in debug builds on [`PacketKind::Invalid`].
pub fn encode_header(kind: PacketKind, payload_len: u32) -> [u8; HEADER_LEN] {
    let code = kind.as_byte().unwrap_or(u8::MAX);
    debug_assert!(kind.as_byte().is_some(), "cannot encode an Invalid packet");
    let len = payload_len.to_le_bytes();
    [code, len[0], len[1], len[2], len[3]]
}

/// Decodes a packet header into its kind and payload length.
pub fn decode_header(header: &[u8; HEADER_LEN]) -> (PacketKind, u32) {
    let kind = PacketKind::from_byte(header[0]);
    let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
    (kind, len)
}
