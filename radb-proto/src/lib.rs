//! Wire formats spoken between an ADB client and the local ADB server.
//!
//! Three related grammars live here, all byte-exact and host-endianness
//! independent:
//!
//! - [`host`]: the text-ish host protocol — a 4-hex-digit ASCII length prefix
//!   followed by an ASCII service string, answered by `OKAY` or `FAIL`.
//! - [`shell`]: the shell-v2 packet protocol — a 5-byte header (kind byte +
//!   little-endian `u32` payload length) multiplexing stdin/stdout/stderr,
//!   exit codes and window resizes over one stream.
//! - [`sync`]: the file transfer sub-protocol — 8-byte frames tagged with
//!   4 ASCII bytes (`SEND`, `RECV`, `DATA`, `DONE`, `FAIL`, `OKAY`) and a
//!   little-endian `u32` argument.
//!
//! This crate only encodes and decodes; all I/O, timeouts and session state
//! live in the `radb` crate.

pub mod host;
pub mod shell;
pub mod sync;

pub use host::{FAIL, OKAY, WireError, decode_hex_length, encode_hex_length, encode_request};
pub use shell::PacketKind;
pub use sync::SyncTag;
