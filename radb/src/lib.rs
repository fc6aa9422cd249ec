//! Async client for the ADB (Android Debug Bridge) server.
//!
//! `radb` speaks the ADB host protocol to a locally running server: host
//! queries, transport switching, the legacy and v2 shell protocols, and the
//! SYNC file transfer sub-protocol, with explicit deadline propagation across
//! every chained network step.
//!
//! # Quick start — run a command on the only connected device
//!
//! ```no_run
//! use std::time::Duration;
//! use radb::{DeviceSelector, HostServices, ServerAddrs, TimeoutTracker};
//!
//! # async fn demo() -> radb::Result<()> {
//! let host = HostServices::new(ServerAddrs::local_default());
//! let device = host.device(DeviceSelector::any());
//!
//! let tracker = TimeoutTracker::new(Duration::from_secs(10).into());
//! let output = device.shell_v2_text("getprop ro.build.version.sdk", &tracker).await?;
//! println!("{}", output.stdout_text());
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod channel;
mod device;
mod error;
mod host;
pub mod idle;
pub mod runner;
pub mod shellv2;
pub mod sync;
mod timeout;

pub use channel::ServerAddrs;
pub use device::{
    DEFAULT_SHELL_BUFFER_SIZE, DeviceSelector, DeviceServices, ShellCollector, ShellOutput,
    run_shell_v2,
};
pub use error::{ConnectError, Error, Result};
pub use host::HostServices;
pub use runner::ServiceRunner;
pub use sync::{NullProgress, SyncConnection, SyncProgress};
pub use timeout::{TimeLimit, TimeoutTracker};
