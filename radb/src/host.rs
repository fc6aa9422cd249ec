//! Services answered by the ADB server itself.

use tracing::debug;

use crate::channel::{self, ServerAddrs};
use crate::device::{DeviceSelector, DeviceServices};
use crate::runner::ServiceRunner;
use crate::{Error, Result, TimeoutTracker};

/// Entry point for host-scoped requests.
///
/// Each operation opens a fresh channel to the first reachable candidate
/// address and runs one exchange on it.
#[derive(Debug, Clone, Default)]
pub struct HostServices {
    addrs: ServerAddrs,
}

impl HostServices {
    /// Builds host services over the given candidate addresses.
    pub fn new(addrs: ServerAddrs) -> Self {
        Self { addrs }
    }

    /// The candidate addresses every operation connects through.
    pub fn addrs(&self) -> &ServerAddrs {
        &self.addrs
    }

    /// Services scoped to one device, sharing this host's addresses.
    pub fn device(&self, selector: DeviceSelector) -> DeviceServices {
        DeviceServices::new(self.addrs.clone(), selector)
    }

    async fn open_runner(
        &self,
        tracker: &TimeoutTracker,
    ) -> Result<ServiceRunner<tokio::net::TcpStream>> {
        let stream = channel::connect(&self.addrs, tracker).await?;
        Ok(ServiceRunner::new(stream))
    }

    /// The server's internal protocol version (`host:version`).
    pub async fn version(&self, tracker: &TimeoutTracker) -> Result<u32> {
        self.open_runner(tracker).await?.host_version(tracker).await
    }

    /// The raw `host:devices` response text, one `serial\tstate` line per
    /// device. Table parsing is left to the caller.
    pub async fn devices(&self, tracker: &TimeoutTracker) -> Result<String> {
        let mut runner = self.open_runner(tracker).await?;
        runner.run("host:devices", tracker).await?;
        runner.read_length_prefixed(tracker).await
    }

    /// Asks the server to exit (`host:kill`).
    ///
    /// Some servers close the connection instead of answering `OKAY`; that
    /// counts as success.
    pub async fn kill(&self, tracker: &TimeoutTracker) -> Result<()> {
        let mut runner = self.open_runner(tracker).await?;
        runner.send_request("host:kill", tracker).await?;
        match runner.consume_status("host:kill", tracker).await {
            Ok(()) => Ok(()),
            Err(Error::Protocol { message, .. }) if message.contains("connection closed") => {
                debug!("server closed the connection on host:kill");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// The feature set negotiated with `device` (`<prefix>:features`),
    /// e.g. `shell_v2`, `cmd`, `stat_v2`. Drives the caller's choice of
    /// shell protocol; no probing heuristics live here.
    pub async fn features(
        &self,
        selector: &DeviceSelector,
        tracker: &TimeoutTracker,
    ) -> Result<Vec<String>> {
        let service = format!("{}:features", selector.host_prefix());
        let mut runner = self.open_runner(tracker).await?;
        runner.run(&service, tracker).await?;
        let text = runner.read_length_prefixed(tracker).await?;
        Ok(text
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect())
    }
}
