//! Device-scoped services: shells, exec, and file sync.
//!
//! Each operation opens a fresh channel to the server, switches it to the
//! selected device, then speaks the requested service over that channel. One
//! channel never carries more than one exchange at a time.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use radb_proto::shell::PacketKind;

use crate::channel::{self, ServerAddrs};
use crate::idle::{self, Heartbeat};
use crate::runner::ServiceRunner;
use crate::shellv2::{PacketReader, PacketWriter};
use crate::sync::SyncConnection;
use crate::{Error, Result, TimeoutTracker};

/// Buffer size for forwarding stdin to a remote shell.
pub const DEFAULT_SHELL_BUFFER_SIZE: usize = 8192;

/// Which device a transport switch should select.
///
/// [`DeviceSelector::service_string`] renders the `host:transport:*` family;
/// calling [`DeviceSelector::with_transport_id_reply`] switches to the
/// `host:tport:*` family, whose `OKAY` is followed by the numeric transport
/// id so callers can correlate the stream with a device connection epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSelector {
    target: Target,
    want_transport_id: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Serial(String),
    Usb,
    Local,
    Any,
    TransportId(u64),
}

impl DeviceSelector {
    /// Selects the device with this serial number.
    pub fn serial(serial: impl Into<String>) -> Self {
        Self::from_target(Target::Serial(serial.into()))
    }

    /// Selects the single USB-attached device.
    pub fn usb() -> Self {
        Self::from_target(Target::Usb)
    }

    /// Selects the single TCP-connected device or emulator.
    pub fn local() -> Self {
        Self::from_target(Target::Local)
    }

    /// Selects the single connected device, whatever its transport.
    pub fn any() -> Self {
        Self::from_target(Target::Any)
    }

    /// Selects a device by the transport id of an existing connection.
    pub fn transport_id(id: u64) -> Self {
        Self::from_target(Target::TransportId(id))
    }

    fn from_target(target: Target) -> Self {
        Self {
            target,
            want_transport_id: false,
        }
    }

    /// Requests the `host:tport:*` switch form, which reports the transport
    /// id after `OKAY`. No-op when selecting by transport id already.
    pub fn with_transport_id_reply(mut self) -> Self {
        self.want_transport_id = !matches!(self.target, Target::TransportId(_));
        self
    }

    /// The transport-switch service string for this selector.
    pub fn service_string(&self) -> String {
        if self.want_transport_id {
            match &self.target {
                Target::Serial(s) => format!("host:tport:serial:{s}"),
                Target::Usb => "host:tport:usb".into(),
                Target::Local => "host:tport:local".into(),
                Target::Any => "host:tport:any".into(),
                Target::TransportId(id) => format!("host:transport-id:{id}"),
            }
        } else {
            match &self.target {
                Target::Serial(s) => format!("host:transport:{s}"),
                Target::Usb => "host:transport-usb".into(),
                Target::Local => "host:transport-local".into(),
                Target::Any => "host:transport-any".into(),
                Target::TransportId(id) => format!("host:transport-id:{id}"),
            }
        }
    }

    /// Whether the switch reply carries the 8-byte transport id.
    pub fn reports_transport_id(&self) -> bool {
        self.want_transport_id
    }

    /// The prefix for host services scoped to this device without switching,
    /// e.g. `host-serial:<serial>` in `host-serial:<serial>:features`.
    pub fn host_prefix(&self) -> String {
        match &self.target {
            Target::Serial(s) => format!("host-serial:{s}"),
            Target::Usb => "host-usb".into(),
            Target::Local => "host-local".into(),
            Target::Any => "host".into(),
            Target::TransportId(id) => format!("host-transport-id:{id}"),
        }
    }
}

/// Receives the demultiplexed output of a shell-v2 command.
pub trait ShellCollector {
    /// The command started; no output has arrived yet.
    fn start(&mut self) {}

    /// A chunk of stdout.
    fn stdout(&mut self, chunk: &[u8]);

    /// A chunk of stderr.
    fn stderr(&mut self, chunk: &[u8]);

    /// The command exited; no further chunks follow.
    fn end(&mut self, exit_code: u32) {
        let _ = exit_code;
    }
}

/// Fully collected output of a shell-v2 command.
#[derive(Debug, Default, Clone)]
pub struct ShellOutput {
    /// Everything the command wrote to stdout.
    pub stdout: Vec<u8>,
    /// Everything the command wrote to stderr.
    pub stderr: Vec<u8>,
    /// The command's exit code.
    pub exit_code: u32,
}

impl ShellOutput {
    /// Stdout decoded as UTF-8, with replacement characters where needed.
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stderr decoded as UTF-8, with replacement characters where needed.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

impl ShellCollector for ShellOutput {
    fn stdout(&mut self, chunk: &[u8]) {
        self.stdout.extend_from_slice(chunk);
    }

    fn stderr(&mut self, chunk: &[u8]) {
        self.stderr.extend_from_slice(chunk);
    }

    fn end(&mut self, exit_code: u32) {
        self.exit_code = exit_code;
    }
}

/// Collector wrapper that pulses a heartbeat before forwarding each event.
struct MonitoredCollector<'a, C> {
    inner: &'a mut C,
    beat: Heartbeat,
}

impl<C: ShellCollector> ShellCollector for MonitoredCollector<'_, C> {
    fn start(&mut self) {
        self.beat.pulse();
        self.inner.start();
    }

    fn stdout(&mut self, chunk: &[u8]) {
        self.beat.pulse();
        self.inner.stdout(chunk);
    }

    fn stderr(&mut self, chunk: &[u8]) {
        self.beat.pulse();
        self.inner.stderr(chunk);
    }

    fn end(&mut self, exit_code: u32) {
        self.beat.pulse();
        self.inner.end(exit_code);
    }
}

/// Services that run on one selected device.
#[derive(Debug, Clone)]
pub struct DeviceServices {
    addrs: ServerAddrs,
    selector: DeviceSelector,
}

impl DeviceServices {
    /// Builds services targeting `selector` through `addrs`.
    pub fn new(addrs: ServerAddrs, selector: DeviceSelector) -> Self {
        Self { addrs, selector }
    }

    /// The selector every operation targets.
    pub fn selector(&self) -> &DeviceSelector {
        &self.selector
    }

    /// Opens a fresh channel, switches transport, and starts `service`.
    async fn open(&self, service: &str, tracker: &TimeoutTracker) -> Result<TcpStream> {
        let stream = channel::connect(&self.addrs, tracker).await?;
        let mut runner = ServiceRunner::new(stream);
        runner.switch_transport(&self.selector, tracker).await?;
        runner.run(service, tracker).await?;
        Ok(runner.into_inner())
    }

    /// Starts `shell:<command>` (legacy protocol) and returns the channel.
    ///
    /// Stdout and stderr arrive interleaved as raw bytes; the stream ends
    /// when the command does. The exit code is not reported.
    pub async fn shell(&self, command: &str, tracker: &TimeoutTracker) -> Result<TcpStream> {
        self.open(&format!("shell:{command}"), tracker).await
    }

    /// Starts `exec:<command>` and returns the channel: stdout only, raw.
    pub async fn exec(&self, command: &str, tracker: &TimeoutTracker) -> Result<TcpStream> {
        self.open(&format!("exec:{command}"), tracker).await
    }

    /// Runs `command` under the shell-v2 protocol.
    ///
    /// Output packets are demultiplexed into `collector`; bytes from `stdin`
    /// (when given) are forwarded as `STDIN` packets, with a `CLOSE_STDIN`
    /// packet and a half-close once it reaches end-of-data. Returns the exit
    /// code. Dropping the returned future cancels the producer, the stdin
    /// forwarder, and the channel together.
    pub async fn shell_v2<R, C>(
        &self,
        command: &str,
        stdin: Option<&mut R>,
        collector: &mut C,
        tracker: &TimeoutTracker,
    ) -> Result<u32>
    where
        R: AsyncRead + Unpin,
        C: ShellCollector,
    {
        let stream = self.open(&format!("shell,v2:{command}"), tracker).await?;
        run_shell_v2(stream, stdin, collector, None, tracker).await
    }

    /// Like [`DeviceServices::shell_v2`], failing with
    /// [`Error::IdleTimeout`] if the command produces no output event for
    /// longer than `idle_limit`. The overall tracker still bounds the whole
    /// command; the idle window only measures silence.
    pub async fn shell_v2_with_idle_monitor<R, C>(
        &self,
        command: &str,
        stdin: Option<&mut R>,
        collector: &mut C,
        idle_limit: Duration,
        tracker: &TimeoutTracker,
    ) -> Result<u32>
    where
        R: AsyncRead + Unpin,
        C: ShellCollector,
    {
        let stream = self.open(&format!("shell,v2:{command}"), tracker).await?;
        run_shell_v2(stream, stdin, collector, Some(idle_limit), tracker).await
    }

    /// Runs `command` and gathers stdout, stderr and the exit code.
    pub async fn shell_v2_text(&self, command: &str, tracker: &TimeoutTracker) -> Result<ShellOutput> {
        let mut output = ShellOutput::default();
        let exit_code = self
            .shell_v2::<tokio::io::Empty, _>(command, None, &mut output, tracker)
            .await?;
        output.exit_code = exit_code;
        Ok(output)
    }

    /// Starts a `sync:` session for file transfers.
    pub async fn sync(&self, tracker: &TimeoutTracker) -> Result<SyncConnection<TcpStream>> {
        let stream = self.open("sync:", tracker).await?;
        Ok(SyncConnection::new(stream))
    }
}

/// Drives one shell-v2 exchange over an already-started channel.
///
/// Three concerns are polled jointly: the packet producer (with its idle
/// watchdog when monitoring is on) and the stdin forwarder. The forwarder can
/// only fail the exchange; its successful completion leaves the channel
/// half-closed and the producer running. Dropping the future cancels all of
/// them and releases the channel.
pub async fn run_shell_v2<S, R, C>(
    stream: S,
    stdin: Option<&mut R>,
    collector: &mut C,
    idle_limit: Option<Duration>,
    tracker: &TimeoutTracker,
) -> Result<u32>
where
    S: AsyncRead + tokio::io::AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
    C: ShellCollector,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (beat, heartbeat_rx) = idle::heartbeat();

    let produce = async {
        let mut collector = MonitoredCollector {
            inner: collector,
            beat,
        };
        collect_packets(PacketReader::new(read_half), &mut collector, tracker).await
        // MonitoredCollector (and its Heartbeat) drops here, closing the
        // channel so the watchdog exits cleanly.
    };
    let watch = async {
        match idle_limit {
            Some(limit) => idle::watchdog(heartbeat_rx, limit).await,
            None => {
                drop(heartbeat_rx);
                Ok(())
            }
        }
    };
    let monitored_produce = async { tokio::try_join!(produce, watch).map(|(exit, ())| exit) };

    let mut writer = PacketWriter::new(write_half);
    let forward = async {
        match stdin {
            Some(source) => forward_stdin(source, &mut writer, tracker).await?,
            None => {
                writer
                    .write_packet(PacketKind::CloseStdin, &[], tracker)
                    .await?;
                writer.shutdown(tracker).await?;
            }
        }
        // Done forwarding; only the producer decides when the exchange ends.
        std::future::pending::<Result<u32>>().await
    };

    tokio::select! {
        exit = monitored_produce => exit,
        err = forward => err,
    }
}

/// Reads packets until the exit code arrives, demultiplexing into the
/// collector. A stream that ends without an exit code is a protocol error.
async fn collect_packets<S, C>(
    mut reader: PacketReader<S>,
    collector: &mut C,
    tracker: &TimeoutTracker,
) -> Result<u32>
where
    S: AsyncRead + Unpin,
    C: ShellCollector,
{
    collector.start();
    loop {
        match reader.read_packet(tracker).await? {
            Some((PacketKind::Stdout, payload)) => collector.stdout(payload),
            Some((PacketKind::Stderr, payload)) => collector.stderr(payload),
            Some((PacketKind::ExitCode, payload)) => {
                let code = payload.first().copied().map(u32::from).ok_or_else(|| {
                    Error::protocol("exit code packet with empty payload")
                })?;
                collector.end(code);
                return Ok(code);
            }
            Some((kind, _)) => {
                // Unknown or out-of-place kinds are skipped, not fatal.
                warn!(?kind, "ignoring unexpected shell-v2 packet");
            }
            None => return Err(Error::protocol("shell stream ended before exit code")),
        }
    }
}

/// Forwards `source` to the remote stdin as `STDIN` packets, then announces
/// end-of-input and half-closes the write side.
async fn forward_stdin<R, W>(
    source: &mut R,
    writer: &mut PacketWriter<W>,
    tracker: &TimeoutTracker,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut chunk = vec![0u8; DEFAULT_SHELL_BUFFER_SIZE];
    loop {
        let n = tracker.within(async { source.read(&mut chunk).await }).await?;
        if n == 0 {
            break;
        }
        writer
            .write_packet(PacketKind::Stdin, &chunk[..n], tracker)
            .await?;
    }
    debug!("stdin exhausted, half-closing shell channel");
    writer
        .write_packet(PacketKind::CloseStdin, &[], tracker)
        .await?;
    writer.shutdown(tracker).await
}
