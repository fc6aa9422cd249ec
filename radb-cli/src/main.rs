//! CLI for the radb ADB client.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod logging;

use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use radb::{
    DeviceSelector, HostServices, ServerAddrs, ShellCollector, SyncProgress, TimeLimit,
    TimeoutTracker,
};

#[derive(Parser)]
#[command(name = "radb", version, about = "Client for a local ADB server")]
struct Cli {
    /// Server address, repeatable; candidates are tried in order.
    #[arg(
        long,
        global = true,
        env = "RADB_SERVER",
        value_delimiter = ',',
        value_name = "HOST:PORT"
    )]
    server: Vec<String>,

    /// Target the device with this serial number.
    #[arg(short, long, global = true, env = "RADB_SERIAL")]
    serial: Option<String>,

    /// Target the device with this transport id.
    #[arg(short = 't', long, global = true, conflicts_with = "serial")]
    transport_id: Option<u64>,

    /// Target the single USB-attached device.
    #[arg(long, global = true, conflicts_with_all = ["serial", "transport_id"])]
    usb: bool,

    /// Target the single TCP-connected device or emulator.
    #[arg(long, global = true, conflicts_with_all = ["serial", "transport_id", "usb"])]
    local: bool,

    /// Overall deadline in seconds; unbounded when omitted.
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the server's internal protocol version.
    Version,

    /// List connected devices.
    Devices,

    /// Print the feature set negotiated with the target device.
    Features,

    /// Ask the server to exit.
    Kill,

    /// Run a command on the device and mirror its output.
    ///
    /// Exits with the remote command's exit code.
    Shell {
        /// Forward this process's stdin to the remote command.
        #[arg(short, long)]
        interactive: bool,

        /// Fail if the command produces no output for this many seconds.
        #[arg(long, value_name = "SECS")]
        idle_timeout: Option<u64>,

        /// The command line to run.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Copy a local file to the device.
    Push {
        /// Local source path.
        local: String,
        /// Remote destination path.
        remote: String,
    },

    /// Copy a file from the device.
    Pull {
        /// Remote source path.
        remote: String,
        /// Local destination path.
        local: String,
    },

    /// Generate shell completion scripts.
    #[command(hide = true)]
    Completion {
        /// Target shell.
        shell: Shell,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    logging::init();
    if let Err(e) = Cli::parse().dispatch().await {
        eprintln!("radb: {e:#}");
        std::process::exit(1);
    }
}

impl Cli {
    fn addrs(&self) -> ServerAddrs {
        if self.server.is_empty() {
            ServerAddrs::local_default()
        } else {
            ServerAddrs::new(self.server.iter().cloned())
        }
    }

    fn selector(&self) -> DeviceSelector {
        if let Some(serial) = &self.serial {
            DeviceSelector::serial(serial)
        } else if let Some(id) = self.transport_id {
            DeviceSelector::transport_id(id)
        } else if self.usb {
            DeviceSelector::usb()
        } else if self.local {
            DeviceSelector::local()
        } else {
            DeviceSelector::any()
        }
    }

    fn tracker(&self) -> TimeoutTracker {
        match self.timeout {
            Some(secs) => TimeoutTracker::new(TimeLimit::Bounded(Duration::from_secs(secs))),
            None => TimeoutTracker::unbounded(),
        }
    }

    async fn dispatch(self) -> Result<()> {
        let host = HostServices::new(self.addrs());
        let tracker = self.tracker();
        match &self.command {
            Command::Version => {
                println!("{:04x}", host.version(&tracker).await?);
                Ok(())
            }
            Command::Devices => {
                print!("{}", host.devices(&tracker).await?);
                Ok(())
            }
            Command::Features => {
                for feature in host.features(&self.selector(), &tracker).await? {
                    println!("{feature}");
                }
                Ok(())
            }
            Command::Kill => host.kill(&tracker).await.map_err(Into::into),
            Command::Shell {
                interactive,
                idle_timeout,
                command,
            } => {
                let device = host.device(self.selector());
                let command = command.join(" ");

                let mut stdin = tokio::io::stdin();
                let stdin = interactive.then_some(&mut stdin);
                let mut mirror = Mirror;
                let exit_code = match idle_timeout {
                    Some(secs) => {
                        device
                            .shell_v2_with_idle_monitor(
                                &command,
                                stdin,
                                &mut mirror,
                                Duration::from_secs(*secs),
                                &tracker,
                            )
                            .await?
                    }
                    None => device.shell_v2(&command, stdin, &mut mirror, &tracker).await?,
                };
                if exit_code != 0 {
                    std::process::exit(exit_code as i32);
                }
                Ok(())
            }
            Command::Push { local, remote } => {
                let device = host.device(self.selector());
                let mut sync = device.sync(&tracker).await?;
                let mut progress = Report;
                sync.send_file(local, remote, &mut progress, &tracker).await?;
                Ok(())
            }
            Command::Pull { remote, local } => {
                let device = host.device(self.selector());
                let mut sync = device.sync(&tracker).await?;
                let mut progress = Report;
                sync.recv_file(remote, local, &mut progress, &tracker).await?;
                Ok(())
            }
            Command::Completion { shell } => {
                clap_complete::generate(
                    *shell,
                    &mut Self::command(),
                    "radb",
                    &mut std::io::stdout(),
                );
                Ok(())
            }
        }
    }
}

/// Mirrors remote output onto this process's stdout/stderr.
struct Mirror;

impl ShellCollector for Mirror {
    fn stdout(&mut self, chunk: &[u8]) {
        let _ = std::io::stdout().write_all(chunk);
        let _ = std::io::stdout().flush();
    }

    fn stderr(&mut self, chunk: &[u8]) {
        let _ = std::io::stderr().write_all(chunk);
    }
}

/// Prints transfer results to stderr.
struct Report;

impl SyncProgress for Report {
    fn transfer_done(&mut self, remote_path: &str, transferred: u64) {
        eprintln!("{remote_path}: {transferred} bytes");
    }
}
