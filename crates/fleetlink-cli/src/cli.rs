//! Clap CLI definitions for Fleetlink.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const DEFAULT_SOCK: &str = "/run/fleetlink/agent.sock";

/// Fleetlink — supervise a fleet of machines over one encrypted channel.
#[derive(Parser)]
#[command(
    name = "fleetlink",
    version,
    about = "Fleetlink — fleet supervision over encrypted TCP",
    long_about = "Fleetlink — fleet supervision over encrypted TCP\n\n\
                  Run `fleetlink agent` on each machine and `fleetlink center`\n\
                  on the controller; `fleetlink ctl` talks to a local agent."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the agent daemon on this machine.
    Agent {
        /// Path to the agent JSON config file.
        #[arg(long, default_value = "/etc/fleetlink/agent.json")]
        config: PathBuf,
        /// Control socket path.
        #[arg(long, default_value = DEFAULT_SOCK)]
        sock: PathBuf,
    },
    /// Run the center daemon that supervises the fleet.
    Center {
        /// Path to the center JSON config file.
        #[arg(long, default_value = "/etc/fleetlink/center.json")]
        config: PathBuf,
    },
    /// Send one control command to a local agent.
    Ctl {
        /// Control socket path.
        #[arg(long, default_value = DEFAULT_SOCK)]
        sock: PathBuf,
        /// Command line: `status`, `stop`, `update`, `remove`,
        /// `config [key [value]]`.
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
}
