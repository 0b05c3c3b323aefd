//! Command-line surface, grounded on the `clap::Parser`/`Subcommand` derive
//! pattern used by `w-utter-RustDDS`'s `ddsperf` example — the only
//! hand-rolled-CLI-vs-derive-CLI grounding source in the pack with a real
//! subcommand tree rather than a flat flag list.

use std::path::PathBuf;

use clap::Parser;

/// wanctl: autonomous multi-WAN failover decision and control daemon.
#[derive(Parser, Debug)]
#[command(name = "wanctl", version, about)]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "/etc/wanctl/wanctl.toml")]
    pub config: PathBuf,

    /// Path to the control-surface Unix domain socket.
    #[arg(long, default_value = "/run/wanctl/control.sock")]
    pub socket: PathBuf,

    /// Run a fixed number of ticks against the in-memory test adapter and
    /// exit, instead of driving the real multi-WAN subsystem. Intended for
    /// config smoke-testing, not production use.
    #[arg(long)]
    pub once: Option<u64>,
}
