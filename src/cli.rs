use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "fleet service monitor")]
pub struct Args {
    /// Sub-commands (run, status, etc.)
    #[command(subcommand)]
    pub sub: Option<Cmd>,

    /// Path to configuration file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<String>,

    /// Use system-wide config (/etc/fleetmond/fleetmond.toml)
    #[arg(long, global = true, conflicts_with = "config")]
    pub system: bool,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Run the monitor loops (default if no sub-command)
    Run,
    /// One-shot status check: summary of all units, or detail for one
    Status {
        /// Unit to show in detail; omit for the full summary
        unit: Option<String>,
    },
    /// Execute a control action (start/stop/restart) and re-check the unit
    Ctl {
        unit: String,
        /// One of: start, stop, restart
        action: String,
    },
    /// One-shot KPI data-completeness check
    Kpi,
}
