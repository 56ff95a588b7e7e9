// CLI definitions using clap

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "myo_driver")]
#[command(author, version, about = "Myo armband driver for the BLED112 BLE dongle")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Serial device of the BLED112 dongle (e.g. /dev/ttyACM0)
    #[arg(short, long)]
    pub port: String,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for advertising Myo armbands
    #[command(visible_aliases = ["scan", "d"])]
    Discover {
        /// Scan duration in seconds
        #[arg(long, default_value = "3")]
        duration: f64,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Connect to an armband and stream joint EMG+IMU samples to stdout
    #[command(visible_alias = "s")]
    Stream {
        /// Armband address as printed by discover; first found when omitted
        #[arg(long)]
        address: Option<String>,

        /// Stop after this many seconds (runs until Ctrl-C when omitted)
        #[arg(long)]
        duration: Option<f64>,

        /// Emit line-delimited JSON instead of columns
        #[arg(long)]
        json: bool,
    },

    /// Read the battery level
    #[command(visible_alias = "b")]
    Battery {
        /// Armband address; first found when omitted
        #[arg(long)]
        address: Option<String>,
    },

    /// Make the armband vibrate
    #[command(visible_alias = "v")]
    Vibrate {
        /// Vibration duration
        #[arg(value_enum, default_value = "short")]
        kind: VibrateKind,

        /// Armband address; first found when omitted
        #[arg(long)]
        address: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum VibrateKind {
    Short,
    Medium,
    Long,
}
