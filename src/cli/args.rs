//! CLI argument definitions using clap
//!
//! Commands:
//! - fieldstore init --config <path>
//! - fieldstore record --config <path> --station <id> [--consumption N] [--traces a,b] [--notes text]
//! - fieldstore list --config <path> [--station <id>]
//! - fieldstore show --config <path> <id>
//! - fieldstore delete --config <path> <id>
//! - fieldstore flush --config <path>
//! - fieldstore inspect --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// fieldstore - on-device record store for field interventions
#[derive(Parser, Debug)]
#[command(name = "fieldstore")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Create the data directory and an empty store image
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./fieldstore.json")]
        config: PathBuf,
    },

    /// Record an intervention at a station
    Record {
        #[arg(long, default_value = "./fieldstore.json")]
        config: PathBuf,

        /// Station identifier
        #[arg(long)]
        station: String,

        /// Bait consumed, in percent (0, 25, 50, 75 or 100)
        #[arg(long, default_value_t = 0)]
        consumption: u8,

        /// Comma-separated traces: droppings, tracks, damage, nest, smell
        #[arg(long, default_value = "")]
        traces: String,

        /// Free-text notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// List interventions
    List {
        #[arg(long, default_value = "./fieldstore.json")]
        config: PathBuf,

        /// Only this station
        #[arg(long)]
        station: Option<String>,
    },

    /// Show one intervention
    Show {
        #[arg(long, default_value = "./fieldstore.json")]
        config: PathBuf,

        id: String,
    },

    /// Delete one intervention
    Delete {
        #[arg(long, default_value = "./fieldstore.json")]
        config: PathBuf,

        id: String,
    },

    /// Force a flush of the store image
    Flush {
        #[arg(long, default_value = "./fieldstore.json")]
        config: PathBuf,
    },

    /// Summarize the stored image
    Inspect {
        #[arg(long, default_value = "./fieldstore.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_arguments() {
        let cli = Cli::try_parse_from([
            "fieldstore",
            "record",
            "--station",
            "STA-4",
            "--consumption",
            "50",
            "--traces",
            "nest,smell",
        ])
        .unwrap();

        assert_eq!(
            cli.command,
            Command::Record {
                config: PathBuf::from("./fieldstore.json"),
                station: "STA-4".into(),
                consumption: 50,
                traces: "nest,smell".into(),
                notes: None,
            }
        );
    }

    #[test]
    fn test_show_requires_id() {
        assert!(Cli::try_parse_from(["fieldstore", "show"]).is_err());
    }
}
