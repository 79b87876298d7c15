//! CLI module for fieldstore
//!
//! Provides command-line access to the intervention store:
//! - init: Create the data directory and an empty image
//! - record / list / show / delete: Work with interventions
//! - flush: Force the image to disk
//! - inspect: Summarize the image

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{delete, execute, flush, init, inspect, list, record, run, run_command, show};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};
