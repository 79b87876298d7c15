//! fieldstore CLI entry point
//!
//! Parses arguments and dispatches through `cli::run`. The command's JSON
//! response has already been printed when an error comes back here.

use fieldstore::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
