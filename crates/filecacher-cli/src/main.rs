//! Filecacher.
//!
//! A command line front end for the `filecacher` disk cache. It ingests local files into a cache
//! directory, applying the configured eviction policy, and can clear leftovers of earlier runs.

#![warn(
    missing_docs,
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

mod cli;
mod logging;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
