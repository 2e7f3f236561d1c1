//! `subfetch` loads resources through the in-memory resource cache.
//!
//! Every URL is requested a configurable number of times, so later rounds show whether the cached
//! entry was reused, revalidated with the origin, or loaded again.

use subresource::logging;

mod cli;
mod client;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
