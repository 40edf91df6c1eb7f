//! Maps validated CLI matches to the action the binary runs.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{self, session};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if a defaulted argument is unexpectedly missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(commands::ARG_DSN)
        .cloned()
        .map(SecretString::from);
    let db_max_connections = matches
        .get_one::<u32>(commands::ARG_DB_MAX_CONNECTIONS)
        .copied()
        .context("missing --db-max-connections")?;

    let session = session::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        db_max_connections,
        session,
    }))
}
