use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::config::MAX_TTL_SECONDS;
use crate::directive::SameSite;
use crate::server::DEFAULT_COOKIE_NAME;

pub const ARG_SESSION_TTL: &str = "session-ttl";
pub const ARG_TOKEN_TTL: &str = "token-ttl";
pub const ARG_COOKIE_NAME: &str = "cookie-name";
pub const ARG_COOKIE_PATH: &str = "cookie-path";
pub const ARG_SAME_SITE: &str = "same-site";
pub const ARG_INSECURE_COOKIES: &str = "insecure-cookies";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub session_ttl_seconds: i64,
    pub token_ttl_seconds: i64,
    pub cookie_name: String,
    pub cookie_path: String,
    pub same_site: SameSite,
    pub secure: bool,
}

impl Options {
    /// # Errors
    /// Returns an error if a defaulted argument is missing from the matches.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            session_ttl_seconds: matches
                .get_one::<i64>(ARG_SESSION_TTL)
                .copied()
                .context("missing --session-ttl")?,
            token_ttl_seconds: matches
                .get_one::<i64>(ARG_TOKEN_TTL)
                .copied()
                .context("missing --token-ttl")?,
            cookie_name: matches
                .get_one::<String>(ARG_COOKIE_NAME)
                .cloned()
                .context("missing --cookie-name")?,
            cookie_path: matches
                .get_one::<String>(ARG_COOKIE_PATH)
                .cloned()
                .context("missing --cookie-path")?,
            same_site: matches
                .get_one::<SameSite>(ARG_SAME_SITE)
                .copied()
                .context("missing --same-site")?,
            secure: !matches.get_flag(ARG_INSECURE_COOKIES),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_TTL)
                .long(ARG_SESSION_TTL)
                .help("Session lifetime in seconds, extended on every rotation")
                .env("SESSIONGUARD_SESSION_TTL")
                .default_value("43200")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_TTL_SECONDS)),
        )
        .arg(
            Arg::new(ARG_TOKEN_TTL)
                .long(ARG_TOKEN_TTL)
                .help("Seconds before a token is rotated; keep above the longest in-flight request")
                .env("SESSIONGUARD_TOKEN_TTL")
                .default_value("600")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_TTL_SECONDS)),
        )
        .arg(
            Arg::new(ARG_COOKIE_NAME)
                .long(ARG_COOKIE_NAME)
                .help("Name of the session cookie")
                .env("SESSIONGUARD_COOKIE_NAME")
                .default_value(DEFAULT_COOKIE_NAME),
        )
        .arg(
            Arg::new(ARG_COOKIE_PATH)
                .long(ARG_COOKIE_PATH)
                .help("Path attribute of the session cookie")
                .env("SESSIONGUARD_COOKIE_PATH")
                .default_value("/"),
        )
        .arg(
            Arg::new(ARG_SAME_SITE)
                .long(ARG_SAME_SITE)
                .help("SameSite attribute of the session cookie: strict or lax")
                .env("SESSIONGUARD_SAME_SITE")
                .default_value("strict")
                .value_parser(|value: &str| value.parse::<SameSite>()),
        )
        .arg(
            Arg::new(ARG_INSECURE_COOKIES)
                .long(ARG_INSECURE_COOKIES)
                .help("Omit the Secure cookie attribute (plain HTTP development only)")
                .env("SESSIONGUARD_INSECURE_COOKIES")
                .action(ArgAction::SetTrue),
        )
}
