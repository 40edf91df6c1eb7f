//! # sessionguard
//!
//! Rotating session tokens for cookie based authentication, with detection of
//! session forking (a stolen cookie being used in parallel with the victim's).
//!
//! ## Cookie and record model
//!
//! The cookie carries `{session_id}:{token}`. Storage holds only digests: the
//! session id digest is the primary key, and two token slots (`latest`,
//! `previous`) hold the digests of the two most recently issued tokens.
//!
//! ## Rotation
//!
//! Once the latest token's TTL passes, the next request presenting it gets a
//! fresh token; the old one moves into the `previous` slot and the oldest
//! digest is evicted. A request racing the rotation with the previous token is
//! still accepted, so benign concurrency never looks like theft.
//!
//! ## Fork detection
//!
//! A token matching neither slot can only exist if two parties rotated the
//! same session independently. The record is deleted and both parties are
//! logged out.
//!
//! The decision logic in [`machine`] is pure: it never touches storage, never
//! reads the system clock and never logs. [`manager::SessionManager`] wires it
//! to a [`store::SessionStore`] for callers that want the whole flow.

use thiserror::Error;

pub mod cli;
pub mod config;
pub mod conformance;
pub mod credential;
pub mod directive;
pub mod machine;
pub mod manager;
pub mod record;
pub mod server;
pub mod store;
pub mod token;

pub use config::{Clock, SessionConfig};
pub use credential::{Credential, Malformed};
pub use directive::{CookieDirective, CookieOptions, SameSite};
pub use machine::{Action, Login, SessionState, Transition};
pub use manager::SessionManager;
pub use record::{SessionRecord, SessionUpdate};
pub use store::{SessionStore, StoreError};
pub use token::HashDigest;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Errors surfaced by session operations.
///
/// Every terminal session state (forked, expired, ...) is a regular
/// [`SessionState`], not an error. Only infrastructure failures end up here.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to draw randomness from the OS: {0}")]
    Entropy(#[source] rand::Error),
    #[error("session store failure: {0}")]
    Store(#[from] StoreError),
    #[error("{0} ttl moves the expiry past the representable time range")]
    TtlOverflow(&'static str),
}
