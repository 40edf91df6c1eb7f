//! Session policy: TTLs, cookie attributes and the clock.

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::Arc;

use crate::directive::{CookieDirective, SameSite};

const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;
const DEFAULT_TOKEN_TTL_SECONDS: i64 = 10 * 60;

/// Upper bound accepted from configuration for either TTL (ten years).
pub const MAX_TTL_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

/// Source of the current instant. Injected so tests can move time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Clone)]
pub struct SessionConfig {
    session_ttl: Duration,
    token_ttl: Duration,
    same_site: SameSite,
    path: String,
    secure: bool,
    clock: Clock,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_ttl: Duration::seconds(DEFAULT_SESSION_TTL_SECONDS),
            token_ttl: Duration::seconds(DEFAULT_TOKEN_TTL_SECONDS),
            same_site: SameSite::Strict,
            path: "/".to_string(),
            secure: true,
            clock: Arc::new(Utc::now),
        }
    }

    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: String) -> Self {
        self.path = path;
        self
    }

    /// Drop the `Secure` attribute. Only for plain HTTP development setups.
    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    #[must_use]
    pub fn same_site(&self) -> SameSite {
        self.same_site
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn secure(&self) -> bool {
        self.secure
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Directive for a freshly issued credential.
    #[must_use]
    pub fn issue_cookie(&self, value: String, expires: DateTime<Utc>) -> CookieDirective {
        CookieDirective::issue(value, expires, self.same_site, &self.path, self.secure)
    }

    #[must_use]
    pub fn logout_cookie(&self) -> CookieDirective {
        CookieDirective::logout(self.same_site, &self.path, self.secure)
    }

    /// Settings that are accepted but probably wrong. Nothing here is
    /// enforced; callers decide whether to log or refuse.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.session_ttl <= Duration::zero() {
            warnings.push("session ttl must be positive".to_string());
        }
        if self.token_ttl <= Duration::zero() {
            warnings.push("token ttl must be positive".to_string());
        }
        for (name, ttl) in [("session", self.session_ttl), ("token", self.token_ttl)] {
            if ttl > Duration::seconds(MAX_TTL_SECONDS) {
                warnings.push(format!(
                    "{name} ttl ({}s) exceeds the maximum of {MAX_TTL_SECONDS}s",
                    ttl.num_seconds()
                ));
            }
        }
        if self.token_ttl >= self.session_ttl {
            warnings.push(format!(
                "token ttl ({}s) should be shorter than session ttl ({}s)",
                self.token_ttl.num_seconds(),
                self.session_ttl.num_seconds()
            ));
        }
        warnings
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("session_ttl", &self.session_ttl)
            .field("token_ttl", &self.token_ttl)
            .field("same_site", &self.same_site)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}
