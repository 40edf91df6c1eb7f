//! Cookie directives returned by every session operation.
//!
//! A directive says what the caller should send back in `Set-Cookie`. The
//! cookie name is the caller's choice and only appears when rendering.

use chrono::{DateTime, Utc};
use std::fmt;

/// `SameSite` attribute of the session cookie.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SameSite {
    #[default]
    Strict,
    Lax,
}

impl SameSite {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
        }
    }
}

impl std::str::FromStr for SameSite {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lax" => Ok(Self::Lax),
            _ => Err(format!("invalid SameSite value: {value}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    pub path: String,
    /// Seconds; `Some(0)` tells the browser to drop the cookie now.
    pub max_age: Option<i64>,
    pub expires: Option<DateTime<Utc>>,
}

/// Instruction to set or clear the session cookie.
#[derive(Clone, PartialEq, Eq)]
pub struct CookieDirective {
    pub value: String,
    pub options: CookieOptions,
}

impl CookieDirective {
    /// Directive carrying a fresh credential, valid until `expires`.
    #[must_use]
    pub fn issue(
        value: String,
        expires: DateTime<Utc>,
        same_site: SameSite,
        path: &str,
        secure: bool,
    ) -> Self {
        Self {
            value,
            options: CookieOptions {
                http_only: true,
                secure,
                same_site,
                path: path.to_string(),
                max_age: None,
                expires: Some(expires),
            },
        }
    }

    /// Empty value with `Max-Age=0`, used by every terminal state.
    #[must_use]
    pub fn logout(same_site: SameSite, path: &str, secure: bool) -> Self {
        Self {
            value: String::new(),
            options: CookieOptions {
                http_only: true,
                secure,
                same_site,
                path: path.to_string(),
                max_age: Some(0),
                expires: None,
            },
        }
    }

    #[must_use]
    pub fn is_logout(&self) -> bool {
        self.value.is_empty() && self.options.max_age == Some(0)
    }

    /// Render as a `Set-Cookie` header value.
    #[must_use]
    pub fn to_header(&self, name: &str) -> String {
        let options = &self.options;
        let mut cookie = format!("{name}={}; Path={}", self.value, options.path);
        if options.http_only {
            cookie.push_str("; HttpOnly");
        }
        if options.secure {
            cookie.push_str("; Secure");
        }
        cookie.push_str("; SameSite=");
        cookie.push_str(options.same_site.as_str());
        if let Some(max_age) = options.max_age {
            cookie.push_str(&format!("; Max-Age={max_age}"));
        }
        if let Some(expires) = options.expires {
            cookie.push_str(&format!(
                "; Expires={}",
                expires.format("%a, %d %b %Y %H:%M:%S GMT")
            ));
        }
        cookie
    }
}

// The value is a live credential.
impl fmt::Debug for CookieDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = if self.value.is_empty() { "" } else { "[REDACTED]" };
        f.debug_struct("CookieDirective")
            .field("value", &value)
            .field("options", &self.options)
            .finish()
    }
}
