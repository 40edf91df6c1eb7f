use crate::cli::commands::session::Options;
use crate::config::SessionConfig;
use crate::manager::SessionManager;
use crate::server::{self, AppState};
use crate::store::{MemoryStore, PgSessionStore, SessionStore};
use anyhow::{Context, Result};
use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<SecretString>,
    pub db_max_connections: u32,
    pub session: Options,
}

/// # Errors
/// Returns an error if a TTL does not fit in a [`Duration`].
pub fn session_config(options: &Options) -> Result<SessionConfig> {
    let session_ttl = Duration::try_seconds(options.session_ttl_seconds)
        .context("session ttl out of range")?;
    let token_ttl =
        Duration::try_seconds(options.token_ttl_seconds).context("token ttl out of range")?;
    Ok(SessionConfig::new()
        .with_session_ttl(session_ttl)
        .with_token_ttl(token_ttl)
        .with_same_site(options.same_site)
        .with_path(options.cookie_path.clone())
        .with_secure(options.secure))
}

/// DSN with the password removed, for logs.
fn redacted_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("****"));
            }
            url.to_string()
        }
        Err(_) => "<unparseable dsn>".to_string(),
    }
}

async fn build_store(args: &Args) -> Result<Arc<dyn SessionStore>> {
    let Some(dsn) = &args.dsn else {
        warn!("No DSN configured, sessions are kept in memory and lost on restart");
        return Ok(Arc::new(MemoryStore::new()));
    };

    info!("Connecting to {}", redacted_dsn(dsn.expose_secret()));
    let pool = PgPoolOptions::new()
        .max_connections(args.db_max_connections)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect(dsn.expose_secret())
        .await
        .context("Failed to connect to database")?;

    let store = PgSessionStore::new(pool);
    store
        .migrate()
        .await
        .context("Failed to apply session schema")?;

    Ok(Arc::new(store))
}

/// Execute the server action.
/// # Errors
/// Returns an error if the store cannot be initialized or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let config = session_config(&args.session)?;
    for warning in config.validate() {
        warn!("Session config: {warning}");
    }

    let store = build_store(&args).await?;
    let manager = SessionManager::new(store, config);
    let state = Arc::new(AppState::new(manager, args.session.cookie_name.clone()));

    server::new(args.port, state).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::SameSite;

    #[test]
    fn session_config_maps_options() {
        let options = Options {
            session_ttl_seconds: 3600,
            token_ttl_seconds: 60,
            cookie_name: "sid".to_string(),
            cookie_path: "/app".to_string(),
            same_site: SameSite::Lax,
            secure: false,
        };
        let config = session_config(&options).unwrap();
        assert_eq!(config.session_ttl(), Duration::hours(1));
        assert_eq!(config.token_ttl(), Duration::minutes(1));
        assert_eq!(config.same_site(), SameSite::Lax);
        assert_eq!(config.path(), "/app");
        assert!(!config.secure());
    }

    #[test]
    fn session_config_rejects_unrepresentable_ttl() {
        let options = Options {
            session_ttl_seconds: i64::MAX,
            token_ttl_seconds: 60,
            cookie_name: "sid".to_string(),
            cookie_path: "/".to_string(),
            same_site: SameSite::Strict,
            secure: true,
        };
        let err = session_config(&options).unwrap_err();
        assert_eq!(err.to_string(), "session ttl out of range");
    }

    #[test]
    fn redacted_dsn_hides_password() {
        assert_eq!(
            redacted_dsn("postgres://user:hunter2@db:5432/sessions"),
            "postgres://user:****@db:5432/sessions"
        );
        assert_eq!(
            redacted_dsn("postgres://db/sessions"),
            "postgres://db/sessions"
        );
        assert_eq!(redacted_dsn("not a url"), "<unparseable dsn>");
    }

    #[tokio::test]
    async fn build_store_without_dsn_is_memory() {
        let args = Args {
            port: 0,
            dsn: None,
            db_max_connections: 1,
            session: Options {
                session_ttl_seconds: 3600,
                token_ttl_seconds: 60,
                cookie_name: "sid".to_string(),
                cookie_path: "/".to_string(),
                same_site: SameSite::Strict,
                secure: true,
            },
        };
        let store = build_store(&args).await.unwrap();
        assert!(store
            .read(&crate::token::digest("nothing"))
            .await
            .unwrap()
            .is_none());
    }
}
