use crate::{
    api,
    auth::{guard::GuardConfig, token::TokenConfig},
};
use anyhow::Result;
use secrecy::SecretString;
use std::time::Duration;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub redis_url: Option<String>,
    pub jwt_secret: SecretString,
    pub jwt_previous_secrets: Vec<SecretString>,
    pub access_ttl_seconds: u64,
    pub refresh_ttl_seconds: u64,
    pub login_max_failures: u64,
    pub login_fail_window_seconds: u64,
    pub login_lock_seconds: u64,
    pub refresh_max_attempts: u64,
    pub refresh_window_seconds: u64,
    pub purge_interval_seconds: u64,
    pub google_client_id: Option<String>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the signing key is unusable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let token = TokenConfig::new(args.jwt_secret)
        .with_previous_secrets(args.jwt_previous_secrets)
        .with_access_ttl(Duration::from_secs(args.access_ttl_seconds))
        .with_refresh_ttl(Duration::from_secs(args.refresh_ttl_seconds));

    let guard = GuardConfig::new()
        .with_max_login_failures(args.login_max_failures)
        .with_login_fail_window(Duration::from_secs(args.login_fail_window_seconds))
        .with_login_lock(Duration::from_secs(args.login_lock_seconds))
        .with_max_refresh_attempts(args.refresh_max_attempts)
        .with_refresh_window(Duration::from_secs(args.refresh_window_seconds));

    api::new(api::ServerConfig {
        port: args.port,
        dsn: args.dsn,
        redis_url: args.redis_url,
        token,
        guard,
        google_client_id: args.google_client_id,
        purge_interval: Duration::from_secs(args.purge_interval_seconds),
    })
    .await
}
