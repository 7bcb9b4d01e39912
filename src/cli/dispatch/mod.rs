//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::auth;
use anyhow::{anyhow, Context, Result};
use url::Url;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let redis_url = matches.get_one::<String>("redis-url").cloned();
    if let Some(url) = &redis_url {
        let parsed = Url::parse(url).context("invalid GARDI_REDIS_URL")?;
        if parsed.scheme() != "redis" && parsed.scheme() != "rediss" {
            return Err(anyhow!(
                "invalid GARDI_REDIS_URL: expected redis:// or rediss:// scheme"
            ));
        }
    }

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        redis_url,
        jwt_secret: auth_opts.jwt_secret,
        jwt_previous_secrets: auth_opts.jwt_previous_secrets,
        access_ttl_seconds: auth_opts.access_ttl_seconds,
        refresh_ttl_seconds: auth_opts.refresh_ttl_seconds,
        login_max_failures: auth_opts.login_max_failures,
        login_fail_window_seconds: auth_opts.login_fail_window_seconds,
        login_lock_seconds: auth_opts.login_lock_seconds,
        refresh_max_attempts: auth_opts.refresh_max_attempts,
        refresh_window_seconds: auth_opts.refresh_window_seconds,
        purge_interval_seconds: auth_opts.purge_interval_seconds,
        google_client_id: auth_opts.google_client_id,
    }))
}
