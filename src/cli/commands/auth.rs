use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    let command = with_guard_args(command);
    with_provider_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("jwt-secret")
                .long("jwt-secret")
                .help("Signing key for issued tokens, at least 32 bytes")
                .env("GARDI_JWT_SECRET")
                .required(true),
        )
        .arg(
            Arg::new("jwt-previous-secrets")
                .long("jwt-previous-secrets")
                .help("Comma-separated retired signing keys still accepted for verification")
                .env("GARDI_JWT_PREVIOUS_SECRETS"),
        )
        .arg(
            Arg::new("access-ttl-seconds")
                .long("access-ttl-seconds")
                .help("Access token lifetime in seconds")
                .env("GARDI_ACCESS_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("refresh-ttl-seconds")
                .long("refresh-ttl-seconds")
                .help("Refresh token lifetime in seconds")
                .env("GARDI_REFRESH_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_guard_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("login-max-failures")
                .long("login-max-failures")
                .help("Failed logins tolerated before an account locks out")
                .env("GARDI_LOGIN_MAX_FAILURES")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("login-fail-window-seconds")
                .long("login-fail-window-seconds")
                .help("Window over which login failures are counted")
                .env("GARDI_LOGIN_FAIL_WINDOW_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("login-lock-seconds")
                .long("login-lock-seconds")
                .help("Lockout duration once the failure threshold is reached")
                .env("GARDI_LOGIN_LOCK_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("refresh-max-attempts")
                .long("refresh-max-attempts")
                .help("Refresh attempts allowed per client address per window")
                .env("GARDI_REFRESH_MAX_ATTEMPTS")
                .default_value("30")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("refresh-window-seconds")
                .long("refresh-window-seconds")
                .help("Window over which refresh attempts are counted")
                .env("GARDI_REFRESH_WINDOW_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("purge-interval-seconds")
                .long("purge-interval-seconds")
                .help("Interval between expired-session sweeps")
                .env("GARDI_PURGE_INTERVAL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_provider_args(command: Command) -> Command {
    command.arg(
        Arg::new("google-client-id")
            .long("google-client-id")
            .help("Google OAuth client id; omit to disable Google login")
            .env("GARDI_GOOGLE_CLIENT_ID"),
    )
}

#[derive(Debug)]
pub struct Options {
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

impl Options {
    /// Collect token/guard options from parsed matches.
    ///
    /// # Errors
    /// Returns an error if the signing key is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let jwt_secret = matches
            .get_one::<String>("jwt-secret")
            .cloned()
            .context("missing required argument: --jwt-secret")?;

        let jwt_previous_secrets = matches
            .get_one::<String>("jwt-previous-secrets")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|secret| !secret.is_empty())
                    .map(|secret| SecretString::from(secret.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            jwt_secret: SecretString::from(jwt_secret),
            jwt_previous_secrets,
            access_ttl_seconds: matches
                .get_one::<u64>("access-ttl-seconds")
                .copied()
                .unwrap_or(900),
            refresh_ttl_seconds: matches
                .get_one::<u64>("refresh-ttl-seconds")
                .copied()
                .unwrap_or(604_800),
            login_max_failures: matches
                .get_one::<u64>("login-max-failures")
                .copied()
                .unwrap_or(5),
            login_fail_window_seconds: matches
                .get_one::<u64>("login-fail-window-seconds")
                .copied()
                .unwrap_or(900),
            login_lock_seconds: matches
                .get_one::<u64>("login-lock-seconds")
                .copied()
                .unwrap_or(900),
            refresh_max_attempts: matches
                .get_one::<u64>("refresh-max-attempts")
                .copied()
                .unwrap_or(30),
            refresh_window_seconds: matches
                .get_one::<u64>("refresh-window-seconds")
                .copied()
                .unwrap_or(900),
            purge_interval_seconds: matches
                .get_one::<u64>("purge-interval-seconds")
                .copied()
                .unwrap_or(3600),
            google_client_id: matches.get_one::<String>("google-client-id").cloned(),
        })
    }
}
