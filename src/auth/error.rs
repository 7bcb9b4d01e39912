//! Error taxonomy for the session/token lifecycle.

use thiserror::Error;

/// Result type alias for lifecycle operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Business outcomes and infrastructure failures of the auth core.
///
/// Every variant except [`AuthError::Unavailable`] is an expected business
/// outcome with a stable message; none of them is retried by the core.
/// Messages deliberately do not reveal *why* a token was rejected beyond the
/// coarse class: a replayed token and a forged token read the same to the
/// caller, and a reuse event does not advertise that a family-wide
/// revocation happened.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User not found")]
    UserNotFound,

    #[error("Too many attempts. Try again later.")]
    TooManyAttempts,

    /// Malformed, unverifiable, or wrong-type token. Deliberately
    /// undifferentiated: expired signatures, bad signatures, and garbage all
    /// collapse here so the codec never acts as an oracle.
    #[error("Invalid token")]
    InvalidToken,

    #[error("Refresh token expired")]
    TokenExpired,

    /// Reuse of an already-rotated or mismatching refresh token. Always
    /// accompanied by a family-wide revocation before it is surfaced.
    #[error("Refresh token reuse detected")]
    TokenReused,

    #[error("Refresh session not found")]
    SessionNotFound,

    #[error("Invalid external identity token")]
    InvalidExternalToken,

    /// The durable store is unreachable. Fatal to the in-flight request;
    /// the ephemeral store degrades silently instead of raising this.
    #[error("Service unavailable")]
    Unavailable(#[source] anyhow::Error),
}

impl AuthError {
    /// HTTP-equivalent status classification per the external contract.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            AuthError::InvalidCredentials
            | AuthError::InvalidToken
            | AuthError::TokenExpired
            | AuthError::TokenReused
            | AuthError::SessionNotFound
            | AuthError::InvalidExternalToken => 400,
            AuthError::UserNotFound => 404,
            AuthError::TooManyAttempts => 429,
            AuthError::Unavailable(_) => 500,
        }
    }

    /// True when the error marks a detected reuse/security event.
    #[must_use]
    pub fn is_security_event(&self) -> bool {
        matches!(self, AuthError::TokenReused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(AuthError::InvalidCredentials.status(), 400);
        assert_eq!(AuthError::UserNotFound.status(), 404);
        assert_eq!(AuthError::TooManyAttempts.status(), 429);
        assert_eq!(AuthError::InvalidToken.status(), 400);
        assert_eq!(AuthError::TokenExpired.status(), 400);
        assert_eq!(AuthError::TokenReused.status(), 400);
        assert_eq!(AuthError::SessionNotFound.status(), 400);
        assert_eq!(AuthError::InvalidExternalToken.status(), 400);
        assert_eq!(
            AuthError::Unavailable(anyhow::anyhow!("down")).status(),
            500
        );
    }

    #[test]
    fn reuse_is_a_security_event() {
        assert!(AuthError::TokenReused.is_security_event());
        assert!(!AuthError::InvalidToken.is_security_event());
    }

    #[test]
    fn messages_are_stable() {
        assert_eq!(AuthError::InvalidToken.to_string(), "Invalid token");
        assert_eq!(
            AuthError::TokenReused.to_string(),
            "Refresh token reuse detected"
        );
    }
}
