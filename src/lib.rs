//! # Gardi (Session & Token Lifecycle Service)
//!
//! `gardi` issues and manages authentication credentials for API clients:
//! short-lived access tokens and long-lived, rotating refresh tokens, with
//! server-side tracking to detect theft and to bound the blast radius of a
//! stolen token.
//!
//! ## Refresh-Token Families
//!
//! Every login starts a *family* of sessions. Each successful refresh rotates
//! the family head: the presented session is revoked and points at its
//! successor via `replaced_by_session_id`. At most one non-revoked session
//! exists per family at any instant.
//!
//! Presenting an already-rotated refresh token is a *reuse event*: the whole
//! family is revoked and no token descended from that login ever refreshes
//! again. Replay of a stolen token therefore invalidates the thief's copy and
//! the legitimate client's copy alike, forcing a fresh login.
//!
//! ## Dual-Store Design
//!
//! PostgreSQL owns the authoritative session state. A low-latency counter
//! store (Redis, or in-process) carries failed-login lockouts, refresh rate
//! limits, and advisory token/user caches. The ephemeral store is never the
//! arbiter of a security decision: losing it weakens rate limiting, never
//! revocation.
//!
//! ## Signing-Key Rotation
//!
//! Tokens are HS256-signed. Verification walks an ordered key list
//! `{current, previous...}` so deployments can rotate the signing secret
//! without invalidating outstanding tokens; dropping a previous key from the
//! configuration invalidates everything signed with it, with no other side
//! effect.

pub mod api;
pub mod auth;
pub mod cli;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
