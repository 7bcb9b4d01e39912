//! Session and token lifecycle: login, refresh rotation, logout, and the
//! abuse counters that gate them.

pub mod error;
pub mod guard;
pub mod identity;
pub mod lifecycle;
pub mod session;
pub mod token;

pub use error::{AuthError, AuthResult};
pub use lifecycle::{LifecycleCoordinator, TokenPair};
