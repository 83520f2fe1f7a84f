//! Local user identity and login sessions.
//!
//! Provides:
//! - Registration with name/email/password and a role
//!   (iterated SHA-256, 100k rounds + per-user salt)
//! - Opaque session tokens (SHA-256 hashed at rest, time-limited)
//! - SQLite-backed persistent storage
//!
//! Sessions use opaque random tokens with server-side hashed lookup —
//! no JWT dependency. Error messages are already user-facing
//! ("Invalid email or password."), so the CLI prints them verbatim.

pub mod store;

pub use store::{AuthStore, User, UserRole};
