//! SQLite-backed identity store.
//!
//! Tables:
//! - `users`: name, email, role, verified, password_hash, salt, created_at
//! - `sessions`: token_hash, user_id, created_at, expires_at

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SathiError;

/// Default session duration: 30 days (seconds).
const DEFAULT_SESSION_TTL_SECS: u64 = 30 * 24 * 3600;

/// Token byte length before hex encoding (32 bytes = 64 hex chars).
const TOKEN_BYTES: usize = 32;

/// Salt byte length for password hashing.
const SALT_BYTES: usize = 16;

/// Number of SHA-256 iterations for password stretching.
const HASH_ITERATIONS: u32 = 100_000;

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    User,
    Lawyer,
    Admin,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Lawyer => "lawyer",
            Self::Admin => "admin",
        }
    }

    pub fn from_str_code(code: &str) -> Option<Self> {
        match code.to_lowercase().as_str() {
            "user" => Some(Self::User),
            "lawyer" => Some(Self::Lawyer),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// A registered user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub verified: bool,
    pub created_at: i64,
}

/// SQLite-backed identity store.
pub struct AuthStore {
    conn: Mutex<rusqlite::Connection>,
    session_ttl_secs: u64,
}

impl AuthStore {
    /// Open (or create) the identity database at the given path.
    pub fn new(db_path: &Path, session_ttl_secs: Option<u64>) -> Result<Self, SathiError> {
        let conn = rusqlite::Connection::open(db_path)?;

        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                role TEXT NOT NULL,
                verified INTEGER NOT NULL DEFAULT 1,
                password_hash TEXT NOT NULL,
                salt TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                token_hash TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            session_ttl_secs: session_ttl_secs.unwrap_or(DEFAULT_SESSION_TTL_SECS),
        })
    }

    // ── Accounts ────────────────────────────────────────────────────

    /// Register a new account and open a session for it.
    /// Returns the user and the plaintext token (only revealed once).
    pub fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: UserRole,
    ) -> Result<(User, String), SathiError> {
        let name = name.trim();
        let email = email.trim();
        if name.is_empty() {
            return Err(SathiError::Auth("Name cannot be empty.".into()));
        }
        if !email.contains('@') || email.len() < 3 {
            return Err(SathiError::Auth("Please enter a valid email address.".into()));
        }
        if password.len() < 6 {
            return Err(SathiError::Auth(
                "Password should be at least 6 characters.".into(),
            ));
        }

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            email: email.to_string(),
            role,
            verified: true,
            created_at: epoch_secs() as i64,
        };
        let salt = generate_salt();
        let password_hash = hash_password(password, &salt);

        {
            let conn = self.conn.lock();
            let result = conn.execute(
                "INSERT INTO users (id, name, email, role, verified, password_hash, salt, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    user.id,
                    user.name,
                    user.email,
                    user.role.as_str(),
                    user.verified as i64,
                    password_hash,
                    salt,
                    user.created_at,
                ],
            );
            match result {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    return Err(SathiError::Auth("This email is already registered.".into()));
                }
                Err(e) => return Err(e.into()),
            }
        }

        let token = self.create_session(&user.id)?;
        tracing::info!(user_id = %user.id, role = user.role.as_str(), "User registered");
        Ok((user, token))
    }

    /// Authenticate by email + password and open a fresh session.
    pub fn login(&self, email: &str, password: &str) -> Result<(User, String), SathiError> {
        let row = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT id, name, email, role, verified, password_hash, salt, created_at
                 FROM users WHERE email = ?1 COLLATE NOCASE",
                rusqlite::params![email.trim()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, i64>(7)?,
                    ))
                },
            )
        };

        match row {
            Ok((id, name, email, role, verified, stored_hash, salt, created_at)) => {
                let attempt_hash = hash_password(password, &salt);
                if !constant_time_eq(stored_hash.as_bytes(), attempt_hash.as_bytes()) {
                    return Err(SathiError::Auth("Invalid email or password.".into()));
                }
                let user = User {
                    id,
                    name,
                    email,
                    role: UserRole::from_str_code(&role).unwrap_or(UserRole::User),
                    verified: verified != 0,
                    created_at,
                };
                let token = self.create_session(&user.id)?;
                tracing::info!(user_id = %user.id, "User logged in");
                Ok((user, token))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                // Dummy hash to prevent a timing side-channel
                let _ = hash_password(password, "0000000000000000");
                Err(SathiError::Auth("Invalid email or password.".into()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Revoke a session token. Unknown tokens are not an error.
    pub fn logout(&self, token: &str) -> Result<(), SathiError> {
        let token_hash = hash_token(token);
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM sessions WHERE token_hash = ?1",
            rusqlite::params![token_hash],
        )?;
        Ok(())
    }

    /// Resolve a session token to its user, if valid and unexpired.
    pub fn validate(&self, token: &str) -> Option<User> {
        let token_hash = hash_token(token);
        let now = epoch_secs() as i64;

        let conn = self.conn.lock();
        conn.query_row(
            "SELECT u.id, u.name, u.email, u.role, u.verified, u.created_at
             FROM sessions s JOIN users u ON s.user_id = u.id
             WHERE s.token_hash = ?1 AND s.expires_at > ?2",
            rusqlite::params![token_hash, now],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    email: row.get(2)?,
                    role: UserRole::from_str_code(&row.get::<_, String>(3)?)
                        .unwrap_or(UserRole::User),
                    verified: row.get::<_, i64>(4)? != 0,
                    created_at: row.get(5)?,
                })
            },
        )
        .ok()
    }

    /// Clean up expired sessions.
    pub fn cleanup_expired_sessions(&self) -> Result<u64, SathiError> {
        let now = epoch_secs() as i64;
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE expires_at <= ?1",
            rusqlite::params![now],
        )?;
        Ok(deleted as u64)
    }

    fn create_session(&self, user_id: &str) -> Result<String, SathiError> {
        let token = generate_token();
        let token_hash = hash_token(&token);
        let now = epoch_secs();
        let expires_at = now + self.session_ttl_secs;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (token_hash, user_id, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![token_hash, user_id, now as i64, expires_at as i64],
        )?;
        Ok(token)
    }
}

// ── Cryptographic helpers ──────────────────────────────────────────

/// Generate a random salt (hex-encoded).
fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a random session token (hex-encoded).
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a password with salt using iterated SHA-256.
fn hash_password(password: &str, salt: &str) -> String {
    let mut hash = Sha256::new();
    hash.update(salt.as_bytes());
    hash.update(password.as_bytes());
    let mut result = hash.finalize();

    // Iterated hashing for key stretching
    for _ in 1..HASH_ITERATIONS {
        let mut h = Sha256::new();
        h.update(result);
        h.update(salt.as_bytes());
        result = h.finalize();
    }

    hex::encode(result)
}

/// Hash a session token (single pass — tokens are already high-entropy).
fn hash_token(token: &str) -> String {
    let mut h = Sha256::new();
    h.update(token.as_bytes());
    hex::encode(h.finalize())
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, AuthStore) {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("identity.db");
        let store = AuthStore::new(&db_path, Some(3600)).unwrap();
        (tmp, store)
    }

    #[test]
    fn register_then_login() {
        let (_tmp, store) = test_store();

        let (user, token) = store
            .register("Asha", "asha@example.com", "secret123", UserRole::User)
            .unwrap();
        assert!(!token.is_empty());
        assert_eq!(user.name, "Asha");
        assert!(user.verified);

        let (logged_in, token2) = store.login("asha@example.com", "secret123").unwrap();
        assert_eq!(logged_in.id, user.id);
        assert_ne!(token, token2, "each login issues a fresh token");
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let (_tmp, store) = test_store();

        store
            .register("Asha", "asha@example.com", "secret123", UserRole::User)
            .unwrap();
        let result = store.register("Other", "ASHA@example.com", "password1", UserRole::User);
        match result {
            Err(SathiError::Auth(msg)) => assert!(msg.contains("already registered")),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[test]
    fn wrong_password_is_rejected() {
        let (_tmp, store) = test_store();

        store
            .register("Asha", "asha@example.com", "secret123", UserRole::User)
            .unwrap();
        let result = store.login("asha@example.com", "wrong");
        match result {
            Err(SathiError::Auth(msg)) => assert!(msg.contains("Invalid email or password")),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_email_gets_the_same_message() {
        let (_tmp, store) = test_store();
        let result = store.login("ghost@example.com", "whatever1");
        match result {
            Err(SathiError::Auth(msg)) => assert!(msg.contains("Invalid email or password")),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[test]
    fn short_password_is_rejected() {
        let (_tmp, store) = test_store();
        let result = store.register("Asha", "asha@example.com", "short", UserRole::User);
        match result {
            Err(SathiError::Auth(msg)) => assert!(msg.contains("6 characters")),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[test]
    fn invalid_email_is_rejected() {
        let (_tmp, store) = test_store();
        assert!(store
            .register("Asha", "not-an-email", "secret123", UserRole::User)
            .is_err());
    }

    #[test]
    fn token_validates_until_logout() {
        let (_tmp, store) = test_store();

        let (user, token) = store
            .register("Asha", "asha@example.com", "secret123", UserRole::Lawyer)
            .unwrap();

        let resolved = store.validate(&token).unwrap();
        assert_eq!(resolved.id, user.id);
        assert_eq!(resolved.role, UserRole::Lawyer);

        store.logout(&token).unwrap();
        assert!(store.validate(&token).is_none());

        // Logging out twice is fine.
        store.logout(&token).unwrap();
    }

    #[test]
    fn expired_sessions_do_not_validate() {
        let tmp = TempDir::new().unwrap();
        let store = AuthStore::new(&tmp.path().join("identity.db"), Some(0)).unwrap();

        let (_user, token) = store
            .register("Asha", "asha@example.com", "secret123", UserRole::User)
            .unwrap();
        assert!(store.validate(&token).is_none());
        assert_eq!(store.cleanup_expired_sessions().unwrap(), 1);
    }

    #[test]
    fn role_codes_round_trip() {
        for role in [UserRole::User, UserRole::Lawyer, UserRole::Admin] {
            assert_eq!(UserRole::from_str_code(role.as_str()), Some(role));
        }
        assert_eq!(UserRole::from_str_code("judge"), None);
    }
}
