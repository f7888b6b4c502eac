//! Identity glue: registration, login and bearer-token verification
//!
//! The trading core never sees credentials; it receives a verified account
//! id from `verify`. Passwords are stored as argon2id hashes, tokens are
//! HMAC-SHA256 signed with a per-data-dir secret and expire after 24 hours.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use rust_decimal::Decimal;
use sha2::Sha256;
use thiserror::Error;
use tracing::info;

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use crate::core::portfolio::types::Account;
use crate::data_paths::DataPaths;
use crate::ledger::{AccountCf, Credential, CredentialCf, LedgerError, LedgerStore};

type HmacSha256 = Hmac<Sha256>;

/// Token lifetime, matching the session length of the web client
pub const TOKEN_TTL_HOURS: i64 = 24;

/// Minimum accepted password length
pub const MIN_PASSWORD_LEN: usize = 6;

const SECRET_FILE: &str = "token.secret";
const SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("username and password are required")]
    MissingCredentials,
    #[error("password must be at least {MIN_PASSWORD_LEN} characters")]
    PasswordTooShort,
    #[error("invalid username: {0}")]
    InvalidUsername(String),
    #[error("username already exists")]
    UsernameTaken,
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("invalid or expired token")]
    Unauthenticated,
    #[error("storage error: {0}")]
    Storage(#[from] LedgerError),
    #[error("hashing error: {0}")]
    Hash(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A successful registration or login
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: String,
    pub account: Account,
}

pub struct AuthService {
    ledger: Arc<LedgerStore>,
    secret: Vec<u8>,
    starting_balance: Decimal,
    // Registration is rare; one lock covers the check-then-create race
    register_lock: tokio::sync::Mutex<()>,
}

impl AuthService {
    pub fn new(ledger: Arc<LedgerStore>, secret: Vec<u8>, starting_balance: Decimal) -> Self {
        Self {
            ledger,
            secret,
            starting_balance,
            register_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Load the token-signing secret from the auth directory, generating a
    /// fresh one on first run.
    pub fn load_or_create_secret(data_paths: &DataPaths) -> Result<Vec<u8>, AuthError> {
        let path = data_paths.auth().join(SECRET_FILE);
        if path.exists() {
            let secret = std::fs::read(&path)?;
            if secret.len() == SECRET_LEN {
                return Ok(secret);
            }
        }

        let mut secret = vec![0u8; SECRET_LEN];
        rand::rng().fill(&mut secret[..]);
        std::fs::write(&path, &secret)?;
        info!(path = %path.display(), "Generated token secret");
        Ok(secret)
    }

    /// Create a new account with the starting balance and issue a token.
    pub async fn register(&self, username: &str, password: &str) -> Result<AuthSession, AuthError> {
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::PasswordTooShort);
        }
        validate_username(username)?;

        let _guard = self.register_lock.lock().await;

        if self.ledger.account_exists(username)? {
            return Err(AuthError::UsernameTaken);
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::Hash(e.to_string()))?
            .to_string();

        let now = Utc::now();
        let account = Account {
            id: username.to_string(),
            balance: self.starting_balance,
            created_at: now,
        };
        let credential = Credential {
            account: username.to_string(),
            password_hash,
            created_at: now,
        };

        self.ledger.apply(|batch| {
            batch.put::<AccountCf>(&account.id, &account)?;
            batch.put::<CredentialCf>(&credential.account, &credential)
        })?;

        info!(account = %username, "Account registered");

        Ok(AuthSession {
            token: self.issue_token(username, Utc::now() + Duration::hours(TOKEN_TTL_HOURS))?,
            account,
        })
    }

    /// Verify a password and issue a token.
    pub async fn login(&self, username: &str, password: &str) -> Result<AuthSession, AuthError> {
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let credential = self
            .ledger
            .credential(username)?
            .ok_or(AuthError::InvalidCredentials)?;

        let parsed = PasswordHash::new(&credential.password_hash)
            .map_err(|e| AuthError::Hash(e.to_string()))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| AuthError::InvalidCredentials)?;

        let account = self
            .ledger
            .account(username)?
            .ok_or(AuthError::InvalidCredentials)?;

        info!(account = %username, "Login succeeded");

        Ok(AuthSession {
            token: self.issue_token(username, Utc::now() + Duration::hours(TOKEN_TTL_HOURS))?,
            account,
        })
    }

    /// Verify a bearer token and return the account id it names.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        let mut parts = token.splitn(3, '.');
        let (Some(username), Some(expiry), Some(signature)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::Unauthenticated);
        };

        let expiry_ts: i64 = expiry.parse().map_err(|_| AuthError::Unauthenticated)?;
        if expiry_ts < Utc::now().timestamp() {
            return Err(AuthError::Unauthenticated);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| AuthError::Unauthenticated)?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AuthError::Hash(e.to_string()))?;
        mac.update(format!("{username}.{expiry}").as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::Unauthenticated)?;

        Ok(username.to_string())
    }

    fn issue_token(
        &self,
        username: &str,
        expires_at: chrono::DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let expiry = expires_at.timestamp();
        let payload = format!("{username}.{expiry}");

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AuthError::Hash(e.to_string()))?;
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{payload}.{signature}"))
    }
}

/// Usernames end up inside composite ledger keys, so the charset is
/// restricted to ASCII alphanumerics, '_' and '-'.
fn validate_username(username: &str) -> Result<(), AuthError> {
    if username.len() > 64 {
        return Err(AuthError::InvalidUsername("too long".into()));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(AuthError::InvalidUsername(
            "only letters, digits, '_' and '-' are allowed".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<LedgerStore>, AuthService) {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(LedgerStore::open(dir.path().join("ledger")).unwrap());
        let auth = AuthService::new(Arc::clone(&ledger), vec![7u8; 32], dec!(10000.00));
        (dir, ledger, auth)
    }

    #[tokio::test]
    async fn test_register_login_verify_roundtrip() {
        let (_dir, ledger, auth) = setup();

        let session = auth.register("alice", "hunter22").await.unwrap();
        assert_eq!(session.account.balance, dec!(10000.00));
        assert_eq!(auth.verify(&session.token).unwrap(), "alice");

        let login = auth.login("alice", "hunter22").await.unwrap();
        assert_eq!(auth.verify(&login.token).unwrap(), "alice");

        assert!(ledger.account("alice").unwrap().is_some());
        assert!(ledger.credential("alice").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let (_dir, _ledger, auth) = setup();
        auth.register("alice", "hunter22").await.unwrap();

        let err = auth.register("alice", "other-pass").await.unwrap_err();
        assert!(matches!(err, AuthError::UsernameTaken));
    }

    #[tokio::test]
    async fn test_password_rules() {
        let (_dir, _ledger, auth) = setup();

        assert!(matches!(
            auth.register("alice", "short").await.unwrap_err(),
            AuthError::PasswordTooShort
        ));
        assert!(matches!(
            auth.register("", "hunter22").await.unwrap_err(),
            AuthError::MissingCredentials
        ));
        assert!(matches!(
            auth.register("al ice", "hunter22").await.unwrap_err(),
            AuthError::InvalidUsername(_)
        ));
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let (_dir, _ledger, auth) = setup();
        auth.register("alice", "hunter22").await.unwrap();

        let err = auth.login("alice", "wrong-pass").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        let err = auth.login("nobody", "hunter22").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_forged_and_expired_tokens_rejected() {
        let (_dir, _ledger, auth) = setup();
        let session = auth.register("alice", "hunter22").await.unwrap();

        // Tampered signature
        let mut forged = session.token.clone();
        forged.pop();
        forged.push('x');
        assert!(matches!(
            auth.verify(&forged).unwrap_err(),
            AuthError::Unauthenticated
        ));

        // Claiming a different user under the old signature
        let reused = session.token.replacen("alice", "bob", 1);
        assert!(matches!(
            auth.verify(&reused).unwrap_err(),
            AuthError::Unauthenticated
        ));

        // Properly signed but already expired
        let expired = auth
            .issue_token("alice", Utc::now() - Duration::hours(1))
            .unwrap();
        assert!(matches!(
            auth.verify(&expired).unwrap_err(),
            AuthError::Unauthenticated
        ));

        assert!(matches!(
            auth.verify("garbage").unwrap_err(),
            AuthError::Unauthenticated
        ));
    }

    #[test]
    fn test_secret_persisted_across_loads() {
        let dir = TempDir::new().unwrap();
        let paths = DataPaths::new(dir.path());
        paths.ensure_directories().unwrap();

        let first = AuthService::load_or_create_secret(&paths).unwrap();
        let second = AuthService::load_or_create_secret(&paths).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), SECRET_LEN);
    }
}
