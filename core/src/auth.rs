//! Credential sign-up/sign-in and cookie sessions.
//!
//! Passwords are stored as argon2 PHC strings. Session tokens are 32 random
//! bytes, hex-encoded; only their SHA-256 digest is persisted.

use std::fmt::{self, Write};
use std::sync::LazyLock;

use anyhow::anyhow;
use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::db::Database;
use crate::models::{
    ClientInfo, Session, SessionContext, User, validate_email, validate_password,
};

pub use crate::models::password_issues;

pub const DEFAULT_SESSION_DAYS: i64 = 7;

const MAX_FAILED_ATTEMPTS: i64 = 5;
const LOCKOUT_WINDOW_MINUTES: i64 = 15;

#[derive(Debug)]
pub enum AuthError {
    /// Unknown email or wrong password. Deliberately does not say which.
    InvalidCredentials,
    EmailTaken,
    RateLimited,
    Invalid(String),
    Internal(anyhow::Error),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCredentials => write!(f, "Invalid email or password"),
            Self::EmailTaken => write!(f, "An account with this email already exists"),
            Self::RateLimited => write!(f, "Too many failed sign-in attempts. Try again later"),
            Self::Invalid(msg) => write!(f, "{msg}"),
            Self::Internal(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<anyhow::Error> for AuthError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e)
    }
}

/// A freshly issued session. `token` is the only copy of the raw secret.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub session: Session,
    pub user: User,
}

#[derive(Debug, Clone)]
pub struct SignUp {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
}

fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut acc, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        })
}

fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    to_hex(&bytes)
}

#[must_use]
pub fn hash_token(token: &str) -> String {
    to_hex(&Sha256::digest(token.as_bytes()))
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow!("Failed to hash password: {e}"))
}

#[must_use]
pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

fn device_fingerprint(client: &ClientInfo) -> Option<String> {
    client
        .user_agent
        .as_deref()
        .filter(|ua| !ua.trim().is_empty())
        .map(|ua| to_hex(&Sha256::digest(ua.as_bytes())))
}

fn issue_session(
    db: &Database,
    user: User,
    client: &ClientInfo,
    ttl: Duration,
) -> anyhow::Result<IssuedSession> {
    let token = generate_token();
    let session = db.insert_session(&user.id, &hash_token(&token), Utc::now() + ttl, client)?;
    Ok(IssuedSession {
        token,
        session,
        user,
    })
}

/// Sign-up input that passed validation while the email was still free.
#[derive(Debug, Clone)]
pub struct PendingSignUp {
    pub email: String,
    pub name: String,
}

/// First half of sign-up: validate and check the email. Hash the password
/// without holding the database, then call [`finish_sign_up`].
pub fn prepare_sign_up(db: &Database, req: &SignUp) -> Result<PendingSignUp, AuthError> {
    let email = validate_email(&req.email).map_err(|e| AuthError::Invalid(e.to_string()))?;
    validate_password(&req.password).map_err(|e| AuthError::Invalid(e.to_string()))?;
    let name = match req.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => email.split('@').next().unwrap_or_default().to_string(),
    };

    if db.email_exists(&email)? {
        return Err(AuthError::EmailTaken);
    }
    Ok(PendingSignUp { email, name })
}

pub fn finish_sign_up(
    db: &Database,
    pending: PendingSignUp,
    password_hash: &str,
    client: &ClientInfo,
    ttl: Duration,
) -> Result<IssuedSession, AuthError> {
    // The email may have been registered while the password was hashed
    if db.email_exists(&pending.email)? {
        return Err(AuthError::EmailTaken);
    }
    let user = db.create_user(&pending.email, &pending.name, password_hash)?;
    if let Some(fingerprint) = device_fingerprint(client) {
        db.touch_device(&user.id, &fingerprint, client.user_agent.as_deref())?;
    }
    db.append_audit_log(Some(&user.id), "sign_up", client, None)?;
    tracing::info!(user_id = %user.id, "user signed up");

    Ok(issue_session(db, user, client, ttl)?)
}

pub fn sign_up(
    db: &Database,
    req: &SignUp,
    client: &ClientInfo,
    ttl: Duration,
) -> Result<IssuedSession, AuthError> {
    let pending = prepare_sign_up(db, req)?;
    let hash = hash_password(&req.password)?;
    finish_sign_up(db, pending, &hash, client, ttl)
}

static DUMMY_HASH: LazyLock<String> =
    LazyLock::new(|| hash_password("nutricoach-unknown-account").unwrap_or_default());

/// Stored credentials looked up for a sign-in. [`SignInAttempt::check`] needs
/// no database access.
#[derive(Debug, Clone)]
pub struct SignInAttempt {
    email: String,
    user: Option<User>,
    password_hash: Option<String>,
}

impl SignInAttempt {
    /// Unknown emails are verified against a fixed hash, so both outcomes
    /// cost one argon2 verification.
    #[must_use]
    pub fn check(&self, password: &str) -> bool {
        match &self.password_hash {
            Some(hash) => verify_password(password, hash),
            None => {
                let _ = verify_password(password, DUMMY_HASH.as_str());
                false
            }
        }
    }
}

/// First half of sign-in: rate limit and credential lookup.
pub fn begin_sign_in(db: &Database, email: &str) -> Result<SignInAttempt, AuthError> {
    let email = email.trim().to_lowercase();
    let window_start = Utc::now() - Duration::minutes(LOCKOUT_WINDOW_MINUTES);
    if db.count_failed_logins_since(&email, window_start)? >= MAX_FAILED_ATTEMPTS {
        tracing::warn!(%email, "sign-in rate limited");
        return Err(AuthError::RateLimited);
    }

    let user = db.get_user_by_email(&email)?;
    let password_hash = match user {
        Some(ref u) => db.get_password_hash(&u.id)?,
        None => None,
    };
    Ok(SignInAttempt {
        email,
        user,
        password_hash,
    })
}

/// Record the outcome of [`SignInAttempt::check`] and issue a session on success.
pub fn finish_sign_in(
    db: &Database,
    attempt: SignInAttempt,
    verified: bool,
    client: &ClientInfo,
    ttl: Duration,
) -> Result<IssuedSession, AuthError> {
    let SignInAttempt { email, user, .. } = attempt;
    let user = match user {
        Some(user) if verified => user,
        other => {
            db.record_login_attempt(&email, false, client.ip_address.as_deref())?;
            let user_id = other.map(|u| u.id);
            db.append_audit_log(
                user_id.as_deref(),
                "sign_in_failed",
                client,
                Some(&serde_json::json!({ "email": email })),
            )?;
            tracing::info!(%email, "sign-in failed");
            return Err(AuthError::InvalidCredentials);
        }
    };

    db.record_login_attempt(&email, true, client.ip_address.as_deref())?;
    let expired = db.delete_expired_sessions(Utc::now())?;
    if expired > 0 {
        tracing::debug!(expired, "purged expired sessions");
    }

    if let Some(fingerprint) = device_fingerprint(client) {
        if db.touch_device(&user.id, &fingerprint, client.user_agent.as_deref())? {
            db.append_audit_log(Some(&user.id), "new_device", client, None)?;
        }
    }
    db.append_audit_log(Some(&user.id), "sign_in", client, None)?;
    tracing::info!(user_id = %user.id, "user signed in");

    Ok(issue_session(db, user, client, ttl)?)
}

pub fn sign_in(
    db: &Database,
    email: &str,
    password: &str,
    client: &ClientInfo,
    ttl: Duration,
) -> Result<IssuedSession, AuthError> {
    let attempt = begin_sign_in(db, email)?;
    let verified = attempt.check(password);
    finish_sign_in(db, attempt, verified, client, ttl)
}

/// Look up the session for a raw token. Expired sessions are removed and
/// reported as absent.
pub fn resolve_session(
    db: &Database,
    token: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<Option<SessionContext>> {
    let Some(session) = db.find_session_by_token_hash(&hash_token(token))? else {
        return Ok(None);
    };
    let expired = DateTime::parse_from_rfc3339(&session.expires_at)
        .map_or(true, |expires| expires.with_timezone(&Utc) <= now);
    if expired {
        db.delete_session(&session.id)?;
        return Ok(None);
    }
    let Some(user) = db.get_user(&session.user_id)? else {
        return Ok(None);
    };
    Ok(Some(SessionContext { session, user }))
}

pub fn sign_out(db: &Database, token: &str, client: &ClientInfo) -> anyhow::Result<bool> {
    let Some(session) = db.find_session_by_token_hash(&hash_token(token))? else {
        return Ok(false);
    };
    db.delete_session(&session.id)?;
    db.append_audit_log(Some(&session.user_id), "sign_out", client, None)?;
    Ok(true)
}

/// Delete the user and everything they own. The audit entry outlives the user
/// with a null user id.
pub fn delete_account(db: &Database, user: &User, client: &ClientInfo) -> anyhow::Result<bool> {
    db.append_audit_log(
        Some(&user.id),
        "account_deleted",
        client,
        Some(&serde_json::json!({ "email": user.email })),
    )?;
    let deleted = db.delete_user(&user.id)?;
    if deleted {
        tracing::info!(user_id = %user.id, "account deleted");
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ttl() -> Duration {
        Duration::days(DEFAULT_SESSION_DAYS)
    }

    fn client() -> ClientInfo {
        ClientInfo {
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: Some("Mozilla/5.0 test".to_string()),
        }
    }

    fn signup(email: &str) -> SignUp {
        SignUp {
            email: email.to_string(),
            password: "correct-horse-1".to_string(),
            name: Some("Alice".to_string()),
        }
    }

    #[test]
    fn test_hash_and_verify_password() {
        let hash = hash_password("hunter22").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "not-a-phc-string"));
    }

    #[test]
    fn test_token_hash_is_hex_sha256() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert_ne!(token, generate_token());
        let digest = hash_token(&token);
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, hash_token(&token));
    }

    #[test]
    fn test_sign_up_issues_session() {
        let db = Database::open_in_memory().unwrap();
        let issued = sign_up(&db, &signup(" Alice@Example.com "), &client(), ttl()).unwrap();
        assert_eq!(issued.user.email, "alice@example.com");
        assert_eq!(issued.user.name, "Alice");

        let ctx = resolve_session(&db, &issued.token, Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(ctx.user.id, issued.user.id);
        assert_eq!(ctx.session.ip_address.as_deref(), Some("10.0.0.1"));

        let logs = db.list_audit_logs(&issued.user.id, 10).unwrap();
        assert!(logs.iter().any(|l| l.event == "sign_up"));
    }

    #[test]
    fn test_sign_up_default_name_from_email() {
        let db = Database::open_in_memory().unwrap();
        let req = SignUp {
            name: None,
            ..signup("carol@example.com")
        };
        let issued = sign_up(&db, &req, &ClientInfo::default(), ttl()).unwrap();
        assert_eq!(issued.user.name, "carol");
    }

    #[test]
    fn test_sign_up_duplicate_email() {
        let db = Database::open_in_memory().unwrap();
        sign_up(&db, &signup("alice@example.com"), &client(), ttl()).unwrap();
        let err = sign_up(&db, &signup("ALICE@example.com"), &client(), ttl()).unwrap_err();
        assert!(matches!(err, AuthError::EmailTaken));
    }

    #[test]
    fn test_sign_up_weak_password() {
        let db = Database::open_in_memory().unwrap();
        let req = SignUp {
            password: "password".to_string(),
            ..signup("alice@example.com")
        };
        let err = sign_up(&db, &req, &client(), ttl()).unwrap_err();
        assert!(matches!(err, AuthError::Invalid(_)));
        assert!(!db.email_exists("alice@example.com").unwrap());
    }

    #[test]
    fn test_sign_in_success_and_failure() {
        let db = Database::open_in_memory().unwrap();
        sign_up(&db, &signup("alice@example.com"), &client(), ttl()).unwrap();

        let issued = sign_in(&db, "alice@example.com", "correct-horse-1", &client(), ttl()).unwrap();
        assert!(
            resolve_session(&db, &issued.token, Utc::now())
                .unwrap()
                .is_some()
        );

        let err = sign_in(&db, "alice@example.com", "wrong-horse-1", &client(), ttl()).unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        let err = sign_in(&db, "nobody@example.com", "whatever-1", &client(), ttl()).unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        let events: Vec<String> = db
            .list_audit_logs(&issued.user.id, 10)
            .unwrap()
            .into_iter()
            .map(|l| l.event)
            .collect();
        assert!(events.contains(&"sign_in".to_string()));
        assert!(events.contains(&"sign_in_failed".to_string()));
    }

    #[test]
    fn test_sign_up_in_phases_rechecks_email() {
        let db = Database::open_in_memory().unwrap();
        let req = signup("alice@example.com");
        let pending = prepare_sign_up(&db, &req).unwrap();
        assert_eq!(pending.name, "Alice");
        let hash = hash_password(&req.password).unwrap();

        // Registered by someone else between the two phases
        sign_up(&db, &signup("alice@example.com"), &client(), ttl()).unwrap();
        let err = finish_sign_up(&db, pending, &hash, &client(), ttl()).unwrap_err();
        assert!(matches!(err, AuthError::EmailTaken));

        let pending = prepare_sign_up(&db, &signup("bob@example.com")).unwrap();
        let issued = finish_sign_up(&db, pending, &hash, &client(), ttl()).unwrap();
        assert_eq!(issued.user.email, "bob@example.com");
        assert!(sign_in(&db, "bob@example.com", "correct-horse-1", &client(), ttl()).is_ok());
    }

    #[test]
    fn test_unknown_email_checked_against_dummy_hash() {
        let db = Database::open_in_memory().unwrap();
        assert!(DUMMY_HASH.starts_with("$argon2"));

        let attempt = begin_sign_in(&db, " Nobody@Example.com ").unwrap();
        assert!(attempt.user.is_none());
        assert!(attempt.password_hash.is_none());
        assert!(!attempt.check("nutricoach-unknown-account"));

        let err = finish_sign_in(&db, attempt, true, &client(), ttl()).unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        let since = Utc::now() - Duration::minutes(1);
        assert_eq!(db.count_failed_logins_since("nobody@example.com", since).unwrap(), 1);
    }

    #[test]
    fn test_sign_in_phases_record_outcome() {
        let db = Database::open_in_memory().unwrap();
        sign_up(&db, &signup("alice@example.com"), &client(), ttl()).unwrap();

        let attempt = begin_sign_in(&db, "alice@example.com").unwrap();
        assert!(attempt.check("correct-horse-1"));
        assert!(!attempt.check("wrong-horse-1"));

        let err = finish_sign_in(&db, attempt.clone(), false, &client(), ttl()).unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        let issued = finish_sign_in(&db, attempt, true, &client(), ttl()).unwrap();
        assert_eq!(issued.user.email, "alice@example.com");
    }

    #[test]
    fn test_sign_in_new_device_audited_once() {
        let db = Database::open_in_memory().unwrap();
        let issued = sign_up(&db, &signup("alice@example.com"), &client(), ttl()).unwrap();
        let other = ClientInfo {
            ip_address: None,
            user_agent: Some("PhoneApp/1.0".to_string()),
        };
        sign_in(&db, "alice@example.com", "correct-horse-1", &other, ttl()).unwrap();
        sign_in(&db, "alice@example.com", "correct-horse-1", &other, ttl()).unwrap();
        sign_in(&db, "alice@example.com", "correct-horse-1", &client(), ttl()).unwrap();

        let new_devices = db
            .list_audit_logs(&issued.user.id, 50)
            .unwrap()
            .into_iter()
            .filter(|l| l.event == "new_device")
            .count();
        assert_eq!(new_devices, 1);
    }

    #[test]
    fn test_sign_in_rate_limited() {
        let db = Database::open_in_memory().unwrap();
        sign_up(&db, &signup("alice@example.com"), &client(), ttl()).unwrap();
        for _ in 0..MAX_FAILED_ATTEMPTS {
            let err = sign_in(&db, "alice@example.com", "wrong-pass-1", &client(), ttl()).unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials));
        }
        let err = sign_in(&db, "alice@example.com", "correct-horse-1", &client(), ttl()).unwrap_err();
        assert!(matches!(err, AuthError::RateLimited));
    }

    #[test]
    fn test_expired_session_is_removed() {
        let db = Database::open_in_memory().unwrap();
        let issued = sign_up(&db, &signup("alice@example.com"), &client(), ttl()).unwrap();
        let later = Utc::now() + Duration::days(DEFAULT_SESSION_DAYS + 1);
        assert!(resolve_session(&db, &issued.token, later).unwrap().is_none());
        assert!(
            resolve_session(&db, &issued.token, Utc::now())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_unknown_token_resolves_to_none() {
        let db = Database::open_in_memory().unwrap();
        assert!(resolve_session(&db, "deadbeef", Utc::now()).unwrap().is_none());
    }

    #[test]
    fn test_sign_out() {
        let db = Database::open_in_memory().unwrap();
        let issued = sign_up(&db, &signup("alice@example.com"), &client(), ttl()).unwrap();
        assert!(sign_out(&db, &issued.token, &client()).unwrap());
        assert!(
            resolve_session(&db, &issued.token, Utc::now())
                .unwrap()
                .is_none()
        );
        assert!(!sign_out(&db, &issued.token, &client()).unwrap());
    }

    #[test]
    fn test_delete_account_removes_sessions() {
        let db = Database::open_in_memory().unwrap();
        let issued = sign_up(&db, &signup("alice@example.com"), &client(), ttl()).unwrap();
        assert!(delete_account(&db, &issued.user, &client()).unwrap());
        assert!(
            resolve_session(&db, &issued.token, Utc::now())
                .unwrap()
                .is_none()
        );
        assert!(!db.email_exists("alice@example.com").unwrap());
        let err = sign_in(&db, "alice@example.com", "correct-horse-1", &client(), ttl()).unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }
}
