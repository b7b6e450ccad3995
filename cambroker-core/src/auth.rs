//! Credential checks consulted once per CONNECT

use alloc::string::String;

use log::warn;
use sha2::{Digest, Sha256};

/// Decides whether a CONNECT may proceed
pub trait Authenticator: Send + Sync {
    fn check(&self, username: Option<&str>, password: Option<&[u8]>) -> bool;
}

impl<F> Authenticator for F
where
    F: Fn(Option<&str>, Option<&[u8]>) -> bool + Send + Sync,
{
    fn check(&self, username: Option<&str>, password: Option<&[u8]>) -> bool {
        self(username, password)
    }
}

/// Accepts every client
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAnonymous;

impl Authenticator for AllowAnonymous {
    fn check(&self, _username: Option<&str>, _password: Option<&[u8]>) -> bool {
        true
    }
}

/// Lowercase hex SHA-256 of a password
pub fn password_hash(password: &[u8]) -> String {
    hex::encode(Sha256::digest(password))
}

/// A single configured user
///
/// The password is held only as a SHA-256 digest. With an empty username
/// no user is defined and every client is accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticCredentials {
    username: String,
    password_hash: String,
}

impl StaticCredentials {
    pub fn new(username: impl Into<String>, password: &[u8]) -> Self {
        StaticCredentials {
            username: username.into(),
            password_hash: password_hash(password),
        }
    }

    pub fn from_hash(username: impl Into<String>, password_hash: &str) -> Self {
        StaticCredentials {
            username: username.into(),
            password_hash: password_hash.trim().to_ascii_lowercase(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.username.is_empty()
    }
}

impl Authenticator for StaticCredentials {
    fn check(&self, username: Option<&str>, password: Option<&[u8]>) -> bool {
        if self.is_open() {
            return true;
        }
        match username {
            Some(name) if name == self.username => {
                // A missing password is checked as an empty one
                if password_hash(password.unwrap_or_default()) == self.password_hash {
                    true
                } else {
                    warn!("Login failed, wrong password for user '{}'", name);
                    false
                }
            }
            Some(name) if !name.is_empty() => {
                warn!("Login failed, unknown user '{}'", name);
                false
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_DIGEST: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_password_hash_of_empty_input() {
        assert_eq!(password_hash(b""), EMPTY_DIGEST);
    }

    #[test]
    fn test_open_mode_accepts_everyone() {
        let credentials = StaticCredentials::new("", b"ignored");
        assert!(credentials.check(None, None));
        assert!(credentials.check(Some("anyone"), Some(&b"x"[..])));
    }

    #[test]
    fn test_configured_user() {
        let credentials = StaticCredentials::new("admin", b"secret");
        assert!(credentials.check(Some("admin"), Some(&b"secret"[..])));
        assert!(!credentials.check(Some("admin"), Some(&b"wrong"[..])));
        assert!(!credentials.check(Some("other"), Some(&b"secret"[..])));
        assert!(!credentials.check(None, None));
    }

    #[test]
    fn test_from_hash_matches_new() {
        let digest = password_hash(b"secret").to_ascii_uppercase();
        let credentials = StaticCredentials::from_hash("admin", &digest);
        assert_eq!(credentials, StaticCredentials::new("admin", b"secret"));
    }

    #[test]
    fn test_missing_password_is_empty() {
        let credentials = StaticCredentials::from_hash("admin", EMPTY_DIGEST);
        assert!(credentials.check(Some("admin"), None));
    }

    #[test]
    fn test_closure_authenticator() {
        let only_cam = |username: Option<&str>, _: Option<&[u8]>| username == Some("cam");
        assert!(only_cam.check(Some("cam"), None));
        assert!(!Authenticator::check(&only_cam, None, None));
        assert!(AllowAnonymous.check(None, None));
    }
}
