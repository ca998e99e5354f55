//! Admin Credential Gate
//!
//! Verifies the administrator password before any policy disclosure or change.
//!
//! Both the supplied and the configured secret are hashed with SHA-256 and the
//! digests compared with `subtle`, so neither the length nor a matching prefix
//! of the secret shows up in comparison timing. Failed attempts are counted in
//! metrics but not throttled here.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::metrics;

/// Validates an administrator credential against a server-held secret
#[derive(Clone)]
pub struct AdminAuthGate {
    /// SHA-256 of the configured secret (None = admin access disabled)
    secret_digest: Option<[u8; 32]>,
}

impl std::fmt::Debug for AdminAuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminAuthGate")
            .field("configured", &self.secret_digest.is_some())
            .finish()
    }
}

impl AdminAuthGate {
    /// Gate accepting exactly `secret`.
    ///
    /// An empty secret disables admin access, same as [`AdminAuthGate::disabled`].
    pub fn new(secret: impl AsRef<str>) -> Self {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Self::disabled();
        }
        Self {
            secret_digest: Some(digest(secret)),
        }
    }

    /// Gate that rejects every credential
    pub fn disabled() -> Self {
        Self {
            secret_digest: None,
        }
    }

    /// Build from an optional configured password
    pub fn from_config(password: Option<&str>) -> Self {
        match password {
            Some(p) => Self::new(p),
            None => Self::disabled(),
        }
    }

    /// Whether a secret is configured at all
    pub fn is_enabled(&self) -> bool {
        self.secret_digest.is_some()
    }

    /// Check a supplied credential in constant time
    pub fn verify(&self, supplied: &str) -> bool {
        let supplied_digest = digest(supplied);
        let ok = match &self.secret_digest {
            Some(expected) => bool::from(expected[..].ct_eq(&supplied_digest[..])),
            None => false,
        };

        if !ok {
            metrics::ADMIN_AUTH_FAILURES_TOTAL.inc();
            warn!("Rejected admin credential");
        }
        ok
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_correct_password() {
        let gate = AdminAuthGate::new("hunter2");
        assert!(gate.is_enabled());
        assert!(gate.verify("hunter2"));
    }

    #[test]
    fn test_verify_rejects_wrong_password() {
        let gate = AdminAuthGate::new("hunter2");
        assert!(!gate.verify("hunter3"));
        assert!(!gate.verify("hunter"));
        assert!(!gate.verify("hunter22"));
        assert!(!gate.verify(""));
        assert!(!gate.verify("HUNTER2"));
    }

    #[test]
    fn test_disabled_gate_rejects_everything() {
        let gate = AdminAuthGate::disabled();
        assert!(!gate.is_enabled());
        assert!(!gate.verify(""));
        assert!(!gate.verify("anything"));
    }

    #[test]
    fn test_empty_secret_disables() {
        let gate = AdminAuthGate::new("");
        assert!(!gate.is_enabled());
        assert!(!gate.verify(""));
    }

    #[test]
    fn test_from_config() {
        assert!(AdminAuthGate::from_config(Some("pw")).verify("pw"));
        assert!(!AdminAuthGate::from_config(None).is_enabled());
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let gate = AdminAuthGate::new("super-secret-value");
        let rendered = format!("{:?}", gate);
        assert!(!rendered.contains("super-secret-value"));
        assert!(rendered.contains("configured: true"));
    }
}
