//! Configuration Service
//!
//! Boundary for reading and writing the upload policy. Every operation that
//! requires a credential goes through the [`AdminAuthGate`] before touching
//! the store.

use std::sync::Arc;
use tracing::info;

use super::auth::AdminAuthGate;
use super::policy::{PolicyDocument, PolicyError};
use super::store::{PolicyStore, StoreError};
use crate::metrics;

/// Errors surfaced by the configuration service
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Missing or wrong credential. Deliberately carries no detail.
    #[error("Unauthorized")]
    Unauthorized,

    /// Candidate policy rejected
    #[error(transparent)]
    Validation(#[from] PolicyError),

    /// Persistence failed
    #[error("{0}")]
    StoreUnavailable(String),
}

impl From<StoreError> for ConfigError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(e) => ConfigError::Validation(e),
            StoreError::Unavailable(msg) => ConfigError::StoreUnavailable(msg),
        }
    }
}

/// Serves authenticated policy reads and writes
#[derive(Debug, Clone)]
pub struct ConfigService {
    gate: AdminAuthGate,
    store: Arc<dyn PolicyStore>,
}

impl ConfigService {
    /// Create a service over `store` guarded by `gate`
    pub fn new(gate: AdminAuthGate, store: Arc<dyn PolicyStore>) -> Self {
        Self { gate, store }
    }

    /// Current policy, credential required
    pub async fn read_policy(&self, credential: &str) -> Result<PolicyDocument, ConfigError> {
        self.authorize(credential)?;
        self.current_policy().await
    }

    /// Current policy without a credential.
    ///
    /// Backs the unauthenticated read the admin panel performs before login;
    /// callers decide whether that exposure is enabled.
    pub async fn current_policy(&self) -> Result<PolicyDocument, ConfigError> {
        let policy = self.store.get().await?;
        Ok(PolicyDocument::from(policy))
    }

    /// Replace the policy, credential required.
    ///
    /// Extensions are normalized (trimmed, lowercased, blanks dropped,
    /// deduplicated) before validation. Returns the policy as stored.
    pub async fn write_policy(
        &self,
        credential: &str,
        candidate: PolicyDocument,
    ) -> Result<PolicyDocument, ConfigError> {
        self.authorize(credential)?;
        self.commit(candidate).await
    }

    /// Replace the policy from untyped JSON, credential required.
    ///
    /// The credential is checked before the body is parsed.
    pub async fn write_policy_json(
        &self,
        credential: &str,
        candidate: &serde_json::Value,
    ) -> Result<PolicyDocument, ConfigError> {
        self.authorize(credential)?;
        let document = PolicyDocument::from_json(candidate)?;
        self.commit(document).await
    }

    async fn commit(&self, candidate: PolicyDocument) -> Result<PolicyDocument, ConfigError> {
        let policy = candidate.into_policy()?;
        let stored = self.store.set(policy).await?;

        metrics::POLICY_UPDATES_TOTAL.inc();
        info!("Admin updated upload policy");
        Ok(PolicyDocument::from(stored))
    }

    fn authorize(&self, credential: &str) -> Result<(), ConfigError> {
        if self.gate.verify(credential) {
            Ok(())
        } else {
            Err(ConfigError::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::policy::Policy;
    use crate::rate_limit::store::JsonPolicyStore;
    use tempfile::TempDir;

    fn service_with(store: Arc<dyn PolicyStore>) -> ConfigService {
        ConfigService::new(AdminAuthGate::new("admin-pw"), store)
    }

    #[tokio::test]
    async fn test_read_requires_credential() {
        let service = service_with(Arc::new(JsonPolicyStore::in_memory()));

        assert!(matches!(
            service.read_policy("wrong").await,
            Err(ConfigError::Unauthorized)
        ));

        let doc = service.read_policy("admin-pw").await.unwrap();
        assert_eq!(doc, PolicyDocument::default());
    }

    #[tokio::test]
    async fn test_write_normalizes_extensions() {
        let store = Arc::new(JsonPolicyStore::in_memory());
        let service = service_with(store.clone());

        let candidate = PolicyDocument {
            max_uploads_per_minute: 10,
            blocked_extensions: vec![
                " EXE".to_string(),
                ".exe".to_string(),
                "".to_string(),
                "Bat".to_string(),
            ],
            ..PolicyDocument::default()
        };

        let stored = service.write_policy("admin-pw", candidate).await.unwrap();
        assert_eq!(stored.max_uploads_per_minute, 10);
        assert_eq!(stored.blocked_extensions, vec![".exe", ".bat"]);

        let policy = store.get().await.unwrap();
        assert_eq!(policy.blocked_extensions, vec![".exe", ".bat"]);
    }

    #[tokio::test]
    async fn test_wrong_credential_leaves_file_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("policy.json");
        let store = Arc::new(JsonPolicyStore::open(&path).unwrap());
        let service = service_with(store.clone());

        service
            .write_policy("admin-pw", PolicyDocument::default())
            .await
            .unwrap();
        let before = std::fs::read(&path).unwrap();

        let hostile = PolicyDocument {
            max_uploads_per_minute: 100_000,
            ..PolicyDocument::default()
        };
        let result = service.write_policy("guess", hostile).await;
        assert!(matches!(result, Err(ConfigError::Unauthorized)));

        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert_eq!(store.get().await.unwrap(), Policy::default());
    }

    #[tokio::test]
    async fn test_negative_field_is_validation_error() {
        let store = Arc::new(JsonPolicyStore::in_memory());
        let service = service_with(store.clone());

        let candidate = PolicyDocument {
            max_file_size: -1.0,
            ..PolicyDocument::default()
        };
        match service.write_policy("admin-pw", candidate).await {
            Err(ConfigError::Validation(e)) => assert_eq!(e.field, "maxFileSize"),
            other => panic!("expected validation error, got {:?}", other),
        }
        assert_eq!(store.get().await.unwrap(), Policy::default());
    }

    #[tokio::test]
    async fn test_credential_checked_before_validation() {
        let service = service_with(Arc::new(JsonPolicyStore::in_memory()));
        let candidate = PolicyDocument {
            max_uploads_per_hour: -1,
            ..PolicyDocument::default()
        };
        assert!(matches!(
            service.write_policy("nope", candidate).await,
            Err(ConfigError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_disabled_gate_blocks_writes() {
        let service = ConfigService::new(
            AdminAuthGate::disabled(),
            Arc::new(JsonPolicyStore::in_memory()),
        );
        assert!(matches!(
            service.write_policy("", PolicyDocument::default()).await,
            Err(ConfigError::Unauthorized)
        ));
        // Unauthenticated read still works
        assert!(service.current_policy().await.is_ok());
    }

    #[tokio::test]
    async fn test_json_write_checks_credential_before_types() {
        let store = Arc::new(JsonPolicyStore::in_memory());
        let service = service_with(store.clone());
        let mut body = serde_json::to_value(PolicyDocument::default()).unwrap();
        body["maxFileSize"] = serde_json::Value::Null;

        assert!(matches!(
            service.write_policy_json("guess", &body).await,
            Err(ConfigError::Unauthorized)
        ));
        match service.write_policy_json("admin-pw", &body).await {
            Err(ConfigError::Validation(e)) => assert_eq!(e.field, "maxFileSize"),
            other => panic!("expected validation error, got {:?}", other),
        }

        body["maxFileSize"] = serde_json::json!(2);
        let stored = service.write_policy_json("admin-pw", &body).await.unwrap();
        assert_eq!(stored.max_file_size, 2.0);
        assert_eq!(store.get().await.unwrap().max_file_size_bytes, 2 * 1024 * 1024);
    }

    #[test]
    fn test_unauthorized_message_is_generic() {
        assert_eq!(ConfigError::Unauthorized.to_string(), "Unauthorized");
    }
}
