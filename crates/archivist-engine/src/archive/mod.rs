//! Object store gateway: durable, key-addressed document storage.

use std::fmt;
use std::sync::Arc;

use archivist_types::error::ArchiveError;
use archivist_types::record::RecordId;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;

pub mod filesystem;
pub mod memory;

pub use filesystem::FilesystemObjectStore;
pub use memory::MemoryObjectStore;

const ID_PLACEHOLDER: &str = "{id}";
const MAX_KEY_LEN: usize = 1024;

/// Container-scoped object storage client.
///
/// Failures are `TransientIo` (worth retrying) or `Permanent` (invalid key,
/// permission denied, storage full). `get` of a missing key is `NotFound`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key`, replacing any existing object. Readers see
    /// either the old or the new object, never a partial one.
    async fn put(&self, key: &str, body: Bytes) -> Result<(), ArchiveError>;

    async fn get(&self, key: &str) -> Result<Bytes, ArchiveError>;

    async fn exists(&self, key: &str) -> Result<bool, ArchiveError>;
}

/// What to do when the target key already holds an object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingObjectPolicy {
    /// Always upload.
    #[default]
    Overwrite,
    /// Skip the upload when the stored bytes are identical.
    SkipIdentical,
}

/// Result of [`ArchiveGateway::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Uploaded,
    /// An identical object was already stored.
    Unchanged,
}

/// Object key template with a single `{id}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTemplate(String);

impl KeyTemplate {
    /// # Errors
    ///
    /// Fails unless the template contains `{id}` exactly once.
    pub fn parse(template: &str) -> Result<Self, String> {
        match template.matches(ID_PLACEHOLDER).count() {
            1 => Ok(Self(template.to_string())),
            0 => Err(format!("template '{template}' must contain {ID_PLACEHOLDER}")),
            _ => Err(format!(
                "template '{template}' must contain {ID_PLACEHOLDER} only once"
            )),
        }
    }

    #[must_use]
    pub fn render(&self, id: RecordId) -> String {
        self.0.replace(ID_PLACEHOLDER, &id.to_string())
    }
}

impl Default for KeyTemplate {
    fn default() -> Self {
        Self("customer-{id}.json".to_string())
    }
}

impl fmt::Display for KeyTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reject keys that could escape the container or that backends disagree on.
///
/// # Errors
///
/// Returns a `Permanent` error describing the first problem found.
pub fn validate_key(key: &str) -> Result<(), ArchiveError> {
    let problem = if key.is_empty() {
        Some("key is empty".to_string())
    } else if key.len() > MAX_KEY_LEN {
        Some(format!("key exceeds {MAX_KEY_LEN} bytes"))
    } else if key.starts_with('/') {
        Some("key must be relative".to_string())
    } else if key.contains('\\') || key.chars().any(char::is_control) {
        Some("key contains a forbidden character".to_string())
    } else if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        Some("key contains an empty or relative path segment".to_string())
    } else {
        None
    };

    match problem {
        Some(reason) => Err(ArchiveError::permanent(
            "INVALID_KEY",
            format!("{reason}: '{key}'"),
        )),
        None => Ok(()),
    }
}

/// Deterministic, id-addressed view over a shared [`ObjectStore`].
#[derive(Clone)]
pub struct ArchiveGateway {
    store: Arc<dyn ObjectStore>,
    template: KeyTemplate,
    existing: ExistingObjectPolicy,
}

impl ArchiveGateway {
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        template: KeyTemplate,
        existing: ExistingObjectPolicy,
    ) -> Self {
        Self {
            store,
            template,
            existing,
        }
    }

    /// Object key for `id`. Depends on `id` alone.
    #[must_use]
    pub fn key_for(&self, id: RecordId) -> String {
        self.template.render(id)
    }

    #[must_use]
    pub fn existing_policy(&self) -> ExistingObjectPolicy {
        self.existing
    }

    /// Store the document for `id` under its deterministic key.
    ///
    /// # Errors
    ///
    /// Returns the store error, or `Permanent` for an invalid key.
    pub async fn put(&self, id: RecordId, body: Bytes) -> Result<PutOutcome, ArchiveError> {
        let key = self.key_for(id);
        validate_key(&key)?;

        if self.existing == ExistingObjectPolicy::SkipIdentical && self.store.exists(&key).await? {
            match self.store.get(&key).await {
                Ok(stored) if stored == body => {
                    tracing::debug!(key = key.as_str(), "Identical object already stored");
                    return Ok(PutOutcome::Unchanged);
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        self.store.put(&key, body).await?;
        Ok(PutOutcome::Uploaded)
    }

    /// Fetch the archived document for `id`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if nothing is archived under the id's key.
    pub async fn get(&self, id: RecordId) -> Result<Bytes, ArchiveError> {
        let key = self.key_for(id);
        validate_key(&key)?;
        self.store.get(&key).await
    }

    /// # Errors
    ///
    /// Returns the store error.
    pub async fn exists(&self, id: RecordId) -> Result<bool, ArchiveError> {
        let key = self.key_for(id);
        validate_key(&key)?;
        self.store.exists(&key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archivist_types::error::ErrorCategory;

    fn gateway(existing: ExistingObjectPolicy) -> (Arc<MemoryObjectStore>, ArchiveGateway) {
        let store = Arc::new(MemoryObjectStore::new());
        let gateway = ArchiveGateway::new(store.clone(), KeyTemplate::default(), existing);
        (store, gateway)
    }

    #[test]
    fn key_is_deterministic_function_of_id() {
        let (_, gateway) = gateway(ExistingObjectPolicy::Overwrite);
        assert_eq!(gateway.key_for(RecordId::new(42)), "customer-42.json");
        assert_eq!(gateway.key_for(RecordId::new(42)), gateway.key_for(RecordId::new(42)));
    }

    #[test]
    fn template_requires_single_placeholder() {
        assert!(KeyTemplate::parse("customers/{id}.json").is_ok());
        assert!(KeyTemplate::parse("customer.json").is_err());
        assert!(KeyTemplate::parse("{id}/{id}.json").is_err());
    }

    #[test]
    fn invalid_keys_are_permanent() {
        for key in ["", "/abs.json", "a/../b.json", "a//b.json", "back\\slash", "./x"] {
            let err = validate_key(key).unwrap_err();
            assert_eq!(err.category, ErrorCategory::Permanent, "key {key:?}");
            assert_eq!(err.code, "INVALID_KEY");
        }
        assert!(validate_key("customers/2019/customer-1.json").is_ok());
    }

    #[tokio::test]
    async fn negative_id_renders_valid_key() {
        let (_, gateway) = gateway(ExistingObjectPolicy::Overwrite);
        gateway.put(RecordId::new(-7), Bytes::from_static(b"{}")).await.unwrap();
        assert!(gateway.exists(RecordId::new(-7)).await.unwrap());
    }

    #[tokio::test]
    async fn overwrite_policy_always_uploads() {
        let (store, gateway) = gateway(ExistingObjectPolicy::Overwrite);
        let body = Bytes::from_static(b"{\"id\":1}");
        assert_eq!(gateway.put(RecordId::new(1), body.clone()).await.unwrap(), PutOutcome::Uploaded);
        assert_eq!(gateway.put(RecordId::new(1), body).await.unwrap(), PutOutcome::Uploaded);
        assert_eq!(store.put_count(), 2);
    }

    #[tokio::test]
    async fn skip_identical_avoids_redundant_upload() {
        let (store, gateway) = gateway(ExistingObjectPolicy::SkipIdentical);
        let body = Bytes::from_static(b"{\"id\":1}");
        gateway.put(RecordId::new(1), body.clone()).await.unwrap();
        assert_eq!(gateway.put(RecordId::new(1), body).await.unwrap(), PutOutcome::Unchanged);
        assert_eq!(store.put_count(), 1);

        let changed = Bytes::from_static(b"{\"id\":1,\"v\":2}");
        assert_eq!(
            gateway.put(RecordId::new(1), changed.clone()).await.unwrap(),
            PutOutcome::Uploaded
        );
        assert_eq!(gateway.get(RecordId::new(1)).await.unwrap(), changed);
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let (_, gateway) = gateway(ExistingObjectPolicy::Overwrite);
        let err = gateway.get(RecordId::new(404)).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!gateway.exists(RecordId::new(404)).await.unwrap());
    }
}
