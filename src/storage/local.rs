use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::{ObjectStore, StorageError};

type HmacSha256 = Hmac<Sha256>;

/// Filesystem-backed object store that signs its own download links.
///
/// Links look like `{base_url}/files/{key}?expires=<unix>&signature=<hex>`
/// where the signature is HMAC-SHA256 over `"{key}\n{expires}"`.
#[derive(Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    base_url: String,
    signing_secret: Vec<u8>,
}

impl std::fmt::Debug for LocalObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalObjectStore")
            .field("root", &self.root)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Keys are relative paths of `[A-Za-z0-9._-]` segments; no `..`, no empty segments.
fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && key.split('/').all(|segment| {
            !segment.is_empty()
                && segment != "."
                && segment != ".."
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        });
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, base_url: &str, signing_secret: &[u8]) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            signing_secret: signing_secret.to_vec(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn signature(&self, key: &str, expires: i64) -> Result<Vec<u8>, StorageError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.signing_secret)
            .map_err(|_| StorageError::InvalidSignature)?;
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Check a link's signature and expiry.
    pub fn verify_link(&self, key: &str, expires: i64, signature: &str) -> bool {
        if expires < chrono::Utc::now().timestamp() {
            return false;
        }
        let Ok(provided) = hex::decode(signature) else {
            return false;
        };
        let Ok(expected) = self.signature(key, expires) else {
            return false;
        };
        expected.len() == provided.len() && bool::from(expected.ct_eq(&provided))
    }

    /// Write a blob, creating parent directories.
    pub async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, data).await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn signed_url(&self, key: &str, expires_in: Duration) -> Result<String, StorageError> {
        validate_key(key)?;
        let expires = chrono::Utc::now().timestamp() + expires_in.as_secs() as i64;
        let signature = hex::encode(self.signature(key, expires)?);
        Ok(format!(
            "{}/files/{}?expires={}&signature={}",
            self.base_url, key, expires, signature
        ))
    }

    async fn read_signed(
        &self,
        key: &str,
        expires: i64,
        signature: &str,
    ) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        if !self.verify_link(key, expires, signature) {
            tracing::warn!(target: "security", key = %key, "Rejected download link with bad signature or expiry");
            return Err(StorageError::InvalidSignature);
        }
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> LocalObjectStore {
        LocalObjectStore::new("/nonexistent", "http://localhost:3000/", b"secret")
    }

    fn query_param<'a>(url: &'a str, name: &str) -> &'a str {
        url.split(['?', '&'])
            .find_map(|p| p.strip_prefix(&format!("{}=", name)))
            .unwrap()
    }

    #[tokio::test]
    async fn signed_url_round_trips_through_verification() {
        let store = store();
        let url = store
            .signed_url("reports/s1/claude.pdf", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.starts_with("http://localhost:3000/files/reports/s1/claude.pdf?"));

        let expires: i64 = query_param(&url, "expires").parse().unwrap();
        let signature = query_param(&url, "signature");
        assert!(store.verify_link("reports/s1/claude.pdf", expires, signature));
        assert!(!store.verify_link("reports/s1/chatgpt.pdf", expires, signature));
        assert!(!store.verify_link("reports/s1/claude.pdf", expires + 1, signature));
    }

    #[test]
    fn expired_link_is_rejected() {
        let store = store();
        let expires = chrono::Utc::now().timestamp() - 1;
        let signature = hex::encode(store.signature("a.pdf", expires).unwrap());
        assert!(!store.verify_link("a.pdf", expires, &signature));
    }

    #[test]
    fn traversal_keys_are_rejected() {
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("reports/s1/claude.pdf").is_ok());
    }
}
