//! Upload bundles: a directory snapshot plus its metadata

use crate::models::{Transaction, TransactionKeyValue};
use crate::utils::{DispatchError, DispatchResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// One regular file of a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleEntry {
    /// Relative path inside the bundle, `/` separated
    pub path: String,
    pub size: u64,
    /// Lowercase hex SHA-256 of `content`
    pub sha256: String,
    #[serde(with = "base64_content")]
    pub content: Vec<u8>,
}

impl BundleEntry {
    pub fn new(path: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            size: content.len() as u64,
            sha256: hex::encode(Sha256::digest(&content)),
            content,
        }
    }
}

/// Everything submitted to the ingest service in one upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub transaction: Transaction,
    pub key_values: Vec<TransactionKeyValue>,
    pub files: Vec<BundleEntry>,
}

impl Bundle {
    /// Snapshot every regular file under `source_dir`, sorted by relative path.
    pub async fn from_dir(
        source_dir: &Path,
        transaction: &Transaction,
        key_values: &[TransactionKeyValue],
    ) -> DispatchResult<Self> {
        let mut files = Vec::new();
        let mut pending: Vec<PathBuf> = vec![source_dir.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| DispatchError::upload(format!("cannot read {}: {}", dir.display(), e)))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| DispatchError::upload(format!("cannot read {}: {}", dir.display(), e)))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| DispatchError::upload(format!("cannot stat {}: {}", path.display(), e)))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    let content = tokio::fs::read(&path)
                        .await
                        .map_err(|e| DispatchError::upload(format!("cannot read {}: {}", path.display(), e)))?;
                    files.push(BundleEntry::new(relative_name(source_dir, &path)?, content));
                }
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(Self {
            transaction: transaction.clone(),
            key_values: key_values.to_vec(),
            files,
        })
    }

    pub fn file(&self, path: &str) -> Option<&BundleEntry> {
        self.files.iter().find(|entry| entry.path == path)
    }
}

fn relative_name(root: &Path, path: &Path) -> DispatchResult<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|e| DispatchError::upload(format!("{} escapes bundle root: {}", path.display(), e)))?;
    let parts: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    parts
        .map(|parts| parts.join("/"))
        .ok_or_else(|| DispatchError::upload(format!("non UTF-8 file name: {}", relative.display())))
}

mod base64_content {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(content: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(content))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn should_snapshot_nested_files_in_path_order() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("data/nested")).unwrap();
        std::fs::write(dir.path().join("zeta.txt"), "z").unwrap();
        std::fs::write(dir.path().join("data/nested/b.txt"), "bb").unwrap();
        std::fs::write(dir.path().join("data/a.txt"), "HELLO").unwrap();
        let transaction = Transaction::new("alice", "I1", "P1");
        let key_values = vec![TransactionKeyValue::new("Transactions._id", 42i64)];

        // Act
        let bundle = Bundle::from_dir(dir.path(), &transaction, &key_values).await.unwrap();

        // Assert
        let paths: Vec<_> = bundle.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["data/a.txt", "data/nested/b.txt", "zeta.txt"]);
        let hello = bundle.file("data/a.txt").unwrap();
        assert_eq!(hello.size, 5);
        assert_eq!(hello.content, b"HELLO");
        assert_eq!(
            hello.sha256,
            "3733cd977ff8eb18b987357e22ced99f46097f31ecb239e878ae63760e83e4d5"
        );
        assert_eq!(bundle.transaction, transaction);
        assert_eq!(bundle.key_values, key_values);
    }

    #[tokio::test]
    async fn should_bundle_empty_directory() {
        let dir = tempfile::tempdir().unwrap();

        let bundle = Bundle::from_dir(dir.path(), &Transaction::new("a", "b", "c"), &[])
            .await
            .unwrap();

        assert!(bundle.files.is_empty());
    }

    #[tokio::test]
    async fn should_fail_as_upload_failure_for_missing_directory() {
        let result = Bundle::from_dir(Path::new("/nonexistent/bundle"), &Transaction::new("a", "b", "c"), &[]).await;

        assert!(matches!(result, Err(DispatchError::UploadFailure(_))));
    }

    #[test]
    fn should_encode_content_as_base64() {
        let entry = BundleEntry::new("a.txt", b"HELLO".to_vec());

        let value = serde_json::to_value(&entry).unwrap();

        assert_eq!(value["content"], json!("SEVMTE8="));
        let decoded: BundleEntry = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, entry);
    }
}
