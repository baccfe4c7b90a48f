use super::{data_list, MetadataValue};
use crate::event::Event;
use crate::utils::{DispatchError, DispatchResult};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

/// A file referenced by a transaction.
///
/// `path` is always a validated relative path using `/` separators. The
/// remaining attributes are carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct File {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashtype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashsum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<MetadataValue>,
}

/// Shape of a file record inside `$.data.files`.
#[derive(Debug, Deserialize)]
struct FileRecord {
    path: Option<String>,
    name: Option<String>,
    subdir: Option<String>,
    size: Option<u64>,
    hashtype: Option<String>,
    hashsum: Option<String>,
    mimetype: Option<String>,
    #[serde(rename = "_id")]
    id: Option<MetadataValue>,
}

impl File {
    /// A file at `path` with no further attributes.
    pub fn new(path: &str) -> DispatchResult<Self> {
        Ok(Self {
            path: validate_relative(path)?,
            size: None,
            hashtype: None,
            hashsum: None,
            mimetype: None,
            id: None,
        })
    }

    /// Read `$.data.files` (empty when absent), keeping payload order.
    pub fn from_event(event: &Event) -> DispatchResult<Vec<Self>> {
        let records: Vec<FileRecord> = data_list(event, "files")?;
        records.into_iter().map(Self::from_record).collect()
    }

    fn from_record(record: FileRecord) -> DispatchResult<Self> {
        let raw = match (record.path, record.name) {
            (Some(path), _) => path,
            (None, Some(name)) => match record.subdir.as_deref().map(|s| s.trim_matches('/')) {
                Some(subdir) if !subdir.is_empty() => format!("{}/{}", subdir, name),
                _ => name,
            },
            (None, None) => return Err(DispatchError::malformed("file record has neither path nor name")),
        };
        Ok(Self {
            path: validate_relative(&raw)?,
            size: record.size,
            hashtype: record.hashtype,
            hashsum: record.hashsum,
            mimetype: record.mimetype,
            id: record.id,
        })
    }

    /// Relative location of the file inside any transfer directory.
    pub fn path(&self) -> &str {
        &self.path
    }
}

fn validate_relative(raw: &str) -> DispatchResult<String> {
    let path = Path::new(raw);
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| DispatchError::malformed(format!("file path is not valid UTF-8: {}", raw)))?,
            ),
            Component::CurDir => {}
            _ => {
                return Err(DispatchError::malformed(format!(
                    "file path must be relative without '..': {}",
                    raw
                )))
            }
        }
    }
    if parts.is_empty() {
        return Err(DispatchError::malformed("file path is empty"));
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn event_with_files(files: Value) -> Event {
        Event::from_payload(json!({
            "specversion": "1.0",
            "id": "evt-1",
            "source": "/catalog",
            "type": "transaction.created",
            "data": {"files": files}
        }))
        .expect("valid envelope")
    }

    #[test]
    fn should_keep_file_order_and_attributes() {
        let event = event_with_files(json!([
            {"path": "data/sample.txt", "size": 5, "mimetype": "text/plain", "_id": 7},
            {"path": "data/other.txt", "hashtype": "sha1", "hashsum": "abc"}
        ]));

        let files = File::from_event(&event).unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path(), "data/sample.txt");
        assert_eq!(files[0].size, Some(5));
        assert_eq!(files[0].id, Some(MetadataValue::Integer(7)));
        assert_eq!(files[1].path(), "data/other.txt");
        assert_eq!(files[1].hashsum.as_deref(), Some("abc"));
    }

    #[test]
    fn should_join_subdir_and_name() {
        let event = event_with_files(json!([
            {"name": "sample.txt", "subdir": "data/"},
            {"name": "top.txt"}
        ]));

        let files = File::from_event(&event).unwrap();

        assert_eq!(files[0].path(), "data/sample.txt");
        assert_eq!(files[1].path(), "top.txt");
    }

    #[test]
    fn should_default_to_no_files() {
        let event = Event::from_payload(json!({
            "specversion": "1.0", "id": "e", "source": "s", "type": "t",
            "data": {"transaction": {}}
        }))
        .unwrap();

        assert!(File::from_event(&event).unwrap().is_empty());
    }

    #[test]
    fn should_normalize_current_dir_components() {
        assert_eq!(File::new("./data/./a.txt").unwrap().path(), "data/a.txt");
    }

    #[test]
    fn should_reject_escaping_or_absolute_paths() {
        for bad in ["../etc/passwd", "data/../../x", "/etc/passwd", "", "."] {
            assert!(
                matches!(File::new(bad), Err(DispatchError::MalformedEvent(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn should_reject_records_without_location() {
        let event = event_with_files(json!([{"size": 3}]));

        assert!(matches!(File::from_event(&event), Err(DispatchError::MalformedEvent(_))));
    }
}
