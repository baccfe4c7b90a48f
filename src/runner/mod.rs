//! Transfer runners between the catalog and local directories
//!
//! A [`DownloaderRunner`] materialises the files of a transaction into a
//! directory; an [`UploaderRunner`] bundles a directory with metadata and
//! submits it. Each comes in a remote variant talking HTTP to the catalog
//! services and a local variant working against the filesystem.

mod bundle;
mod downloader;
mod uploader;

pub use bundle::{Bundle, BundleEntry};
pub use downloader::{DownloaderRunner, FileOpener, LocalDownloaderRunner, RemoteDownloaderRunner};
pub use uploader::{JobId, LocalUploaderRunner, RemoteUploaderRunner, UploadReceipt, UploaderRunner};

#[cfg(test)]
pub use downloader::MockDownloaderRunner;
#[cfg(test)]
pub use uploader::MockUploaderRunner;

use reqwest::RequestBuilder;
use std::fmt;

/// Credentials applied to every remote request.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Auth {
    #[default]
    None,
    Basic { username: String, password: String },
    Bearer(String),
}

impl Auth {
    pub(crate) fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Auth::None => request,
            Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
            Auth::Bearer(token) => request.bearer_auth(token),
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::None => f.write_str("None"),
            Auth::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Auth::Bearer(_) => f.write_str("Bearer(***)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_redact_secrets_in_debug_output() {
        let basic = Auth::Basic {
            username: "svc".into(),
            password: "hunter2".into(),
        };
        let bearer = Auth::Bearer("tok-123".into());

        let rendered = format!("{:?} {:?}", basic, bearer);

        assert!(rendered.contains("svc"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("tok-123"));
    }
}
