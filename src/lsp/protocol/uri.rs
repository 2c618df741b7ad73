//! Conversion between filesystem paths and `file://` URIs.

use std::path::{Path, PathBuf};

use url::Url;

use crate::error::{ClientError, ClientResult};

/// Convert a path to a `file://` URI string, resolving relative paths
/// against the current directory.
pub fn path_to_uri(path: &Path) -> ClientResult<String> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Url::from_file_path(&absolute)
        .map(|url| url.to_string())
        .map_err(|()| ClientError::internal(format!("cannot express {} as a URI", absolute.display())))
}

/// Convert a `file://` URI back into a path. Non-file URIs yield `None`.
pub fn uri_to_path(uri: &str) -> Option<PathBuf> {
    Url::parse(uri).ok()?.to_file_path().ok()
}
