//! Reading the provisioning connection file.

use std::io::ErrorKind;
use std::path::Path;

use crate::domain::ConfigError;

/// Default location written by the device provisioning scripts.
pub const DEFAULT_CONNECTION_FILE: &str = "/tmp/genymotion_connection.env";

/// Returns the file's contents, or `None` if it does not exist.
///
/// # Errors
///
/// [`ConfigError::ConnectionFile`] for any I/O failure other than
/// "not found" (permissions, a directory at that path, invalid UTF-8).
pub fn read_connection_file(path: &Path) -> Result<Option<String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::ConnectionFile {
            path: path.to_path_buf(),
            source,
        }),
    }
}
