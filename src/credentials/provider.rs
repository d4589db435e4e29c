//! Credential provider abstraction
//!
//! A provider knows how to produce a fresh cookie artifact from some
//! source (an exported file, a browser profile, ...). The service never
//! cares where cookies come from — it only demands that a provider
//! writes a complete, valid artifact to the path it is given.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::netscape;
use crate::error::{CredentialError, Error, Result};

/// Trait for credential extraction backends
///
/// Implementations must write the *entire* artifact to `dest` before
/// returning; the service renames `dest` over the canonical path only on
/// success, which is what keeps a failed refresh from destroying a
/// previously valid artifact.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Extract cookies and write a complete Netscape file to `dest`
    ///
    /// # Returns
    ///
    /// The number of cookies written.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is unreadable, invalid, or empty.
    /// `dest` may be left in any state on error — it is a scratch path.
    async fn extract(&self, dest: &Path) -> Result<usize>;

    /// Identifier of the source this provider reads from (e.g., "firefox", "file")
    fn source_id(&self) -> &str;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Provider that imports a user-supplied Netscape cookie file
///
/// Parses the source file rather than copying it byte-for-byte, so a
/// truncated or hand-mangled export is rejected instead of silently
/// becoming the canonical artifact.
pub struct FileCredentialProvider {
    source_file: PathBuf,
    source_id: String,
}

impl FileCredentialProvider {
    /// Create a provider reading from `source_file`
    pub fn new(source_file: PathBuf, source_id: String) -> Self {
        Self {
            source_file,
            source_id,
        }
    }
}

#[async_trait]
impl CredentialProvider for FileCredentialProvider {
    async fn extract(&self, dest: &Path) -> Result<usize> {
        let cookies = netscape::read_file(&self.source_file).await.map_err(|e| {
            Error::Credential(CredentialError::RefreshFailed(format!(
                "source file {} unreadable: {e}",
                self.source_file.display()
            )))
        })?;

        if cookies.is_empty() {
            return Err(Error::Credential(CredentialError::RefreshFailed(format!(
                "source file {} contains no cookies",
                self.source_file.display()
            ))));
        }

        netscape::write_file(dest, &cookies).await?;
        Ok(cookies.len())
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn name(&self) -> &'static str {
        "file-import"
    }
}
