//! Artifact export
//!
//! Republishes the issuer's live files for an entry under
//! `output/<entry>/`, which is the path contract consumers such as a web
//! server reload hook rely on.
//!
//! Every file goes through a temporary file in the destination directory and
//! is renamed into place, so readers never observe a half-written file.

use certman_config::{DataLayout, Entry};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

/// Files copied from the issuer's live directory, in copy order
pub const EXPORT_FILES: [&str; 4] = ["cert.pem", "chain.pem", "fullchain.pem", "privkey.pem"];

/// The file whose presence decides whether there is anything to export
const CERT_FILE: &str = "cert.pem";

/// Private key, exported owner-only
const KEY_FILE: &str = "privkey.pem";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to create output directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to export {}: {source}", path.display())]
    Copy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What an export call did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportResult {
    pub exported: bool,
    /// Destination files written
    pub files: Vec<PathBuf>,
}

/// Copies issuer artifacts to the output directory.
#[derive(Debug, Clone)]
pub struct Exporter {
    layout: DataLayout,
}

impl Exporter {
    pub fn new(layout: DataLayout) -> Self {
        Self { layout }
    }

    /// Export one entry, overwriting previous artifacts.
    ///
    /// Returns `exported = false` without touching the output directory when
    /// the issuer has no certificate for the entry.
    pub fn export(&self, entry: &Entry) -> Result<ExportResult, ExportError> {
        let source_dir = self.layout.live_dir(entry.primary_domain());
        if !source_dir.join(CERT_FILE).is_file() {
            debug!(
                entry = %entry.name,
                source = %source_dir.display(),
                "No certificate to export"
            );
            return Ok(ExportResult::default());
        }

        let output_dir = self.layout.output_entry_dir(&entry.name);
        fs::create_dir_all(&output_dir).map_err(|source| ExportError::CreateDir {
            path: output_dir.clone(),
            source,
        })?;

        let mut files = Vec::with_capacity(EXPORT_FILES.len());
        for name in EXPORT_FILES {
            let source = source_dir.join(name);
            if !source.is_file() {
                continue;
            }
            let target = output_dir.join(name);
            copy_atomic(&source, &target, name == KEY_FILE).map_err(|source| {
                ExportError::Copy {
                    path: target.clone(),
                    source,
                }
            })?;
            files.push(target);
        }

        info!(
            entry = %entry.name,
            files = files.len(),
            output = %output_dir.display(),
            "Exported certificate artifacts"
        );

        Ok(ExportResult {
            exported: true,
            files,
        })
    }
}

/// Copy through a sibling temp file, then rename over `target`.
///
/// The temp file is removed if anything fails before the rename.
fn copy_atomic(source: &Path, target: &Path, private: bool) -> io::Result<()> {
    let dir = target
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no parent"))?;

    let mut temp = NamedTempFile::new_in(dir)?;
    // Follows symlinks, which is how certbot lays out live/
    let mut reader = fs::File::open(source)?;
    io::copy(&mut reader, temp.as_file_mut())?;
    temp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = if private { 0o600 } else { 0o644 };
        temp.as_file()
            .set_permissions(fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = private;

    temp.persist(target).map_err(|e| e.error)?;
    Ok(())
}
