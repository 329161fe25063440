//! Archive expansion.
//!
//! Turns a fetched `.zip` into one [`DocumentMetadata`] per supported member
//! (pdf, xls, xlsx, csv), in archive enumeration order. Each member gets a
//! synthetic URL `<archive url>#<inner path>`, so re-expanding the same bytes
//! always yields the same identities and checksums.
//!
//! Members are staged under
//! `<root>/unzipped_<archive stem>_<archive checksum prefix>/<inner path>`.
//! Directories, unsupported extensions and nested archives are skipped.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::RegwatchError;
use crate::fingerprint;
use crate::formats::FileFormat;
use crate::models::DocumentMetadata;

/// Maximum decompressed size of a single member (zip-bomb protection).
const MAX_MEMBER_BYTES: u64 = 200 * 1024 * 1024;

/// Directory that receives the members of `parent`.
pub fn staging_dir(storage_root: &Path, parent: &DocumentMetadata) -> PathBuf {
    let stem = Path::new(&parent.filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "archive".to_string());
    storage_root.join(format!(
        "unzipped_{}_{}",
        stem,
        fingerprint::short(&parent.checksum)
    ))
}

/// Expand `bytes` (the content of `parent`) into metadata for its supported
/// members. A corrupt container fails with [`RegwatchError::ArchiveRead`];
/// the caller keeps the parent record either way.
pub fn expand(
    bytes: &[u8],
    parent: &DocumentMetadata,
    storage_root: &Path,
) -> Result<Vec<DocumentMetadata>, RegwatchError> {
    let archive_err = |e: zip::result::ZipError| RegwatchError::ArchiveRead {
        name: parent.filename.clone(),
        message: e.to_string(),
    };

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(archive_err)?;
    let unzip_dir = staging_dir(storage_root, parent);
    let mut members = Vec::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(archive_err)?;
        if entry.is_dir() {
            continue;
        }

        let inner_path = entry.name().to_string();
        let Some(relative) = entry.enclosed_name() else {
            warn!(archive = %parent.filename, member = %inner_path, "skipping member with unsafe path");
            continue;
        };
        let inner_name = relative
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| inner_path.clone());

        let format = FileFormat::from_name(&inner_name);
        if !format.is_archive_member() {
            debug!(archive = %parent.filename, member = %inner_path, "dropping unsupported member");
            continue;
        }

        let mut data = Vec::new();
        entry
            .by_ref()
            .take(MAX_MEMBER_BYTES + 1)
            .read_to_end(&mut data)
            .map_err(|e| RegwatchError::ArchiveRead {
                name: parent.filename.clone(),
                message: format!("{}: {}", inner_path, e),
            })?;
        if data.len() as u64 > MAX_MEMBER_BYTES {
            warn!(archive = %parent.filename, member = %inner_path, "member exceeds size limit, skipped");
            continue;
        }

        let local_path = unzip_dir.join(&relative);
        if let Some(dir) = local_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&local_path, &data)?;

        members.push(DocumentMetadata {
            source: parent.source.clone(),
            title: format!("{} - {}", parent.title, inner_name),
            url: format!("{}#{}", parent.url, inner_path),
            filename: inner_name,
            local_path: local_path.to_string_lossy().to_string(),
            filesize_bytes: data.len() as i64,
            mime_type: format.mime_type().to_string(),
            checksum: fingerprint::compute(&data),
            downloaded_at: parent.downloaded_at,
        });
    }

    info!(
        archive = %parent.filename,
        extracted = members.len(),
        "expanded archive"
    );
    Ok(members)
}
