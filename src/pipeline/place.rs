//! Collision-safe file placement and safe filename derivation.
//!
//! A placement never overwrites a pre-existing file: identical content is
//! skipped, and a genuine name collision is resolved by probing
//! `"name (1).ext"`, `"name (2).ext"`, ... until a free name is found.
//! Destination bytes go through a staging temp file in the target directory
//! and land under their final name via rename, so a partially written file is
//! never visible to other processes.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use super::Result;

/// Longest base name kept after sanitizing
const MAX_BASE_LEN: usize = 128;

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[^A-Za-z0-9_.]").expect("filename sanitizer pattern is valid")
});

/// Extensions for recognized image MIME types, used when the URL path has none
fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let essence = mime.split(';').next().unwrap_or(mime).trim();
    match essence {
        "image/jpeg" => Some(".jpg"),
        "image/png" => Some(".png"),
        "image/gif" => Some(".gif"),
        "image/webp" => Some(".webp"),
        "image/svg+xml" => Some(".svg"),
        "image/x-icon" => Some(".ico"),
        "image/bmp" => Some(".bmp"),
        "image/apng" => Some(".apng"),
        _ => None,
    }
}

/// A sanitized destination name derived from a download URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeFilename {
    /// Sanitized URL path stem, `[A-Za-z0-9_.]` only
    pub base: String,
    /// Extension including the dot; possibly empty
    pub extension: String,
}

impl SafeFilename {
    /// Derive a safe name from the URL's path component, inferring a missing
    /// extension from the response MIME type when possible
    pub fn from_url(url: &str, mime_type: Option<&str>) -> Self {
        let path_part = reqwest::Url::parse(url)
            .map(|parsed| parsed.path().to_string())
            .unwrap_or_else(|_| url.to_string());
        let path = Path::new(&path_part);

        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("download");
        let mut base = UNSAFE_CHARS.replace_all(stem, "_").into_owned();
        base.truncate(MAX_BASE_LEN);
        if base.is_empty() {
            base.push_str("download");
        }

        let mut extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();
        if extension.is_empty() {
            if let Some(inferred) = mime_type.and_then(extension_for_mime) {
                debug!("Using extension '{inferred}' since the file didn't have one");
                extension = inferred.to_string();
            } else {
                warn!("No extension found and could not infer one for '{url}'");
            }
        }

        Self { base, extension }
    }
}

/// Place the spooled file into `directory` under `base` + `extension`.
///
/// Returns the final path, or `None` when nothing was written: the caller
/// asked to skip existing names, or the occupying file already holds
/// byte-identical content (matched against `fingerprint`).
pub async fn place(
    temp: &Path,
    directory: &Path,
    base: &str,
    extension: &str,
    skip_existing: bool,
    fingerprint: &str,
) -> Result<Option<PathBuf>> {
    tokio::fs::create_dir_all(directory).await?;

    let mut location = directory.join(format!("{base}{extension}"));
    if tokio::fs::try_exists(&location).await? {
        if skip_existing {
            debug!("File '{}' already exists. Skipping.", location.display());
            return Ok(None);
        }
        if hash_file(&location).await? == fingerprint {
            info!(
                "File '{}' already holds this content. Skipping.",
                location.display()
            );
            return Ok(None);
        }

        warn!(
            "File '{}' already exists. File will be renamed.",
            location.display()
        );
        // Probe is only safe against concurrent writers from this process,
        // and those are excluded because dedup happens before fan-out.
        let mut count = 1u32;
        loop {
            let candidate = directory.join(format!("{base} ({count}){extension}"));
            if !tokio::fs::try_exists(&candidate).await? {
                location = candidate;
                break;
            }
            count += 1;
        }
    }

    debug!(
        "Copying from '{}' to '{}'",
        temp.display(),
        location.display()
    );
    let staging = NamedTempFile::new_in(directory)?;
    tokio::fs::copy(temp, staging.path()).await?;
    staging.persist(&location).map_err(|e| e.error)?;

    Ok(Some(location))
}

/// SHA-256 of a file on disk, hashed in chunks with explicit yields so a
/// large rehash can't starve other in-flight jobs
async fn hash_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
        tokio::task::yield_now().await;
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha256_hex(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    fn temp_with(data: &[u8]) -> NamedTempFile {
        let temp = NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), data).unwrap();
        temp
    }

    #[test]
    fn safe_filename_sanitizes_and_keeps_extension() {
        let name = SafeFilename::from_url("https://i.example/some%20photo!.jpg", None);
        assert_eq!(name.extension, ".jpg");
        assert!(!name.base.is_empty());
        assert!(name.base.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.'));
    }

    #[test]
    fn safe_filename_infers_extension_from_mime() {
        let name = SafeFilename::from_url("https://i.example/abc123", Some("image/png"));
        assert_eq!(name.base, "abc123");
        assert_eq!(name.extension, ".png");

        let charset = SafeFilename::from_url(
            "https://i.example/abc123",
            Some("image/jpeg; charset=utf-8"),
        );
        assert_eq!(charset.extension, ".jpg");
    }

    #[test]
    fn safe_filename_truncates_long_stems() {
        let long = format!("https://i.example/{}.png", "a".repeat(400));
        let name = SafeFilename::from_url(&long, None);
        assert_eq!(name.base.len(), MAX_BASE_LEN);
    }

    #[test]
    fn unknown_mime_leaves_extension_empty() {
        let name = SafeFilename::from_url("https://i.example/abc123", Some("text/html"));
        assert_eq!(name.extension, "");
    }

    #[tokio::test]
    async fn places_into_a_fresh_directory() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("desk");
        let temp = temp_with(b"image-bytes");

        let placed = place(
            temp.path(),
            &dest,
            "photo",
            ".jpg",
            false,
            &sha256_hex(b"image-bytes"),
        )
        .await
        .unwrap();

        let path = placed.unwrap();
        assert_eq!(path, dest.join("photo.jpg"));
        assert_eq!(std::fs::read(&path).unwrap(), b"image-bytes");
    }

    #[tokio::test]
    async fn collisions_probe_numbered_names() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().to_path_buf();
        std::fs::write(dest.join("photo.jpg"), b"original").unwrap();

        let second = temp_with(b"different");
        let placed = place(
            second.path(),
            &dest,
            "photo",
            ".jpg",
            false,
            &sha256_hex(b"different"),
        )
        .await
        .unwrap();
        assert_eq!(placed.unwrap(), dest.join("photo (1).jpg"));

        let third = temp_with(b"different again");
        let placed = place(
            third.path(),
            &dest,
            "photo",
            ".jpg",
            false,
            &sha256_hex(b"different again"),
        )
        .await
        .unwrap();
        assert_eq!(placed.unwrap(), dest.join("photo (2).jpg"));

        // The original was never touched.
        assert_eq!(std::fs::read(dest.join("photo.jpg")).unwrap(), b"original");
    }

    #[tokio::test]
    async fn identical_content_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().to_path_buf();
        std::fs::write(dest.join("photo.jpg"), b"same bytes").unwrap();

        let temp = temp_with(b"same bytes");
        let placed = place(
            temp.path(),
            &dest,
            "photo",
            ".jpg",
            false,
            &sha256_hex(b"same bytes"),
        )
        .await
        .unwrap();

        assert!(placed.is_none());
        assert_eq!(std::fs::read_dir(&dest).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn skip_existing_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().to_path_buf();
        std::fs::write(dest.join("photo.jpg"), b"original").unwrap();

        let temp = temp_with(b"different");
        let placed = place(
            temp.path(),
            &dest,
            "photo",
            ".jpg",
            true,
            &sha256_hex(b"different"),
        )
        .await
        .unwrap();

        assert!(placed.is_none());
        assert_eq!(std::fs::read_dir(&dest).unwrap().count(), 1);
    }
}
