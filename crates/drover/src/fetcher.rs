use std::path::{Component, Path};
use std::time::Duration;

use flate2::read::GzDecoder;
use reqwest::header::CONTENT_TYPE;

use crate::error::FetchError;

/// Archive container formats the agent understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
}

/// Decide the archive format from the response `Content-Type`, falling back
/// to the URL path extension.
pub fn detect_kind(content_type: Option<&str>, url: &str) -> Option<ArchiveKind> {
    if let Some(raw) = content_type {
        let media_type = raw.split(';').next().unwrap_or("").trim();
        match media_type {
            "application/zip" => return Some(ArchiveKind::Zip),
            "application/x-gtar" | "application/gzip" | "application/x-gzip" => {
                return Some(ArchiveKind::TarGz)
            }
            "application/x-tar" => return Some(ArchiveKind::Tar),
            _ => {}
        }
    }
    let path = url.split(['?', '#']).next().unwrap_or(url);
    if path.ends_with(".zip") {
        Some(ArchiveKind::Zip)
    } else if path.ends_with(".tar.gz") || path.ends_with(".tgz") {
        Some(ArchiveKind::TarGz)
    } else if path.ends_with(".tar") {
        Some(ArchiveKind::Tar)
    } else {
        None
    }
}

/// Download `url` to `archive_path`, bounded by `ceiling`.
///
/// Returns the detected archive format so the caller can hand the file to
/// [`extract`].
pub async fn download(
    client: &reqwest::Client,
    url: &str,
    archive_path: &Path,
    ceiling: Duration,
) -> Result<ArchiveKind, FetchError> {
    let transfer = async {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let kind = detect_kind(content_type.as_deref(), url).ok_or_else(|| {
            FetchError::ArchiveFormat(content_type.unwrap_or_else(|| "unknown".to_string()))
        })?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        tokio::fs::write(archive_path, &bytes).await?;
        Ok(kind)
    };

    match tokio::time::timeout(ceiling, transfer).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(ceiling)),
    }
}

/// Unpack `archive_path` into `dest_dir`, rejecting entries that would land
/// outside it.
///
/// Blocking; run it on a blocking thread.
pub fn extract(kind: ArchiveKind, archive_path: &Path, dest_dir: &Path) -> Result<(), FetchError> {
    std::fs::create_dir_all(dest_dir)?;
    let file = std::fs::File::open(archive_path)?;
    match kind {
        ArchiveKind::Zip => extract_zip(file, dest_dir),
        ArchiveKind::Tar => extract_tar(tar::Archive::new(file), dest_dir),
        ArchiveKind::TarGz => extract_tar(tar::Archive::new(GzDecoder::new(file)), dest_dir),
    }
}

fn guard_entry_path(path: &Path) -> Result<(), FetchError> {
    if path.is_absolute() {
        return Err(FetchError::PathEscape(path.display().to_string()));
    }
    for component in path.components() {
        if matches!(component, Component::ParentDir | Component::Prefix(_)) {
            return Err(FetchError::PathEscape(path.display().to_string()));
        }
    }
    Ok(())
}

fn extract_tar<R: std::io::Read>(
    mut archive: tar::Archive<R>,
    dest_dir: &Path,
) -> Result<(), FetchError> {
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        guard_entry_path(&path)?;
        entry.unpack_in(dest_dir)?;
    }
    Ok(())
}

fn extract_zip(file: std::fs::File, dest_dir: &Path) -> Result<(), FetchError> {
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| FetchError::ArchiveFormat(e.to_string()))?;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| FetchError::ArchiveFormat(e.to_string()))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(FetchError::PathEscape(entry.name().to_string()));
        };
        let target = dest_dir.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
    }
    Ok(())
}
