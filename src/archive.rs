use std::fs::File;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use zip::ZipArchive;

use crate::error::{install, Result};

/// Accept only relative, "normal" components; strip any leading "./".
/// Rejects absolute paths, prefixes, and any ".." traversal.
fn sanitize_rel_path(p: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for c in p.components() {
        match c {
            Component::CurDir => continue,
            Component::Normal(s) => out.push(s),
            _ => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Extracts a zip to `dest_dir`, returning the number of entries written.
///
/// This uses `enclosed_name()` to prevent Zip Slip (path traversal).
pub fn extract_zip(zip_path: &Path, dest_dir: &Path) -> Result<u64> {
    let file = File::open(zip_path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| install(e.to_string()))?;

    let mut extracted: u64 = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| install(e.to_string()))?;

        let Some(safe_rel) = entry.enclosed_name() else {
            log::warn!("Skipped unsafe zip path: {}", entry.name());
            continue;
        };
        let out_path = dest_dir.join(safe_rel);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut out_file = File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out_file)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode))?;
        }

        extracted = extracted.saturating_add(1);
    }

    Ok(extracted)
}

/// Extracts a `.tar.gz` to `dest_dir`, returning the number of entries written.
///
/// Entries are unpacked one by one so their paths can be sanitized (Tar Slip).
pub fn extract_tar_gz(tar_path: &Path, dest_dir: &Path) -> Result<u64> {
    let f = File::open(tar_path)?;
    let mut archive = Archive::new(GzDecoder::new(f));

    let mut extracted: u64 = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw_path = entry.path()?.to_path_buf();
        let Some(rel) = sanitize_rel_path(&raw_path) else {
            log::warn!("Skipped unsafe tar path: {}", raw_path.to_string_lossy());
            continue;
        };

        let out_path = dest_dir.join(&rel);
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(&out_path)?;
        extracted = extracted.saturating_add(1);
    }

    Ok(extracted)
}

/// Gzip files start with 1F 8B.
pub fn looks_like_gzip(path: &Path) -> Result<bool> {
    use std::io::Read;
    let mut f = File::open(path)?;
    let mut header = [0u8; 2];
    let n = f.read(&mut header)?;
    Ok(n == 2 && header == [0x1f, 0x8b])
}
