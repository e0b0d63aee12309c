//! Writing completed incoming files to the download directory.

use std::path::{Path, PathBuf};

use anyhow::Context;
use lsnp_transfer::ReceivedFile;

/// Write `file` under `dir` and return where it landed. The offered name is
/// reduced to its last path component; an existing file is never
/// overwritten, a numeric suffix is added instead.
pub fn persist_file(dir: &Path, file: &ReceivedFile) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating download dir {}", dir.display()))?;
    let name = sanitize(&file.filename, &file.file_id);
    let path = free_path(dir, &name);
    std::fs::write(&path, &file.data).with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(
        file_id = %file.file_id,
        from = %file.from,
        path = %path.display(),
        bytes = file.data.len(),
        "file saved"
    );
    Ok(path)
}

fn sanitize(filename: &str, file_id: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if base.is_empty() || base == "." || base == ".." {
        return format!("lsnp-{file_id}");
    }
    base.to_string()
}

fn free_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    (1u32..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{stem} ({n}).{ext}")),
            None => dir.join(format!("{stem} ({n})")),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
