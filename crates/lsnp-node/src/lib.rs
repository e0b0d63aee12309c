//! LSNP node -- library crate for the peer-to-peer social node.
//!
//! Re-exports the state machine, the stores it owns and the I/O tasks so
//! integration tests and main.rs can drive them.

pub mod announce_task;
pub mod config;
pub mod console;
pub mod dispatcher;
pub mod downloads;
pub mod effect;
pub mod groups;
pub mod peer_directory;
pub mod retry_task;
pub mod social;
pub mod socket_task;
pub mod state;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use lsnp_protocol::Avatar;

pub use effect::{Effect, Notice};
pub use state::{NodeError, NodeState, Now};

/// Node state shared between the I/O tasks.
pub type SharedState = Arc<tokio::sync::Mutex<NodeState>>;

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs_or_home() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn dirs_or_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// MIME type guessed from the file extension.
pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("svg") => "image/svg+xml",
        Some("txt") | Some("md") => "text/plain",
        Some("pdf") => "application/pdf",
        Some("json") => "application/json",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

/// Read an image for the PROFILE avatar fields.
pub fn load_avatar(path: &Path) -> anyhow::Result<Avatar> {
    let data =
        std::fs::read(path).with_context(|| format!("reading avatar {}", path.display()))?;
    Ok(Avatar {
        mime_type: mime_type_for(path).to_string(),
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_by_extension() {
        assert_eq!(mime_type_for(Path::new("me.PNG")), "image/png");
        assert_eq!(mime_type_for(Path::new("a/b/photo.jpeg")), "image/jpeg");
        assert_eq!(mime_type_for(Path::new("notes")), "application/octet-stream");
    }

    #[test]
    fn test_expand_tilde_passthrough() {
        assert_eq!(expand_tilde("/etc/lsnp.toml"), PathBuf::from("/etc/lsnp.toml"));
        assert_eq!(expand_tilde("rel/path"), PathBuf::from("rel/path"));
    }

    #[test]
    fn test_load_avatar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G']).unwrap();
        let avatar = load_avatar(&path).unwrap();
        assert_eq!(avatar.mime_type, "image/png");
        assert_eq!(avatar.data.len(), 4);
        assert!(load_avatar(&dir.path().join("missing.png")).is_err());
    }
}
