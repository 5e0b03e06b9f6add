//! Sandbox root — the single directory beneath which all effects must stay.
//!
//! Every path in a plan is relative and is resolved against this root. The
//! confinement rule is enforced twice: the validator checks the raw strings
//! before any side effect, and the executor re-resolves every path at
//! execution time, since symlinks or concurrent filesystem changes could
//! defeat a purely static check.

use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Why a raw path value was refused by [`Sandbox::resolve`].
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("absolute paths are not allowed: {0}")]
    Absolute(String),
    #[error("parent-directory segments are not allowed: {0}")]
    ParentSegment(String),
    #[error("path escapes the sandbox: {0}")]
    Escapes(String),
    #[error("cannot resolve {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Handle on the sandbox root directory.
///
/// Opening the sandbox creates the directory (with parents, idempotently)
/// and canonicalizes it, so later `starts_with` checks compare canonical
/// paths on both sides.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Opens (creating if needed) the sandbox root.
    pub fn open(root: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let root = root.canonicalize()?;
        debug!("Sandbox root at {}", root.display());
        Ok(Self { root })
    }

    /// The canonical sandbox root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Re-creates the root if it vanished since `open` (idempotent).
    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    /// Resolves a raw, plan-supplied path against the sandbox root.
    ///
    /// Rejects absolute paths and any `..` segment outright, then joins the
    /// value onto the root and canonicalizes the deepest existing prefix
    /// (following symlinks). The result must be the root itself or a
    /// descendant of it — anything else is refused, even if the raw string
    /// looked harmless.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, ResolveError> {
        let rel = Path::new(raw);
        if rel.is_absolute() {
            return Err(ResolveError::Absolute(raw.to_string()));
        }
        if rel
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(ResolveError::ParentSegment(raw.to_string()));
        }

        let joined = self.root.join(rel);
        let resolved = resolve_existing_prefix(&joined).map_err(|source| ResolveError::Io {
            path: raw.to_string(),
            source,
        })?;

        if !resolved.starts_with(&self.root) {
            return Err(ResolveError::Escapes(raw.to_string()));
        }
        Ok(resolved)
    }
}

/// Canonicalizes the deepest existing ancestor of `path` and re-appends the
/// not-yet-existing tail. Lets confinement checks work for paths that a
/// step is about to create.
fn resolve_existing_prefix(path: &Path) -> io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();

    loop {
        match existing.canonicalize() {
            Ok(canonical) => {
                let mut out = canonical;
                for segment in tail.iter().rev() {
                    out.push(segment);
                }
                return Ok(out);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                match (existing.file_name(), existing.parent()) {
                    (Some(name), Some(parent)) => {
                        tail.push(name.to_os_string());
                        existing = parent.to_path_buf();
                    }
                    _ => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }
    }
}
