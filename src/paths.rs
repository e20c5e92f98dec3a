//! Filename resolution under the served root directory

use anyhow::{anyhow, bail, Result};
use std::path::{Component, Path, PathBuf};

/// Resolve a client-supplied filename to a path under `root`.
///
/// Rejects NUL bytes, absolute paths and `..` components. Existing paths are
/// canonicalized so a symlink cannot point the result outside `root`; for new
/// files only the parent is canonicalized. `root` must already be canonical.
pub fn resolve_under_root(root: &Path, name: &str) -> Result<PathBuf> {
    use Component::{CurDir, Normal, ParentDir, Prefix, RootDir};

    if name.contains('\0') {
        bail!("filename contains NUL byte");
    }

    let mut safe = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            CurDir => {}
            Normal(s) => safe.push(s),
            ParentDir | RootDir | Prefix(_) => {
                bail!("filename contains disallowed component: {:?}", component);
            }
        }
    }
    if safe.as_os_str().is_empty() {
        bail!("empty filename");
    }

    let joined = root.join(&safe);
    let final_path = if joined.exists() {
        joined
            .canonicalize()
            .map_err(|e| anyhow!("failed to canonicalize {:?}: {}", joined, e))?
    } else {
        match (joined.parent(), joined.file_name()) {
            (Some(parent), Some(file)) if parent.exists() => parent
                .canonicalize()
                .map_err(|e| anyhow!("failed to canonicalize parent {:?}: {}", parent, e))?
                .join(file),
            _ => joined,
        }
    };

    if !final_path.starts_with(root) {
        bail!("{:?} escapes root {:?}", name, root);
    }
    Ok(final_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn canonical_tmp() -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        (tmp, root)
    }

    #[test]
    fn plain_names_resolve_under_root() {
        let (_tmp, root) = canonical_tmp();
        let p = resolve_under_root(&root, "a.txt").unwrap();
        assert_eq!(p, root.join("a.txt"));

        std::fs::create_dir(root.join("sub")).unwrap();
        let p = resolve_under_root(&root, "./sub/b.txt").unwrap();
        assert_eq!(p, root.join("sub/b.txt"));
    }

    #[test]
    fn traversal_and_absolute_names_are_rejected() {
        let (_tmp, root) = canonical_tmp();
        assert!(resolve_under_root(&root, "../etc/passwd").is_err());
        assert!(resolve_under_root(&root, "sub/../../x").is_err());
        assert!(resolve_under_root(&root, "/etc/passwd").is_err());
        assert!(resolve_under_root(&root, "bad\0name").is_err());
        assert!(resolve_under_root(&root, ".").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_out_of_root_is_rejected() {
        let (_tmp, root) = canonical_tmp();
        let (_other_tmp, other) = canonical_tmp();
        std::fs::write(other.join("secret"), b"x").unwrap();
        std::os::unix::fs::symlink(other.join("secret"), root.join("link")).unwrap();
        assert!(resolve_under_root(&root, "link").is_err());
    }
}
