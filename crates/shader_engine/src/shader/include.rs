//! Restricted `#include` resolution
//!
//! Header names are joined onto a fixed include root. Any name with a `..`
//! component is refused, so includes cannot leave the root. A leading `/` is
//! accepted and still resolves under the root.

use std::fs;
use std::path::{Component, Path, PathBuf};

/// A header that was found under the include root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHeader {
    /// Full path of the header
    pub path: PathBuf,
    /// Header text
    pub content: String,
}

/// Resolve `requested` under `root`
///
/// The error string ends up verbatim in the compiler diagnostic.
pub fn resolve_include(root: &Path, requested: &str) -> Result<ResolvedHeader, String> {
    let relative = Path::new(requested.trim_start_matches(['/', '\\']));

    if requested.contains("../") || requested.contains("..\\")
        || relative.components().any(|c| matches!(c, Component::ParentDir))
    {
        return Err(format!("include '{}' rejected: '../' is not allowed", requested));
    }
    if relative.as_os_str().is_empty() {
        return Err("empty include name".to_string());
    }

    let path = root.join(relative);
    match fs::read_to_string(&path) {
        Ok(content) => Ok(ResolvedHeader { path, content }),
        Err(e) => Err(format!("include '{}' not found under {}: {}", requested, root.display(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_under_root() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("common.glsl"), "float k = 1.0;").unwrap();

        let header = resolve_include(root.path(), "common.glsl").unwrap();
        assert_eq!(header.content, "float k = 1.0;");
        assert_eq!(header.path, root.path().join("common.glsl"));
    }

    #[test]
    fn test_leading_slash_stays_under_root() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("lib")).unwrap();
        fs::write(root.path().join("lib/noise.glsl"), "// noise").unwrap();

        let header = resolve_include(root.path(), "/lib/noise.glsl").unwrap();
        assert_eq!(header.path, root.path().join("lib/noise.glsl"));
    }

    #[test]
    fn test_parent_traversal_rejected() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("include");
        fs::create_dir(&root).unwrap();
        fs::write(outer.path().join("sentinel.glsl"), "// secret").unwrap();

        for name in ["../sentinel.glsl", "lib/../../sentinel.glsl", "/../sentinel.glsl", ".."] {
            let err = resolve_include(&root, name).unwrap_err();
            assert!(err.contains("../"), "{}: {}", name, err);
        }
    }

    #[test]
    fn test_missing_header() {
        let root = tempfile::tempdir().unwrap();
        let err = resolve_include(root.path(), "missing.glsl").unwrap_err();
        assert!(err.contains("missing.glsl"));
    }
}
