//! Pure admission validators, invoked before any process is created.

use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("tool name is empty")]
    EmptyName,
    #[error("tool name contains whitespace")]
    NameWhitespace,
    #[error("tool name contains path separator")]
    NamePathSeparator,
    #[error("tool name contains parent directory reference")]
    NameParentRef,
    #[error("tool name contains encoded path separator")]
    NameEncodedSeparator,
    #[error("tool name contains double-encoded characters")]
    NameDoubleEncoded,
    #[error("tool name contains invalid character: {0:?}")]
    NameInvalidChar(char),

    #[error("workspace root not found: {0}")]
    RootNotFound(String),
    #[error("path cannot be absolute")]
    AbsolutePath,
    #[error("path traversal detected: contains {0}")]
    Traversal(&'static str),
    #[error("invalid percent-encoding")]
    BadEncoding,
    #[error("symlink escapes workspace: {0}")]
    SymlinkEscape(String),
    #[error("path escapes workspace: {0}")]
    Escape(String),
}

/// Check a tool name against the allow-list.
///
/// Rejects path separators, parent references, percent-encoded separators
/// (and percent-encoded percent, which would defeat single decoding), and
/// anything outside `[A-Za-z0-9_-]`.
pub fn validate_tool_name(name: &str) -> Result<(), SandboxError> {
    if name.is_empty() {
        return Err(SandboxError::EmptyName);
    }
    if name.chars().any(|c| c.is_ascii_whitespace()) {
        return Err(SandboxError::NameWhitespace);
    }
    if name.contains('/') || name.contains('\\') {
        return Err(SandboxError::NamePathSeparator);
    }
    if name.contains("..") {
        return Err(SandboxError::NameParentRef);
    }
    let lower = name.to_ascii_lowercase();
    if lower.contains("%2f") || lower.contains("%5c") {
        return Err(SandboxError::NameEncodedSeparator);
    }
    if lower.contains("%25") {
        return Err(SandboxError::NameDoubleEncoded);
    }
    for ch in name.chars() {
        if !(ch.is_ascii_alphanumeric() || ch == '-' || ch == '_') {
            return Err(SandboxError::NameInvalidChar(ch));
        }
    }
    Ok(())
}

/// Resolve a requested relative path against a workspace root, rejecting any
/// form of escape.
///
/// The requested path is checked before decoding, after a single round of
/// percent-decoding, and after a second round when double-encoded. Every
/// symlink met while walking the components must resolve inside the root,
/// and the final joined path is resolved end-to-end and re-checked. Escapes
/// are rejected even when the final path does not exist.
pub fn validate_path(workspace_root: &Path, requested: &str) -> Result<PathBuf, SandboxError> {
    let root = std::fs::canonicalize(workspace_root)
        .map_err(|_| SandboxError::RootNotFound(workspace_root.display().to_string()))?;

    check_traversal(requested)?;

    let decoded: Cow<'_, str> =
        urlencoding::decode(requested).map_err(|_| SandboxError::BadEncoding)?;
    check_traversal(&decoded)?;

    if let Ok(double) = urlencoding::decode(&decoded) {
        if double != decoded {
            check_traversal(&double)?;
        }
    }

    // Walk component by component: any symlink along the way must stay
    // inside the root, including chained targets.
    let mut current = root.clone();
    for part in Path::new(decoded.as_ref()).components() {
        match part {
            Component::CurDir => continue,
            Component::Normal(p) => current.push(p),
            _ => return Err(SandboxError::Traversal("..")),
        }

        if let Ok(target) = std::fs::read_link(&current) {
            if target.is_absolute() {
                return Err(SandboxError::SymlinkEscape(format!(
                    "absolute symlink {}",
                    current.display()
                )));
            }
            let parent = current.parent().unwrap_or(&root);
            let resolved = lexical_clean(&parent.join(&target));
            if !contained(&root, &resolved) {
                return Err(SandboxError::SymlinkEscape(format!(
                    "{} -> {}",
                    current.display(),
                    resolved.display()
                )));
            }
            // Chains: resolve the target all the way down when it exists.
            if let Ok(evaled) = std::fs::canonicalize(&resolved) {
                if !contained(&root, &evaled) {
                    return Err(SandboxError::SymlinkEscape(format!(
                        "{} resolves to {}",
                        current.display(),
                        evaled.display()
                    )));
                }
            }
        }
    }

    let full = root.join(decoded.as_ref());
    let resolved = match std::fs::canonicalize(&full) {
        Ok(p) => p,
        // Final component may not exist yet; fall back to the lexical form.
        Err(_) => lexical_clean(&full),
    };

    if !contained(&root, &resolved) {
        return Err(SandboxError::Escape(format!(
            "{} not in {}",
            resolved.display(),
            root.display()
        )));
    }

    Ok(resolved)
}

/// Containment is equality or a component-wise prefix. `Path::starts_with`
/// compares whole components, so `/ws2` is never inside `/ws`.
fn contained(root: &Path, p: &Path) -> bool {
    p == root || p.starts_with(root)
}

fn check_traversal(path: &str) -> Result<(), SandboxError> {
    if path.starts_with('/') {
        return Err(SandboxError::AbsolutePath);
    }
    if path.contains("..") {
        return Err(SandboxError::Traversal(".."));
    }
    if path.contains("//") {
        return Err(SandboxError::Traversal("//"));
    }
    if path.contains("/.") {
        return Err(SandboxError::Traversal("/."));
    }
    Ok(())
}

/// Lexical normalization: resolves `.` and `..` without touching the
/// filesystem.
fn lexical_clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for part in path.components() {
        match part {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        for name in ["echo", "my-tool", "Tool_2", "a"] {
            assert!(validate_tool_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_empty_name() {
        assert!(matches!(
            validate_tool_name(""),
            Err(SandboxError::EmptyName)
        ));
    }

    #[test]
    fn rejects_whitespace() {
        for name in ["a b", "a\tb", "a\nb"] {
            assert!(matches!(
                validate_tool_name(name),
                Err(SandboxError::NameWhitespace)
            ));
        }
    }

    #[test]
    fn rejects_path_separators() {
        assert!(matches!(
            validate_tool_name("a/b"),
            Err(SandboxError::NamePathSeparator)
        ));
        assert!(matches!(
            validate_tool_name("a\\b"),
            Err(SandboxError::NamePathSeparator)
        ));
    }

    #[test]
    fn rejects_parent_references() {
        assert!(matches!(
            validate_tool_name("..evil"),
            Err(SandboxError::NameParentRef)
        ));
    }

    #[test]
    fn rejects_encoded_separators_any_case() {
        for name in ["a%2fb", "a%2Fb", "a%5cb", "a%5Cb"] {
            assert!(matches!(
                validate_tool_name(name),
                Err(SandboxError::NameEncodedSeparator)
            ));
        }
    }

    #[test]
    fn rejects_double_encoding() {
        assert!(matches!(
            validate_tool_name("a%252eb"),
            Err(SandboxError::NameDoubleEncoded)
        ));
    }

    #[test]
    fn rejects_other_characters() {
        for name in ["a.b", "a$b", "ünïcode", "a%41"] {
            assert!(validate_tool_name(name).is_err(), "{name}");
        }
    }

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/file.txt"), b"x").unwrap();
        dir
    }

    #[test]
    fn resolves_paths_inside_root() {
        let ws = workspace();
        let got = validate_path(ws.path(), "sub/file.txt").unwrap();
        assert!(got.ends_with("sub/file.txt"));
    }

    #[test]
    fn accepts_nonexistent_paths_inside_root() {
        let ws = workspace();
        assert!(validate_path(ws.path(), "sub/new-file").is_ok());
    }

    #[test]
    fn rejects_absolute_paths() {
        let ws = workspace();
        assert!(matches!(
            validate_path(ws.path(), "/etc/passwd"),
            Err(SandboxError::AbsolutePath)
        ));
    }

    #[test]
    fn rejects_parent_traversal() {
        let ws = workspace();
        for p in ["../x", "sub/../../x", "..", "a/.."] {
            assert!(
                matches!(validate_path(ws.path(), p), Err(SandboxError::Traversal(".."))),
                "{p}"
            );
        }
    }

    #[test]
    fn rejects_confusing_separators() {
        let ws = workspace();
        assert!(validate_path(ws.path(), "a//b").is_err());
        assert!(validate_path(ws.path(), "a/./b").is_err());
    }

    #[test]
    fn rejects_encoded_traversal_after_one_decode() {
        let ws = workspace();
        assert!(validate_path(ws.path(), "%2e%2e%2fetc").is_err());
    }

    #[test]
    fn rejects_double_encoded_traversal() {
        let ws = workspace();
        assert!(validate_path(ws.path(), "%252e%252e%252fetc").is_err());
    }

    #[test]
    fn rejects_escape_to_sibling_directory() {
        // A sibling whose name shares the root as a string prefix must not
        // count as contained.
        let parent = tempfile::tempdir().unwrap();
        let root = parent.path().join("ws");
        let sibling = parent.path().join("ws2");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&sibling).unwrap();

        assert!(!contained(&root, &sibling));
        assert!(!contained(&root, &parent.path().join("ws2/inner")));
        assert!(contained(&root, &root.join("inner")));
        assert!(contained(&root, &root));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_absolute_symlink() {
        let ws = workspace();
        std::os::unix::fs::symlink("/etc", ws.path().join("leak")).unwrap();
        assert!(matches!(
            validate_path(ws.path(), "leak/passwd"),
            Err(SandboxError::SymlinkEscape(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_relative_symlink_escaping_root() {
        let parent = tempfile::tempdir().unwrap();
        let root = parent.path().join("ws");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(parent.path().join("secret"), b"s").unwrap();
        std::os::unix::fs::symlink("../secret", root.join("leak")).unwrap();

        assert!(matches!(
            validate_path(&root, "leak"),
            Err(SandboxError::SymlinkEscape(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn accepts_symlink_staying_inside_root() {
        let ws = workspace();
        std::os::unix::fs::symlink("sub", ws.path().join("alias")).unwrap();
        assert!(validate_path(ws.path(), "alias/file.txt").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_chain_escaping_root() {
        let parent = tempfile::tempdir().unwrap();
        let root = parent.path().join("ws");
        std::fs::create_dir_all(root.join("d")).unwrap();
        std::fs::create_dir_all(parent.path().join("outside")).unwrap();
        // hop stays lexically inside, but its target is itself a link out.
        std::os::unix::fs::symlink("../outside", root.join("d/out")).unwrap();
        std::os::unix::fs::symlink("d/out", root.join("hop")).unwrap();

        assert!(validate_path(&root, "hop").is_err());
    }
}
