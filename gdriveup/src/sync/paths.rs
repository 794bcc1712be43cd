use std::path::Path;

/// Index key for the sync root itself. Distinct from any file or folder
/// key, which never starts with a slash.
pub const ROOT_KEY: &str = "/";

/// Builds the index key of a child entry. Keys are case-insensitive and
/// slash-separated regardless of platform.
pub fn child_key(parent_key: &str, name: &str) -> String {
    let name = name.to_lowercase();
    if parent_key == ROOT_KEY {
        name
    } else {
        format!("{parent_key}/{name}")
    }
}

/// Index key of `path` relative to `base`, or `None` when `path` is not a
/// descendant of (or equal to) `base`. Both paths must already be
/// canonicalized.
pub fn rel_from_base(base: &Path, path: &Path) -> Option<String> {
    let rest = path.strip_prefix(base).ok()?;
    let mut key = String::new();
    for component in rest.components() {
        if !key.is_empty() {
            key.push('/');
        }
        key.push_str(&component.as_os_str().to_string_lossy().to_lowercase());
    }
    if key.is_empty() {
        Some(ROOT_KEY.to_string())
    } else {
        Some(key)
    }
}
