//! Download filename rules. Every name handed to a sink is relative, lives under
//! the `Ampoose` root, and has no `.`/`..` segments or forbidden characters.

pub const DOWNLOAD_ROOT: &str = "Ampoose";
pub const DEFAULT_FILENAME: &str = "posts.json";
pub const DEFAULT_FOLDER: &str = "profile";

fn is_forbidden(c: char) -> bool {
    matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || c.is_control()
}

/// Clean one path segment. Returns `None` when nothing usable remains.
pub fn sanitize_segment(raw: &str) -> Option<String> {
    let replaced: String = raw
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();
    let cleaned = replaced.trim().trim_end_matches(['.', ' ']).trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return None;
    }
    Some(cleaned.to_string())
}

/// Relative download path for `name` under the download root.
pub fn build_download_filename(name: Option<&str>) -> String {
    let segments: Vec<String> = name
        .unwrap_or_default()
        .split(['/', '\\'])
        .filter_map(sanitize_segment)
        .collect();
    if segments.is_empty() {
        return format!("{DOWNLOAD_ROOT}/{DEFAULT_FILENAME}");
    }
    format!("{DOWNLOAD_ROOT}/{}", segments.join("/"))
}

/// Folder for one collection, falling back to a fixed name when the profile
/// identity resolves to nothing usable.
pub fn collection_folder(identity: Option<&str>) -> String {
    identity
        .and_then(sanitize_segment)
        .unwrap_or_else(|| DEFAULT_FOLDER.to_string())
}
