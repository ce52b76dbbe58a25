use chrono::{DateTime, Datelike, Utc};
use uuid::Uuid;

/// Longest sanitized base name kept in a key, in characters
const MAX_BASE_NAME_CHARS: usize = 100;

/// Derive the object-store key for a client-supplied file name.
///
/// Format: `y={YYYY}/m={MM}/d={DD}/{token}_{base}{ext}`
///
/// - Date partition (UTC) for lifecycle policies and prefix listing
/// - Random token so identical names never collide
/// - Sanitized base name, truncated to 100 characters
/// - Final extension of the original name, case preserved
pub fn derive_storage_key(file_name: &str) -> String {
    derive_storage_key_at(file_name, Utc::now(), Uuid::new_v4())
}

/// Deterministic form of [`derive_storage_key`]
pub fn derive_storage_key_at(file_name: &str, now: DateTime<Utc>, token: Uuid) -> String {
    let (base, ext) = split_extension(file_name);

    let safe_base: String = sanitize(base).chars().take(MAX_BASE_NAME_CHARS).collect();
    let safe_ext = sanitize(ext);

    format!(
        "y={year}/m={month:02}/d={day:02}/{token}_{base}{ext}",
        year = now.year(),
        month = now.month(),
        day = now.day(),
        token = token,
        base = safe_base,
        ext = safe_ext,
    )
}

/// Split off the final extension (dot included). Only the last path element
/// is searched, so `dir.v2/file` has no extension.
fn split_extension(file_name: &str) -> (&str, &str) {
    let name_start = file_name.rfind('/').map(|i| i + 1).unwrap_or(0);
    match file_name[name_start..].rfind('.') {
        Some(dot) => file_name.split_at(name_start + dot),
        None => (file_name, ""),
    }
}

fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| if is_unsafe(c) { '_' } else { c })
        .collect()
}

fn is_unsafe(c: char) -> bool {
    matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | ' ') || c <= '\u{1f}'
}
