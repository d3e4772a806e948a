//! Pure upload helpers: storage key derivation, public URL building,
//! progress math, and metadata normalization.
//!
//! Keys are derived once at intake and immutable afterwards; retries reuse
//! the same bucket/key and simply overwrite any partial object.

use std::collections::HashMap;

use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::CreateMediaUpload;

/// Folder used when the caller supplies none (or nothing survives sanitization).
pub const DEFAULT_FOLDER: &str = "uploads";

/// Replace every character outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_segment(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Whether a sanitized segment is usable as a path component.
/// Dot-only segments (`.`, `..`) would reintroduce traversal.
fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.chars().all(|c| c == '.')
}

/// Normalize a caller-supplied folder into a safe `/`-joined prefix.
/// Unsafe or empty segments are dropped; an empty result falls back to
/// [`DEFAULT_FOLDER`].
pub fn normalize_folder(folder: Option<&str>) -> String {
    let segments: Vec<String> = folder
        .unwrap_or_default()
        .split('/')
        .map(sanitize_segment)
        .filter(|s| is_safe_segment(s))
        .collect();

    if segments.is_empty() {
        DEFAULT_FOLDER.to_string()
    } else {
        segments.join("/")
    }
}

/// Derive the object-storage key for a new upload:
/// `{folder}/{uuid}-{sanitized file name}`. The fresh UUID guarantees the
/// key never collides with an existing object.
pub fn build_object_key(file_name: &str, folder: Option<&str>) -> String {
    let file_segment = sanitize_segment(file_name);
    let base_folder = normalize_folder(folder);
    let token = Uuid::new_v4();

    if is_safe_segment(&file_segment) {
        format!("{}/{}-{}", base_folder, token, file_segment)
    } else {
        format!("{}/{}", base_folder, token)
    }
}

/// Deterministic public URL for an object. Used when the storage client
/// does not report a location on completion.
pub fn build_public_url(endpoint: Option<&str>, bucket: &str, region: &str, key: &str) -> String {
    match endpoint {
        Some(endpoint) => format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key),
        None => format!("https://{}.s3.{}.amazonaws.com/{}", bucket, region, key),
    }
}

/// Integer percent of `loaded` over `total`, floored and clamped to [0, 100].
/// Returns `None` when the total is unknown (zero), so callers skip the
/// progress write rather than reporting a bogus value.
pub fn calculate_percent(loaded: u64, total: u64) -> Option<i32> {
    if total == 0 {
        return None;
    }
    let percent = (loaded as f64 / total as f64 * 100.0).floor() as i64;
    Some(percent.clamp(0, 100) as i32)
}

/// Merge the descriptive payload into a single metadata map, omitting
/// empty fields. Returns `None` when nothing was supplied.
pub fn merge_metadata(payload: &CreateMediaUpload) -> Option<JsonValue> {
    let mut map = serde_json::Map::new();

    if let Some(title) = payload.title.as_ref().filter(|t| !t.is_empty()) {
        map.insert("title".to_string(), JsonValue::String(title.clone()));
    }
    if let Some(description) = payload.description.as_ref().filter(|d| !d.is_empty()) {
        map.insert(
            "description".to_string(),
            JsonValue::String(description.clone()),
        );
    }
    if let Some(tags) = payload.tags.as_ref().filter(|t| !t.is_empty()) {
        map.insert(
            "tags".to_string(),
            JsonValue::Array(tags.iter().cloned().map(JsonValue::String).collect()),
        );
    }
    if let Some(extra) = payload.metadata.as_ref() {
        for (k, v) in extra {
            map.insert(k.clone(), v.clone());
        }
    }

    if map.is_empty() {
        None
    } else {
        Some(JsonValue::Object(map))
    }
}

/// Convert a metadata JSON object to the string-only key/value pairs object
/// storage accepts. Nulls are dropped; non-string values are serialized to
/// their JSON text.
pub fn to_storage_metadata(metadata: Option<&JsonValue>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let Some(JsonValue::Object(map)) = metadata else {
        return out;
    };

    for (key, value) in map {
        match value {
            JsonValue::Null => {}
            JsonValue::String(s) => {
                out.insert(key.clone(), s.clone());
            }
            other => {
                if let Ok(text) = serde_json::to_string(other) {
                    out.insert(key.clone(), text);
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitize_replaces_disallowed_characters() {
        assert_eq!(sanitize_segment("my card #1.png"), "my_card__1.png");
        assert_eq!(sanitize_segment("safe-name_01.jpg"), "safe-name_01.jpg");
        assert_eq!(sanitize_segment("日本語.png"), "___.png");
    }

    #[test]
    fn folder_traversal_is_neutralized() {
        assert_eq!(normalize_folder(Some("../../etc")), "etc");
        assert_eq!(normalize_folder(Some("..")), DEFAULT_FOLDER);
        assert_eq!(normalize_folder(Some("a/../b")), "a/b");
        let key = build_object_key("passwd", Some("../../etc"));
        assert!(!key.contains(".."));
        assert!(key.starts_with("etc/"));
    }

    #[test]
    fn folder_defaults_when_missing_or_empty() {
        assert_eq!(normalize_folder(None), DEFAULT_FOLDER);
        assert_eq!(normalize_folder(Some("")), DEFAULT_FOLDER);
        assert_eq!(normalize_folder(Some("///")), DEFAULT_FOLDER);
    }

    #[test]
    fn object_keys_are_unique_per_call() {
        let a = build_object_key("card.png", Some("cards"));
        let b = build_object_key("card.png", Some("cards"));
        assert_ne!(a, b);
        assert!(a.starts_with("cards/"));
        assert!(a.ends_with("-card.png"));
    }

    #[test]
    fn object_key_without_usable_file_name_is_just_the_token() {
        let key = build_object_key("", None);
        let parts: Vec<&str> = key.splitn(2, '/').collect();
        assert_eq!(parts[0], DEFAULT_FOLDER);
        assert!(Uuid::parse_str(parts[1]).is_ok());
    }

    #[test]
    fn public_url_prefers_custom_endpoint() {
        assert_eq!(
            build_public_url(Some("http://localhost:9000/"), "cards", "us-east-1", "a/b"),
            "http://localhost:9000/cards/a/b"
        );
        assert_eq!(
            build_public_url(None, "cards", "eu-west-2", "a/b"),
            "https://cards.s3.eu-west-2.amazonaws.com/a/b"
        );
    }

    #[test]
    fn percent_is_floored_and_clamped() {
        assert_eq!(calculate_percent(0, 0), None);
        assert_eq!(calculate_percent(0, 100), Some(0));
        assert_eq!(calculate_percent(999, 1000), Some(99));
        assert_eq!(calculate_percent(1000, 1000), Some(100));
        assert_eq!(calculate_percent(2000, 1000), Some(100));
    }

    #[test]
    fn metadata_merge_omits_empty_fields() {
        let payload = CreateMediaUpload {
            title: Some("Charizard".to_string()),
            description: Some(String::new()),
            tags: Some(vec![]),
            metadata: None,
            folder: None,
        };
        let merged = merge_metadata(&payload).unwrap();
        assert_eq!(merged, json!({"title": "Charizard"}));

        assert!(merge_metadata(&CreateMediaUpload::default()).is_none());
    }

    #[test]
    fn metadata_merge_includes_caller_map() {
        let mut extra = serde_json::Map::new();
        extra.insert("set".to_string(), json!("base"));
        let payload = CreateMediaUpload {
            title: None,
            description: None,
            tags: Some(vec!["rare".to_string()]),
            metadata: Some(extra),
            folder: None,
        };
        let merged = merge_metadata(&payload).unwrap();
        assert_eq!(merged, json!({"tags": ["rare"], "set": "base"}));
    }

    #[test]
    fn storage_metadata_is_string_only() {
        let metadata = json!({
            "title": "Charizard",
            "tags": ["rare", "holo"],
            "grade": 9.5,
            "notes": null,
        });
        let out = to_storage_metadata(Some(&metadata));
        assert_eq!(out.get("title").unwrap(), "Charizard");
        assert_eq!(out.get("tags").unwrap(), r#"["rare","holo"]"#);
        assert_eq!(out.get("grade").unwrap(), "9.5");
        assert!(!out.contains_key("notes"));
    }

    #[test]
    fn storage_metadata_empty_for_missing_or_non_object() {
        assert!(to_storage_metadata(None).is_empty());
        assert!(to_storage_metadata(Some(&json!("scalar"))).is_empty());
    }
}
