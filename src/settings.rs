// Read-only settings lookup injected by the embedding application. The
// engine only consumes a handful of advanced knobs; persistence stays
// outside the crate.
use serde_json::Value;

/// Key for the recursive enumeration depth cap.
pub const MAX_FOLDER_DEPTH_KEY: &str = "Advanced/maxFolderDepth";

pub const DEFAULT_MAX_FOLDER_DEPTH: usize = 32;

pub trait SettingsProvider: Send + Sync {
    /// Slash-separated key lookup, e.g. `Advanced/maxFolderDepth`.
    fn get_int(&self, key: &str) -> Option<i64>;
}

/// Settings backed by a JSON tree, e.g. deserialized from the application's
/// config file. Keys address nested objects with `/` separators.
pub struct JsonSettings {
    root: Value,
}

impl JsonSettings {
    pub fn new(root: Value) -> Self {
        Self { root }
    }
}

impl SettingsProvider for JsonSettings {
    fn get_int(&self, key: &str) -> Option<i64> {
        let mut cur = &self.root;
        for seg in key.split('/') {
            cur = cur.get(seg)?;
        }
        cur.as_i64()
    }
}

/// Resolve the enumeration depth cap: configured value when sane, default
/// 32 otherwise. Values below 1 fall back to the default.
pub(crate) fn resolve_max_folder_depth(settings: Option<&dyn SettingsProvider>) -> usize {
    match settings.and_then(|s| s.get_int(MAX_FOLDER_DEPTH_KEY)) {
        Some(v) if v >= 1 => v as usize,
        _ => DEFAULT_MAX_FOLDER_DEPTH,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_settings_nested_lookup() {
        let s = JsonSettings::new(json!({ "Advanced": { "maxFolderDepth": 8 } }));
        assert_eq!(s.get_int(MAX_FOLDER_DEPTH_KEY), Some(8));
        assert_eq!(s.get_int("Advanced/unknown"), None);
        assert_eq!(s.get_int("Other/maxFolderDepth"), None);
    }

    #[test]
    fn depth_defaults_and_floor() {
        assert_eq!(resolve_max_folder_depth(None), 32);

        let low = JsonSettings::new(json!({ "Advanced": { "maxFolderDepth": 0 } }));
        assert_eq!(resolve_max_folder_depth(Some(&low)), 32);

        let neg = JsonSettings::new(json!({ "Advanced": { "maxFolderDepth": -3 } }));
        assert_eq!(resolve_max_folder_depth(Some(&neg)), 32);

        let ok = JsonSettings::new(json!({ "Advanced": { "maxFolderDepth": 4 } }));
        assert_eq!(resolve_max_folder_depth(Some(&ok)), 4);
    }
}
