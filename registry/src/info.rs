use serde::Deserialize;

/// `info.json`, tolerant of missing fields and of the file being entirely
/// absent or malformed (§4.2 edge-case policy).
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PluginInfo {
    pub name: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub version: Option<String>,
}

impl PluginInfo {
    /// Load `info.json` from `path`, falling back to an empty (default)
    /// descriptor if the file doesn't exist. A present-but-unparsable file
    /// is reported through the `errf` callback and also falls back to
    /// empty, matching `backend.py`'s `failed` flag.
    pub fn load_tolerant(
        path: &std::path::Path,
        mut errf: impl FnMut(&std::path::Path, &serde_json::Error),
    ) -> PluginInfo {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => return PluginInfo::default(),
        };
        match serde_json::from_str(&text) {
            Ok(info) => info,
            Err(e) => {
                errf(path, &e);
                PluginInfo::default()
            }
        }
    }

    /// Display name: `info.json`'s `name` field, or the directory key if
    /// absent/empty.
    pub fn display_name(&self, key: &str) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => key.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_default() {
        let info = PluginInfo::load_tolerant(std::path::Path::new("/no/such/info.json"), |_, _| {
            panic!("should not be called for a missing file")
        });
        assert!(info.name.is_none());
    }

    #[test]
    fn malformed_file_reports_and_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("info.json");
        std::fs::write(&path, "{not json").unwrap();
        let mut called = false;
        let info = PluginInfo::load_tolerant(&path, |_, _| called = true);
        assert!(called);
        assert!(info.name.is_none());
    }

    #[test]
    fn name_defaults_to_key() {
        let info = PluginInfo::default();
        assert_eq!(info.display_name("Brightness"), "Brightness");
    }
}
