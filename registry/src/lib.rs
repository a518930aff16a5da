//! Plug-in registry and loader (C2).
//!
//! Discovers `<root>/<stage>/<category>/<key>/` directories, loads
//! `info.json` tolerantly, and validates+binds each plug-in's native ABI
//! (§4.2, §6.3). Grounded on `extension_runtime`/`plugin`'s libloading
//! usage in the teacher repository.

mod companion;
mod descriptor;
mod error;
mod info;
mod native;
mod stage;

#[allow(clippy::module_inception)]
mod registry;

pub use companion::{Companion, CompanionCallbacks, CompanionCapabilities, CompanionHandle};
pub use descriptor::PluginDescriptor;
pub use error::{Error, Result};
pub use info::PluginInfo;
pub use native::{Attributes, EntryKind, F0Fn, F1Fn, IoGetOutInfoFn, IoGetViewOutInfoFn, NativeModule};
pub use registry::{scan, Features, Registry};
pub use stage::Stage;

#[cfg(test)]
mod tests {
    use super::*;
    use img2arr_platform::PlatformTag;

    #[test]
    fn scan_empty_root_yields_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let mut errors = Vec::new();
        let registry = scan(dir.path(), Features::NATIVE, &PlatformTag::current(), |p, e| {
            errors.push((p.to_path_buf(), e.to_string()))
        });
        assert!(errors.is_empty());
        assert_eq!(registry.iter().count(), 0);
    }

    #[test]
    fn scan_drops_plugin_without_native_module() {
        let dir = tempfile::tempdir().unwrap();
        let plugin_dir = dir.path().join("prep").join("img").join("NoNative");
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(plugin_dir.join("info.json"), r#"{"name":"NoNative"}"#).unwrap();

        let mut errors = Vec::new();
        let registry = scan(dir.path(), Features::NATIVE, &PlatformTag::current(), |p, e| {
            errors.push((p.to_path_buf(), e.to_string()))
        });
        assert_eq!(registry.iter().count(), 0);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn get_unknown_plugin_reports_plugin_not_found() {
        let registry = Registry::default();
        let err = registry.get(Stage::Prep, "img", "Brightness").unwrap_err();
        assert!(matches!(err, Error::PluginNotFound { .. }));
    }
}
