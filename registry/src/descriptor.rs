use std::path::PathBuf;

use crate::companion::CompanionHandle;
use crate::info::PluginInfo;
use crate::native::NativeModule;
use crate::stage::Stage;

/// One discovered plug-in directory, fully resolved (§3 "Plug-in
/// descriptor").
pub struct PluginDescriptor {
    pub stage: Stage,
    pub category: String,
    pub key: String,
    pub info: PluginInfo,
    pub dir: PathBuf,
    pub native: Option<NativeModule>,
    pub scripted_ui: Option<CompanionHandle>,
}

impl PluginDescriptor {
    /// Display name: `info.json`'s name, falling back to the directory key.
    pub fn display_name(&self) -> String {
        self.info.display_name(&self.key)
    }

    pub fn expected_signature_prefix(&self) -> String {
        format!("img2arr.{}.{}.", self.stage.as_str(), self.category)
    }
}
