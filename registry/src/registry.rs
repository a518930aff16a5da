//! The plug-in registry (C2, §4.2): discovers plug-in directories, loads
//! `info.json`, and—when requested—loads and validates the native module
//! and records the scripted companion's path.

use fxhash::FxHashMap;
use std::path::{Path, PathBuf};

use crate::descriptor::PluginDescriptor;
use crate::error::Error;
use crate::info::PluginInfo;
use crate::native;
use crate::stage::Stage;
use crate::CompanionHandle;
use img2arr_platform::PlatformTag;

bitflags::bitflags! {
    /// Which optional features `scan` should attempt to load for each
    /// plug-in directory found (§4.2).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Features: u8 {
        const NATIVE = 0b01;
        const SCRIPTED_UI = 0b10;
    }
}

impl Default for Features {
    fn default() -> Self {
        Features::NATIVE
    }
}

type CategoryMap = FxHashMap<String, FxHashMap<String, PluginDescriptor>>;

/// `registry[stage][category][key] -> descriptor`, the fixed-shape
/// replacement for the nested associative arrays `ExtList`/`ExtItem` used
/// in `backend.py` (§9 DESIGN NOTES).
#[derive(Default)]
pub struct Registry {
    stages: FxHashMap<Stage, CategoryMap>,
}

impl Registry {
    pub fn get(&self, stage: Stage, category: &str, key: &str) -> Result<&PluginDescriptor, Error> {
        self.stages
            .get(&stage)
            .and_then(|categories| categories.get(category))
            .and_then(|keys| keys.get(key))
            .ok_or_else(|| Error::PluginNotFound {
                stage,
                category: category.to_string(),
                key: key.to_string(),
            })
    }

    /// Inserts a descriptor directly, bypassing `scan`'s filesystem walk.
    /// Used by `scan` itself, and by downstream crates' tests to assemble a
    /// [`Registry`] around [`crate::NativeModule::synthetic`] plug-ins.
    pub fn insert(&mut self, descriptor: PluginDescriptor) {
        self.stages
            .entry(descriptor.stage)
            .or_default()
            .entry(descriptor.category.clone())
            .or_default()
            .insert(descriptor.key.clone(), descriptor);
    }

    pub fn iter(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.stages
            .values()
            .flat_map(|categories| categories.values())
            .flat_map(|keys| keys.values())
    }
}

/// Walk `root/<stage>/<category>/<key>/` and build a [`Registry`].
///
/// Per-plug-in failures (missing native module, bad signature, init
/// failure) are reported through `errf` and drop only that plug-in; the
/// scan as a whole never fails because of one bad directory (§4.2, §7).
pub fn scan(
    root: &Path,
    features: Features,
    platform: &PlatformTag,
    mut errf: impl FnMut(&Path, &Error),
) -> Registry {
    let mut registry = Registry::default();

    for stage in Stage::ALL {
        let stage_dir = root.join(stage.as_str());
        let Ok(categories) = std::fs::read_dir(&stage_dir) else {
            continue;
        };
        for category_entry in categories.flatten() {
            if !category_entry.path().is_dir() {
                continue;
            }
            let category = category_entry.file_name().to_string_lossy().into_owned();
            let Ok(keys) = std::fs::read_dir(category_entry.path()) else {
                continue;
            };
            for key_entry in keys.flatten() {
                let dir = key_entry.path();
                if !dir.is_dir() {
                    continue;
                }
                let key = key_entry.file_name().to_string_lossy().into_owned();
                if let Some(descriptor) =
                    load_one(stage, &category, &key, &dir, features, platform, &mut errf)
                {
                    registry.insert(descriptor);
                }
            }
        }
    }

    registry
}

fn load_one(
    stage: Stage,
    category: &str,
    key: &str,
    dir: &Path,
    features: Features,
    platform: &PlatformTag,
    errf: &mut impl FnMut(&Path, &Error),
) -> Option<PluginDescriptor> {
    let info = PluginInfo::load_tolerant(&dir.join("info.json"), |path, e| {
        errf(
            path,
            &Error::BadInfoJson {
                path: path.to_path_buf(),
                message: e.to_string(),
            },
        )
    });

    let mut descriptor = PluginDescriptor {
        stage,
        category: category.to_string(),
        key: key.to_string(),
        info,
        dir: dir.to_path_buf(),
        native: None,
        scripted_ui: None,
    };

    if features.contains(Features::NATIVE) {
        match load_native(&descriptor, dir, platform) {
            Ok(module) => descriptor.native = Some(module),
            Err(e) => {
                errf(dir, &e);
                return None;
            }
        }
    }

    if features.contains(Features::SCRIPTED_UI) {
        let companion_path = find_companion(dir);
        descriptor.scripted_ui = companion_path.map(CompanionHandle::new);
    }

    Some(descriptor)
}

fn load_native(
    descriptor: &PluginDescriptor,
    dir: &Path,
    platform: &PlatformTag,
) -> Result<native::NativeModule, Error> {
    let soext = platform
        .shared_object_ext()
        .ok_or_else(|| Error::UnsupportedPlatform(platform.tag_string()))?;
    let file_name = format!("main_{}_{}.{}", platform.system, platform.arch, soext);
    let path = dir.join(&file_name);
    if !path.is_file() {
        return Err(Error::NativeModuleMissing(path));
    }
    native::load(
        &path,
        &descriptor.expected_signature_prefix(),
        descriptor.stage.requires_view_path(),
    )
}

fn find_companion(dir: &Path) -> Option<PathBuf> {
    let candidate = dir.join("ext.py");
    if candidate.is_file() {
        Some(candidate)
    } else {
        None
    }
}
