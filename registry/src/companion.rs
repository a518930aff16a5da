//! The optional scripted companion that accompanies a native plug-in
//! (§4.2 `SCRIPTED_UI`, §9 "duck-typed companion interfaces").
//!
//! The companion's actual script is opaque to the core — only the UI
//! collaborator knows how to run it — so all the registry does is record
//! the path and which of the well-known hooks the companion is expected to
//! provide, modeled as a capability set rather than a single fat trait. A
//! companion implements any subset of [`Companion`]; the default methods
//! are no-ops, mirroring `abcExt.UI`'s pattern of leaving most hooks as
//! `...` (unimplemented) stubs in the Python original.

use std::path::{Path, PathBuf};

bitflags::bitflags! {
    /// Which optional hooks a companion declares, probed once at bind time
    /// rather than re-checked on every call.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct CompanionCapabilities: u8 {
        const UPDATE = 0b0001;
        const UPDATE_END = 0b0010;
        const UPDATE_PREVIEW = 0b0100;
        const UI_INIT = 0b1000;
    }
}

/// Callback table a companion is bound with, replacing the weak
/// back-reference the Python UI held to the pipeline (§9 DESIGN NOTES).
pub trait CompanionCallbacks: Send + Sync {
    fn notify_update(&self) {}
    fn update_tip_text(&self, _text: &str) {}
    fn update_preview_text(&self, _text: &str) {}
}

/// A companion capable of contributing interactive parameter controls to
/// the UI collaborator. The core never calls these methods itself; it only
/// records presence via [`CompanionCapabilities`] and hands the descriptor
/// to whichever collaborator knows how to drive a scripted companion.
pub trait Companion {
    fn capabilities(&self) -> CompanionCapabilities {
        CompanionCapabilities::empty()
    }
}

/// A discovered-but-unopened companion script: just a path, until the UI
/// collaborator loads it.
#[derive(Clone, Debug)]
pub struct CompanionHandle {
    path: PathBuf,
}

impl CompanionHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CompanionHandle { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
