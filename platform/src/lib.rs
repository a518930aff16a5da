//! Platform tag normalization (C1).
//!
//! Turns whatever `std::env::consts` (or a caller-supplied OS/arch pair)
//! reports into the lowercase `{system}_{arch}` tag that plug-in file names
//! and `.hash` entries key off of, the same normalization `SpecialArch.py`
//! performed for the Python backend this crate replaces.

use std::fmt;

/// A normalized `(system, arch)` pair, e.g. `("linux", "x86_64")`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PlatformTag {
    pub system: String,
    pub arch: String,
}

impl PlatformTag {
    /// Detect the running platform's tag.
    pub fn current() -> Self {
        Self::from_raw(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Normalize an arbitrary `(system, arch)` pair, lowercasing and
    /// applying the architecture alias table.
    pub fn from_raw(system: &str, arch: &str) -> Self {
        PlatformTag {
            system: system.to_lowercase(),
            arch: normalize_arch(arch),
        }
    }

    /// The shared-object file extension for this platform's `system`.
    ///
    /// Unknown systems are only an error once a caller actually needs to
    /// load a shared object for them; callers that just want the tag string
    /// (e.g. for a `.hash` line) may ignore this.
    pub fn shared_object_ext(&self) -> Option<&'static str> {
        match self.system.as_str() {
            "windows" => Some("dll"),
            "linux" => Some("so"),
            "darwin" | "macos" => Some("dylib"),
            _ => None,
        }
    }

    /// `"{system}_{arch}"`, the key used in plug-in file names and `.hash`
    /// lines.
    pub fn tag_string(&self) -> String {
        format!("{}_{}", self.system, self.arch)
    }
}

impl fmt::Display for PlatformTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag_string())
    }
}

/// Architecture aliases seen across `platform.machine()` / `uname -m` on
/// different OSes, normalized to a single canonical name each.
fn normalize_arch(arch: &str) -> String {
    let arch = arch.to_lowercase();
    let normalized = match arch.as_str() {
        "amd64" | "x64" | "x86_64h" => "x86_64",
        "i386" | "i486" | "i586" | "i686" => "x86",
        "arm64" | "arm64e" | "armv8" | "aarch64" => "aarch64",
        "armv6hl" | "armv6" | "armv7l" | "armv7" => "arm",
        other => other,
    };
    normalized.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_normalize() {
        assert_eq!(normalize_arch("amd64"), "x86_64");
        assert_eq!(normalize_arch("AMD64"), "x86_64");
        assert_eq!(normalize_arch("arm64"), "aarch64");
        assert_eq!(normalize_arch("armv7l"), "arm");
        assert_eq!(normalize_arch("x86_64"), "x86_64");
    }

    #[test]
    fn tag_string_lowercases_system() {
        let tag = PlatformTag::from_raw("Linux", "x86_64");
        assert_eq!(tag.tag_string(), "linux_x86_64");
    }

    #[test]
    fn shared_object_ext_known_systems() {
        assert_eq!(
            PlatformTag::from_raw("windows", "x86_64").shared_object_ext(),
            Some("dll")
        );
        assert_eq!(
            PlatformTag::from_raw("linux", "x86_64").shared_object_ext(),
            Some("so")
        );
        assert_eq!(
            PlatformTag::from_raw("darwin", "aarch64").shared_object_ext(),
            Some("dylib")
        );
        assert_eq!(
            PlatformTag::from_raw("plan9", "x86_64").shared_object_ext(),
            None
        );
    }
}
