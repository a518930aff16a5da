//! Per-directory build-staleness hashing (C8, spec §4.8/§6.2).
//!
//! Hashes every `.c`/`.cpp` file under a plug-in directory and stores the
//! digest, keyed by platform tag, in a `.hash` file alongside it — so a
//! CLI/build tool can tell whether a compiled `main_<sys>_<arch>.<ext>` is
//! stale without recompiling. Grounded on
//! `original_source/CompileManager.py`'s `generate_hash`/`save_hash`/
//! `verify_hash`; the `hash_appended` duplicate-line ambiguity flagged in
//! spec.md §9 is resolved here as "keep the first matching platform line,
//! drop the rest" (SPEC_FULL.md §4.1).

mod error;

pub use error::{Error, Result};

use std::path::Path;

use img2arr_platform::PlatformTag;
use sha2::{Digest, Sha256};

const HASH_FILE_NAME: &str = ".hash";

fn io_err(path: &Path, source: std::io::Error) -> Error {
    Error::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Concatenates the bytes of every `.c`/`.cpp` file under `dir` (in
/// `walkdir`'s directory-walk order, stable per invocation) and returns the
/// SHA-256 digest as lowercase hex.
pub fn generate_hash(dir: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    for entry in walkdir::WalkDir::new(dir) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            Error::Io {
                path,
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            }
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_source = entry
            .path()
            .extension()
            .is_some_and(|ext| ext == "c" || ext == "cpp");
        if !is_source {
            continue;
        }
        let bytes = std::fs::read(entry.path()).map_err(|e| io_err(entry.path(), e))?;
        hasher.update(&bytes);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Rewrites `.hash`'s lines for `platform_tag`, keeping the first matching
/// line (replacing its hash) and dropping any further duplicates for that
/// platform; appends a fresh line only if no match existed.
fn rewrite_lines(existing: &str, platform_tag: &str, new_hash: &str) -> String {
    let mut out = String::new();
    let mut replaced = false;
    for line in existing.lines() {
        let Some((tag, _hash)) = line.split_once(':') else {
            continue;
        };
        if tag == platform_tag {
            if !replaced {
                out.push_str(platform_tag);
                out.push(':');
                out.push_str(new_hash);
                out.push('\n');
                replaced = true;
            }
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }
    if !replaced {
        out.push_str(platform_tag);
        out.push(':');
        out.push_str(new_hash);
        out.push('\n');
    }
    out
}

/// Hashes `dir` and replaces `platform`'s line in `dir/.hash` (creating the
/// file if absent).
pub fn save_hash(dir: &Path, platform: &PlatformTag) -> Result<()> {
    let hash_path = dir.join(HASH_FILE_NAME);
    let existing = match std::fs::read_to_string(&hash_path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(io_err(&hash_path, e)),
    };
    let new_hash = generate_hash(dir)?;
    let rewritten = rewrite_lines(&existing, &platform.tag_string(), &new_hash);
    std::fs::write(&hash_path, rewritten).map_err(|e| io_err(&hash_path, e))?;
    log::debug!("saved build hash for {}", dir.display());
    Ok(())
}

/// Whether `dir`'s current source hash matches the stored line for
/// `platform`. A missing `.hash` file or a missing platform line both mean
/// "needs rebuild" (§6.2) and return `Ok(false)` rather than an error.
pub fn verify_hash(dir: &Path, platform: &PlatformTag) -> Result<bool> {
    let hash_path = dir.join(HASH_FILE_NAME);
    let existing = match std::fs::read_to_string(&hash_path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(io_err(&hash_path, e)),
    };
    let target = generate_hash(dir)?;
    let platform_tag = platform.tag_string();
    for line in existing.lines() {
        let Some((tag, hash)) = line.split_once(':') else {
            continue;
        };
        if tag == platform_tag {
            return Ok(hash == target);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn generate_hash_is_stable_for_unchanged_sources() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main.c", "int main() { return 0; }");
        let a = generate_hash(dir.path()).unwrap();
        let b = generate_hash(dir.path()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn generate_hash_changes_with_source() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main.c", "int main() { return 0; }");
        let a = generate_hash(dir.path()).unwrap();
        write(dir.path(), "main.c", "int main() { return 1; }");
        let b = generate_hash(dir.path()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn generate_hash_ignores_non_source_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main.c", "int main() { return 0; }");
        let a = generate_hash(dir.path()).unwrap();
        write(dir.path(), "info.json", r#"{"name":"x"}"#);
        let b = generate_hash(dir.path()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn verify_hash_true_immediately_after_save() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main.c", "int main() { return 0; }");
        let platform = PlatformTag::from_raw("linux", "x86_64");
        save_hash(dir.path(), &platform).unwrap();
        assert_eq!(verify_hash(dir.path(), &platform).unwrap(), true);
    }

    #[test]
    fn verify_hash_false_when_source_changes_after_save() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main.c", "int main() { return 0; }");
        let platform = PlatformTag::from_raw("linux", "x86_64");
        save_hash(dir.path(), &platform).unwrap();
        write(dir.path(), "main.c", "int main() { return 2; }");
        assert_eq!(verify_hash(dir.path(), &platform).unwrap(), false);
    }

    #[test]
    fn verify_hash_false_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let platform = PlatformTag::from_raw("linux", "x86_64");
        assert_eq!(verify_hash(dir.path(), &platform).unwrap(), false);
    }

    #[test]
    fn verify_hash_false_when_platform_line_missing() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main.c", "int main() { return 0; }");
        let linux = PlatformTag::from_raw("linux", "x86_64");
        save_hash(dir.path(), &linux).unwrap();
        let windows = PlatformTag::from_raw("windows", "x86_64");
        assert_eq!(verify_hash(dir.path(), &windows).unwrap(), false);
    }

    #[test]
    fn save_hash_replaces_only_the_matching_platform_line() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main.c", "int main() { return 0; }");
        let linux = PlatformTag::from_raw("linux", "x86_64");
        let windows = PlatformTag::from_raw("windows", "x86_64");
        save_hash(dir.path(), &linux).unwrap();
        save_hash(dir.path(), &windows).unwrap();

        write(dir.path(), "main.c", "int main() { return 5; }");
        save_hash(dir.path(), &linux).unwrap();

        assert_eq!(verify_hash(dir.path(), &linux).unwrap(), true);
        // windows' line is untouched and now stale relative to the new source.
        assert_eq!(verify_hash(dir.path(), &windows).unwrap(), false);

        let contents = std::fs::read_to_string(dir.path().join(".hash")).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn rewrite_lines_keeps_first_duplicate_and_drops_the_rest() {
        let existing = "linux_x86_64:aaa\nlinux_x86_64:bbb\nwindows_x86_64:ccc\n";
        let rewritten = rewrite_lines(existing, "linux_x86_64", "new");
        let lines: Vec<&str> = rewritten.lines().collect();
        assert_eq!(lines, vec!["linux_x86_64:new", "windows_x86_64:ccc"]);
    }
}
