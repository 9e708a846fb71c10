//! Shadow profile builder.
//!
//! Chromium refuses remote debugging on the profile that is already open in
//! the user's live browser, so we mirror that profile into a writable clone
//! under the OS temp area and debug the clone. The mirror skips cache-only
//! folders, carries the top-level `Local State` file verbatim (it holds the
//! keys needed to decrypt cookies and passwords) and is re-runnable: a second
//! build updates in place and drops files that vanished from the source.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::HostError;

/// Chromium's per-profile singleton markers. Leftovers from a killed browser
/// make a fresh launch exit instantly and silently.
pub const SINGLETON_LOCKS: [&str; 3] = ["SingletonLock", "SingletonCookie", "SingletonSocket"];

/// Profile subpaths that are pure cache and must not be mirrored.
const EXCLUDED_SUBPATHS: &[&str] = &[
    "Cache",
    "Code Cache",
    "GPUCache",
    "ShaderCache",
    "GrShaderCache",
    "DawnCache",
    "Safe Browsing",
    "Service Worker/CacheStorage",
    "Service Worker/ScriptCache",
    "VideoDecodeStats",
    "History Provider Cache",
    "Crashpad",
];

#[derive(Clone, Copy, Debug, Default)]
pub struct MirrorStats {
    pub copied: u64,
    pub skipped: u64,
    pub deleted: u64,
    pub locked: u64,
}

/// Platform-conventional location of the user's default Chrome data dir.
pub fn default_user_data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        dirs::data_local_dir().map(|d| d.join("Google").join("Chrome").join("User Data"))
    }

    #[cfg(target_os = "macos")]
    {
        dirs::config_dir().map(|d| d.join("Google").join("Chrome"))
    }

    #[cfg(all(not(target_os = "windows"), not(target_os = "macos")))]
    {
        let config = dirs::config_dir()?;
        let chrome = config.join("google-chrome");
        if chrome.exists() {
            return Some(chrome);
        }
        let chromium = config.join("chromium");
        if chromium.exists() {
            return Some(chromium);
        }
        Some(chrome)
    }
}

/// Stable shadow location for a given source data dir. Not cleaned on exit;
/// the next build reuses and updates it.
pub fn shadow_root_for(source_root: &Path) -> PathBuf {
    let mut hasher = DefaultHasher::new();
    source_root.hash(&mut hasher);
    std::env::temp_dir().join(format!("chromehand-shadow-{:016x}", hasher.finish()))
}

/// Mirror `<source_root>/<profile>` (plus `Local State`) into the shadow
/// location and return the shadow data dir to launch against.
pub fn build_shadow_profile(source_root: &Path, profile_name: &str) -> Result<PathBuf, HostError> {
    let source_profile = source_root.join(profile_name);
    if !source_profile.is_dir() {
        return Err(HostError::Profile(format!(
            "profile directory not found: {}",
            source_profile.display()
        )));
    }

    let shadow_root = shadow_root_for(source_root);
    let shadow_profile = shadow_root.join(profile_name);
    fs::create_dir_all(&shadow_profile)?;

    let mut stats = MirrorStats::default();
    mirror_dir(&source_profile, &shadow_profile, Path::new(""), &mut stats)?;

    // Local State lives next to the profiles and holds the os_crypt key.
    let local_state_src = source_root.join("Local State");
    if local_state_src.is_file() {
        match fs::copy(&local_state_src, shadow_root.join("Local State")) {
            Ok(_) => {}
            Err(err) => {
                warn!(target: "browser-host", %err, "could not copy Local State; encrypted data may be unreadable");
            }
        }
    }

    remove_singleton_locks(source_root, profile_name);
    remove_singleton_locks(&shadow_root, profile_name);

    info!(
        target: "browser-host",
        shadow = %shadow_root.display(),
        copied = stats.copied,
        skipped = stats.skipped,
        deleted = stats.deleted,
        locked = stats.locked,
        "shadow profile ready"
    );

    Ok(shadow_root)
}

/// Delete stale singleton lock files from both layout levels of a data dir.
pub fn remove_singleton_locks(data_dir: &Path, profile_name: &str) {
    for name in SINGLETON_LOCKS {
        for dir in [data_dir.to_path_buf(), data_dir.join(profile_name)] {
            let path = dir.join(name);
            // symlinks (SingletonLock on Linux) report !exists(); try anyway
            match fs::remove_file(&path) {
                Ok(()) => debug!(target: "browser-host", path = %path.display(), "removed stale lock"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(target: "browser-host", path = %path.display(), %err, "could not remove lock file")
                }
            }
        }
    }
}

fn is_excluded(rel: &Path) -> bool {
    let rel = rel.to_string_lossy().replace('\\', "/");
    EXCLUDED_SUBPATHS
        .iter()
        .any(|ex| rel == *ex || rel.starts_with(&format!("{ex}/")))
}

/// Recursive, resumable mirror: copies changed files, skips unchanged ones,
/// deletes destination entries missing from the source, and tolerates files
/// the live browser holds locked.
fn mirror_dir(
    src: &Path,
    dst: &Path,
    rel: &Path,
    stats: &mut MirrorStats,
) -> Result<(), HostError> {
    fs::create_dir_all(dst)?;

    let mut source_names = std::collections::HashSet::new();

    let entries = match fs::read_dir(src) {
        Ok(entries) => entries,
        Err(err) => {
            stats.locked += 1;
            warn!(target: "browser-host", dir = %src.display(), %err, "unreadable directory skipped");
            return Ok(());
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => {
                stats.locked += 1;
                continue;
            }
        };
        let name = entry.file_name();
        let child_rel = rel.join(&name);
        if is_excluded(&child_rel) {
            continue;
        }
        if SINGLETON_LOCKS
            .iter()
            .any(|lock| name.to_string_lossy() == *lock)
        {
            continue;
        }
        source_names.insert(name.clone());

        let src_path = entry.path();
        let dst_path = dst.join(&name);
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(_) => {
                stats.locked += 1;
                continue;
            }
        };

        if file_type.is_dir() {
            mirror_dir(&src_path, &dst_path, &child_rel, stats)?;
        } else if file_type.is_file() {
            if file_unchanged(&src_path, &dst_path) {
                stats.skipped += 1;
                continue;
            }
            match fs::copy(&src_path, &dst_path) {
                Ok(_) => stats.copied += 1,
                Err(err) => {
                    stats.locked += 1;
                    debug!(target: "browser-host", file = %src_path.display(), %err, "locked file skipped");
                }
            }
        }
        // symlinks and specials are intentionally not mirrored
    }

    // delete extraneous destination entries so the mirror converges
    if let Ok(entries) = fs::read_dir(dst) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let child_rel = rel.join(&name);
            if source_names.contains(&name) || is_excluded(&child_rel) {
                continue;
            }
            let path = entry.path();
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match removed {
                Ok(()) => stats.deleted += 1,
                Err(err) => {
                    warn!(target: "browser-host", path = %path.display(), %err, "could not delete extraneous entry")
                }
            }
        }
    }

    Ok(())
}

fn file_unchanged(src: &Path, dst: &Path) -> bool {
    let (Ok(src_meta), Ok(dst_meta)) = (fs::metadata(src), fs::metadata(dst)) else {
        return false;
    };
    if src_meta.len() != dst_meta.len() {
        return false;
    }
    match (src_meta.modified(), dst_meta.modified()) {
        (Ok(src_time), Ok(dst_time)) => src_time <= dst_time,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn tree(root: &Path) -> Vec<(String, String)> {
        let mut out = Vec::new();
        fn walk(root: &Path, base: &Path, out: &mut Vec<(String, String)>) {
            for entry in fs::read_dir(root).unwrap().flatten() {
                let path = entry.path();
                if path.is_dir() {
                    walk(&path, base, out);
                } else {
                    let rel = path.strip_prefix(base).unwrap().to_string_lossy().replace('\\', "/");
                    out.push((rel, fs::read_to_string(&path).unwrap_or_default()));
                }
            }
        }
        walk(root, root, &mut out);
        out.sort();
        out
    }

    #[test]
    fn mirror_skips_caches_and_lock_files() {
        let src = tempdir().unwrap();
        let root = src.path();
        write(&root.join("Default/Preferences"), "{}");
        write(&root.join("Default/Cookies"), "sqlite");
        write(&root.join("Default/Cache/data_0"), "junk");
        write(&root.join("Default/Code Cache/js/x"), "junk");
        write(&root.join("Default/Service Worker/CacheStorage/a"), "junk");
        write(&root.join("Default/Service Worker/Database/db"), "keep");
        write(&root.join("Default/SingletonLock"), "");
        write(&root.join("Local State"), "{\"os_crypt\":{}}");

        let shadow = build_shadow_profile(root, "Default").unwrap();

        assert!(shadow.join("Default/Preferences").is_file());
        assert!(shadow.join("Default/Cookies").is_file());
        assert!(shadow.join("Default/Service Worker/Database/db").is_file());
        assert!(shadow.join("Local State").is_file());
        assert!(!shadow.join("Default/Cache").exists());
        assert!(!shadow.join("Default/Code Cache").exists());
        assert!(!shadow.join("Default/Service Worker/CacheStorage").exists());
        assert!(!shadow.join("Default/SingletonLock").exists());

        fs::remove_dir_all(shadow).unwrap();
    }

    #[test]
    fn mirror_is_idempotent_and_deletes_removed_files() {
        let src = tempdir().unwrap();
        let root = src.path();
        write(&root.join("Default/Preferences"), "v1");
        write(&root.join("Default/History"), "h");

        let shadow = build_shadow_profile(root, "Default").unwrap();
        let first = tree(&shadow);
        let again = build_shadow_profile(root, "Default").unwrap();
        assert_eq!(first, tree(&again), "unchanged source must converge");

        fs::remove_file(root.join("Default/History")).unwrap();
        write(&root.join("Default/Preferences"), "v2-longer");
        let third = build_shadow_profile(root, "Default").unwrap();
        assert!(!third.join("Default/History").exists());
        assert_eq!(
            fs::read_to_string(third.join("Default/Preferences")).unwrap(),
            "v2-longer"
        );

        fs::remove_dir_all(shadow).unwrap();
    }

    #[test]
    fn lock_removal_covers_both_layout_levels() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("SingletonLock"), "");
        write(&root.join("Default/SingletonCookie"), "");
        remove_singleton_locks(root, "Default");
        assert!(!root.join("SingletonLock").exists());
        assert!(!root.join("Default/SingletonCookie").exists());
    }

    #[test]
    fn shadow_root_is_stable_per_source() {
        let a = shadow_root_for(Path::new("/home/u/.config/google-chrome"));
        let b = shadow_root_for(Path::new("/home/u/.config/google-chrome"));
        let c = shadow_root_for(Path::new("/home/u/.config/chromium"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
