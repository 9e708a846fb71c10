//! Chromium executable discovery.

use std::path::PathBuf;

use which::which;

use crate::error::HostError;

/// Find a Chromium-family executable.
///
/// Order: explicit override from the caller, `$PATH` lookup over platform
/// names, then the well-known install locations.
pub fn locate_chromium(override_path: Option<&PathBuf>) -> Result<PathBuf, HostError> {
    if let Some(path) = override_path {
        if path.exists() {
            return Ok(path.clone());
        }
        return Err(HostError::ChromiumNotFound);
    }

    for name in executable_names() {
        if let Ok(path) = which(name) {
            return Ok(path);
        }
    }

    for candidate in os_install_paths() {
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(HostError::ChromiumNotFound)
}

fn executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(any(target_os = "macos", target_os = "linux", target_os = "freebsd"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        &["chrome"]
    }
}

fn os_install_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let mut paths = Vec::new();
        for key in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
            if let Ok(value) = std::env::var(key) {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    let root = PathBuf::from(trimmed);
                    paths.push(root.join("Google/Chrome/Application/chrome.exe"));
                    paths.push(root.join("Chromium/Application/chrome.exe"));
                    paths.push(root.join("Microsoft/Edge/Application/msedge.exe"));
                }
            }
        }
        paths
    }

    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(any(target_os = "linux", target_os = "freebsd"))]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn explicit_override_wins_when_it_exists() {
        let dir = tempdir().unwrap();
        let exe = dir.path().join("my-chromium");
        fs::write(&exe, b"").unwrap();
        let found = locate_chromium(Some(&exe)).unwrap();
        assert_eq!(found, exe);
    }

    #[test]
    fn missing_override_is_an_error_not_a_fallback() {
        let dir = tempdir().unwrap();
        let exe = dir.path().join("does-not-exist");
        assert!(matches!(
            locate_chromium(Some(&exe)),
            Err(HostError::ChromiumNotFound)
        ));
    }

    #[test]
    fn name_list_is_never_empty() {
        assert!(!executable_names().is_empty());
    }
}
