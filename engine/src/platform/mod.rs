//! Platform-specific utilities
//!
//! Plugins are shared libraries, and every platform names them differently:
//! `libfoo.so` on Linux, `libfoo.dylib` on macOS, `foo.dll` on Windows. This
//! module maps between plugin ids and library file names and identifies
//! candidate plugin files during directory scans.

use std::path::Path;

pub use sdk::manifest::{current_architecture, current_platform};

/// Get the platform-specific shared library extension
///
/// # Examples
///
/// ```
/// use plexus_engine::platform::library_extension;
///
/// let ext = library_extension();
///
/// #[cfg(target_os = "linux")]
/// assert_eq!(ext, "so");
///
/// #[cfg(target_os = "macos")]
/// assert_eq!(ext, "dylib");
///
/// #[cfg(target_os = "windows")]
/// assert_eq!(ext, "dll");
/// ```
pub fn library_extension() -> &'static str {
    #[cfg(target_os = "linux")]
    return "so";

    #[cfg(target_os = "macos")]
    return "dylib";

    #[cfg(target_os = "windows")]
    return "dll";

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    return "so"; // Default to .so for unknown platforms
}

/// Get the platform-specific shared library prefix
///
/// "lib" on Unix, nothing on Windows.
pub fn library_prefix() -> &'static str {
    #[cfg(unix)]
    return "lib";

    #[cfg(windows)]
    return "";
}

/// Construct a platform-specific library filename for a plugin id
///
/// # Examples
///
/// ```
/// use plexus_engine::platform::library_filename;
///
/// let filename = library_filename("audio-mixer");
///
/// #[cfg(target_os = "linux")]
/// assert_eq!(filename, "libaudio-mixer.so");
///
/// #[cfg(target_os = "windows")]
/// assert_eq!(filename, "audio-mixer.dll");
/// ```
pub fn library_filename(name: &str) -> String {
    format!("{}{}.{}", library_prefix(), name, library_extension())
}

/// Whether `path` has the shared library extension of this platform
pub fn is_plugin_library(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(library_extension()))
        .unwrap_or(false)
}

/// Derive a plugin id from its library path
///
/// The file stem with the platform library prefix stripped, so
/// `plugins/libaudio.so` becomes `audio`. Returns `None` for paths without a
/// usable stem.
pub fn plugin_id_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let prefix = library_prefix();
    let id = if !prefix.is_empty() && stem.len() > prefix.len() {
        stem.strip_prefix(prefix).unwrap_or(stem)
    } else {
        stem
    };
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_library_filename() {
        let filename = library_filename("telegram");

        #[cfg(target_os = "linux")]
        assert_eq!(filename, "libtelegram.so");

        #[cfg(target_os = "macos")]
        assert_eq!(filename, "libtelegram.dylib");

        #[cfg(target_os = "windows")]
        assert_eq!(filename, "telegram.dll");
    }

    #[test]
    fn test_plugin_id_roundtrip() {
        let path = PathBuf::from("/opt/plugins").join(library_filename("audio-mixer"));
        assert_eq!(plugin_id_from_path(&path).as_deref(), Some("audio-mixer"));
        assert!(is_plugin_library(&path));
    }

    #[test]
    fn test_plugin_id_without_prefix() {
        let path = PathBuf::from(format!("codec.{}", library_extension()));
        assert_eq!(plugin_id_from_path(&path).as_deref(), Some("codec"));
    }

    #[test]
    fn test_bare_prefix_is_kept() {
        // "lib.so" names a plugin called "lib", not an empty id
        let path = PathBuf::from(format!("lib.{}", library_extension()));
        assert_eq!(plugin_id_from_path(&path).as_deref(), Some("lib"));
    }

    #[test]
    fn test_non_library_files() {
        assert!(!is_plugin_library(Path::new("readme.txt")));
        assert!(!is_plugin_library(Path::new("noextension")));
        assert_eq!(plugin_id_from_path(Path::new("")), None);
    }

    #[test]
    fn test_current_platform() {
        let name = current_platform();
        assert!(!name.is_empty());

        #[cfg(target_os = "linux")]
        assert_eq!(name, "linux");
    }
}
