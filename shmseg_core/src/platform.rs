// Cross-platform shared memory locations and privilege probing
//
// Linux: /dev/shm/shmseg (tmpfs - RAM-backed)
// macOS: /tmp/shmseg (no /dev/shm)
// Windows: %TEMP%\shmseg

use std::path::{Path, PathBuf};

use crate::error::{SegmentError, SegmentResult};

/// Get the base directory for file-backed segments
///
/// This returns a platform-appropriate path:
/// - Linux: `/dev/shm/shmseg` (tmpfs, pages never hit the disk)
/// - macOS: `/tmp/shmseg`
/// - Windows: `%TEMP%\shmseg`
pub fn segment_base_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/dev/shm/shmseg")
    }

    #[cfg(target_os = "macos")]
    {
        PathBuf::from("/tmp/shmseg")
    }

    #[cfg(target_os = "windows")]
    {
        std::env::temp_dir().join("shmseg")
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        PathBuf::from("/tmp/shmseg")
    }
}

/// Directory holding local or global segments below `root`
pub fn segment_namespace_dir(root: &Path, global: bool) -> PathBuf {
    if global {
        root.join("global")
    } else {
        root.join("local")
    }
}

/// Whether the current process may create global segments
///
/// POSIX: effective uid 0. Windows: always true here; the kernel enforces
/// `SeCreateGlobalPrivilege` itself and reports `ERROR_ACCESS_DENIED`.
pub fn is_privileged() -> bool {
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions and cannot fail
        unsafe { libc::geteuid() == 0 }
    }

    #[cfg(not(unix))]
    {
        true
    }
}

/// Fail with `PermissionDenied` unless the process may host a global segment
pub fn require_global_privilege(name: &str) -> SegmentResult<()> {
    if is_privileged() {
        Ok(())
    } else {
        Err(SegmentError::PermissionDenied(format!(
            "creating global segment '{}' requires superuser privilege",
            name
        )))
    }
}

/// Get platform name for logging/diagnostics
pub fn platform_name() -> &'static str {
    #[cfg(target_os = "linux")]
    { "Linux" }

    #[cfg(target_os = "macos")]
    { "macOS" }

    #[cfg(target_os = "windows")]
    { "Windows" }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    { "Unix" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_dirs_are_below_root() {
        let base = segment_base_dir();
        assert!(!base.as_os_str().is_empty());

        let local = segment_namespace_dir(&base, false);
        let global = segment_namespace_dir(&base, true);
        assert!(local.starts_with(&base));
        assert!(global.starts_with(&base));
        assert_ne!(local, global);
    }

    #[test]
    fn test_privilege_check_matches_probe() {
        let result = require_global_privilege("probe");
        assert_eq!(result.is_ok(), is_privileged());
    }
}
