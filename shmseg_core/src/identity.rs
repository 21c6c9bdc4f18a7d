//! Segment identity resolution
//!
//! Turns a user-supplied name plus the global flag into the identifier the
//! OS namespace understands:
//!
//! | Platform | local      | global             |
//! |----------|------------|--------------------|
//! | POSIX    | `/name`    | `/name`            |
//! | Windows  | `name`     | `Global\name`      |
//!
//! POSIX has a single namespace for `shm_open`, so `global` only changes the
//! privilege and permission policy applied by the backend.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{SegmentError, SegmentResult};

/// Longest accepted user name, leaving room for the namespace prefix
#[cfg(target_os = "macos")]
pub const MAX_NAME_LEN: usize = 30; // PSHMNAMLEN is 31 including the slash

#[cfg(all(unix, not(target_os = "macos")))]
pub const MAX_NAME_LEN: usize = 254; // NAME_MAX minus the leading slash

#[cfg(windows)]
pub const MAX_NAME_LEN: usize = 248; // MAX_PATH minus "Global\"

/// Prefix of generated identifiers
pub const GENERATED_PREFIX: &str = "shm";

/// Random bytes in a generated identifier (hex encoded, so twice as many chars)
pub const GENERATED_RANDOM_BYTES: usize = 12;

#[cfg(windows)]
const GLOBAL_PREFIX: &str = "Global\\";

/// A resolved segment identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentName {
    name: String,
    global: bool,
    os_name: String,
}

impl SegmentName {
    /// The name as the user supplied it
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_global(&self) -> bool {
        self.global
    }

    /// The identifier handed to the OS (`shm_open`, `CreateFileMappingW`)
    pub fn os_name(&self) -> &str {
        &self.os_name
    }
}

impl fmt::Display for SegmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.os_name)
    }
}

/// Validate `name` and place it in the local or global namespace
pub fn resolve(name: &str, global: bool) -> SegmentResult<SegmentName> {
    validate_name(name)?;

    Ok(SegmentName {
        name: name.to_string(),
        global,
        os_name: os_name(name, global),
    })
}

/// Produce a fresh identifier from the OS random source
pub fn generate_id(global: bool) -> SegmentName {
    let mut bytes = [0u8; GENERATED_RANDOM_BYTES];
    OsRng.fill_bytes(&mut bytes);

    let mut name = String::with_capacity(GENERATED_PREFIX.len() + bytes.len() * 2);
    name.push_str(GENERATED_PREFIX);
    for b in bytes {
        name.push_str(&format!("{:02x}", b));
    }

    SegmentName {
        os_name: os_name(&name, global),
        name,
        global,
    }
}

/// Async variant of [`generate_id`]
///
/// Inside a Tokio runtime the work runs on the blocking pool so the awaiting
/// task never stalls its worker thread, even when the OS entropy source is
/// slow. Awaited under any other executor, the id is generated inline.
pub async fn generate_id_async(global: bool) -> SegmentResult<SegmentName> {
    if tokio::runtime::Handle::try_current().is_err() {
        return Ok(generate_id(global));
    }

    tokio::task::spawn_blocking(move || generate_id(global))
        .await
        .map_err(|e| SegmentError::internal(format!("id generation task failed: {}", e)))
}

fn validate_name(name: &str) -> SegmentResult<()> {
    if name.is_empty() {
        return Err(SegmentError::invalid_argument(
            "segment name must not be empty",
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(SegmentError::invalid_argument(format!(
            "segment name is {} bytes, maximum is {}",
            name.len(),
            MAX_NAME_LEN
        )));
    }
    if let Some(c) = name.chars().find(|c| matches!(c, '/' | '\\' | '\0')) {
        return Err(SegmentError::invalid_argument(format!(
            "segment name '{}' contains illegal character {:?}",
            name.escape_default(),
            c
        )));
    }
    if name.chars().all(|c| c == '.') {
        return Err(SegmentError::invalid_argument(format!(
            "segment name '{}' is reserved",
            name
        )));
    }
    Ok(())
}

#[cfg(unix)]
fn os_name(name: &str, _global: bool) -> String {
    format!("/{}", name)
}

#[cfg(windows)]
fn os_name(name: &str, global: bool) -> String {
    if global {
        format!("{}{}", GLOBAL_PREFIX, name)
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_keeps_user_name() {
        let id = resolve("camera_frames", false).unwrap();
        assert_eq!(id.name(), "camera_frames");
        assert!(!id.is_global());
        assert!(id.os_name().ends_with("camera_frames"));
    }

    #[cfg(unix)]
    #[test]
    fn test_posix_names_get_leading_slash() {
        assert_eq!(resolve("abc", false).unwrap().os_name(), "/abc");
        assert_eq!(resolve("abc", true).unwrap().os_name(), "/abc");
    }

    #[cfg(windows)]
    #[test]
    fn test_windows_global_prefix() {
        assert_eq!(resolve("abc", false).unwrap().os_name(), "abc");
        assert_eq!(resolve("abc", true).unwrap().os_name(), "Global\\abc");
    }

    #[test]
    fn test_rejects_malformed_names() {
        for bad in ["", "a/b", "/lead", "Global\\x", "nul\0byte", ".", ".."] {
            let err = resolve(bad, false).unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument, "{:?}", bad);
        }

        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(resolve(&long, false).is_err());
        assert!(resolve(&"x".repeat(MAX_NAME_LEN), false).is_ok());
    }

    #[test]
    fn test_generated_ids_are_fixed_length_hex() {
        let id = generate_id(false);
        let random = id.name().strip_prefix(GENERATED_PREFIX).unwrap();
        assert_eq!(random.len(), GENERATED_RANDOM_BYTES * 2);
        assert!(random.chars().all(|c| c.is_ascii_hexdigit()));

        // Generated names must pass the same validation as user names
        assert_eq!(resolve(id.name(), true).unwrap().name(), id.name());
    }

    #[test]
    fn test_generated_ids_differ() {
        let a = generate_id(false);
        let b = generate_id(false);
        assert_ne!(a, b);
    }

    #[test]
    fn test_generated_id_records_global() {
        assert!(generate_id(true).is_global());
        assert!(!generate_id(false).is_global());
    }
}
