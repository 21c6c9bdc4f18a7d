//! Backend selection and the platform primitives behind a segment
//!
//! A [`SegmentBackend`] knows how to create or open a named memory object,
//! map it, unmap it and remove its name. Three implementations exist:
//!
//! - [`PosixBackend`]: `shm_open` objects (Linux, macOS, BSD)
//! - [`WindowsBackend`]: pagefile-backed named file mappings
//! - [`FileBackend`]: regular files under a base directory, mapped with memmap2
//!
//! [`NativeBackend`] is the one picked at build time for the target OS.
//! [`AnyBackend`] allows switching between native and file at startup
//! (configuration or the `SHMSEG_BACKEND` environment variable).

pub mod file;
#[cfg(unix)]
pub mod posix;
#[cfg(windows)]
pub mod windows;

use std::env;
use std::fmt;
use std::ptr::NonNull;

use serde::{Deserialize, Serialize};

use crate::error::{SegmentError, SegmentResult};
use crate::identity::SegmentName;

pub use file::{FileBackend, FileMapping, FileObject};
#[cfg(unix)]
pub use posix::PosixBackend;
#[cfg(windows)]
pub use windows::WindowsBackend;

/// The OS shared memory backend for this build target
#[cfg(unix)]
pub type NativeBackend = PosixBackend;

/// The OS shared memory backend for this build target
#[cfg(windows)]
pub type NativeBackend = WindowsBackend;

/// Environment variable overriding the configured backend
pub const BACKEND_ENV_VAR: &str = "SHMSEG_BACKEND";

/// A live mapping of a backing object into this process
pub trait MappedRegion: Send + Sync {
    /// Start of the mapped range
    fn as_ptr(&self) -> NonNull<u8>;

    /// Mapped length in bytes
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of [`SegmentBackend::create_or_open`]
#[derive(Debug)]
pub struct OpenedObject<O> {
    pub object: O,
    /// This call created the object, as opposed to finding it in place.
    /// Only the creator may later remove the name.
    pub created: bool,
}

impl<O> OpenedObject<O> {
    pub fn fresh(object: O) -> Self {
        Self {
            object,
            created: true,
        }
    }

    pub fn existing(object: O) -> Self {
        Self {
            object,
            created: false,
        }
    }

    fn map_object<P>(self, f: impl FnOnce(O) -> P) -> OpenedObject<P> {
        OpenedObject {
            object: f(self.object),
            created: self.created,
        }
    }
}

/// Platform primitive for named memory objects
///
/// Implementations never destroy anything implicitly: `unmap` and `close`
/// only release what this process holds, `destroy` only removes the name.
pub trait SegmentBackend: Send + Sync {
    /// Open handle to the backing object (fd, HANDLE, file)
    type Object: Send + Sync;

    /// This process's view of the object
    type Mapping: MappedRegion;

    fn kind(&self) -> BackendKind;

    /// Create (`as_host`) or open (`!as_host`) the object named `id`
    ///
    /// A host that finds an object of exactly `size` bytes adopts it
    /// (`created == false`); any other size is `AlreadyExists`. A client
    /// fails with `NotFound` when nothing is there and with `InvalidArgument`
    /// when the object is smaller than `size`.
    fn create_or_open(
        &self,
        id: &SegmentName,
        size: usize,
        as_host: bool,
    ) -> SegmentResult<OpenedObject<Self::Object>>;

    /// Map the first `size` bytes of `object` read/write and shared
    fn map(
        &self,
        id: &SegmentName,
        object: &Self::Object,
        size: usize,
    ) -> SegmentResult<Self::Mapping>;

    /// Release this process's mapping; the object itself is untouched
    fn unmap(&self, id: &SegmentName, mapping: Self::Mapping) -> SegmentResult<()>;

    /// Release the handle to the object
    fn close(&self, id: &SegmentName, object: Self::Object) -> SegmentResult<()>;

    /// Remove `id` from the namespace; already gone is not an error
    fn destroy(&self, id: &SegmentName) -> SegmentResult<()>;
}

/// Backend families a segment can be opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The OS shared memory facility (POSIX shm / Windows file mappings)
    #[default]
    Native,
    /// Memory-mapped files under a base directory
    File,
}

impl BackendKind {
    /// Read the `SHMSEG_BACKEND` override, if set to a known value
    pub fn from_env() -> Option<Self> {
        let value = env::var(BACKEND_ENV_VAR).ok()?;
        match value.parse() {
            Ok(kind) => Some(kind),
            Err(e) => {
                log::warn!("Ignoring {}: {}", BACKEND_ENV_VAR, e);
                None
            }
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Native => write!(f, "native"),
            BackendKind::File => write!(f, "file"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "native" | "shm" => Ok(BackendKind::Native),
            "file" | "mmap" => Ok(BackendKind::File),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Backend chosen at startup
#[derive(Debug, Clone)]
pub enum AnyBackend {
    Native(NativeBackend),
    File(FileBackend),
}

/// Object handle of an [`AnyBackend`]
pub enum AnyObject {
    Native(<NativeBackend as SegmentBackend>::Object),
    File(<FileBackend as SegmentBackend>::Object),
}

/// Mapping of an [`AnyBackend`]
pub enum AnyMapping {
    Native(<NativeBackend as SegmentBackend>::Mapping),
    File(<FileBackend as SegmentBackend>::Mapping),
}

impl AnyBackend {
    pub fn native() -> Self {
        AnyBackend::Native(NativeBackend::default())
    }

    pub fn file(backend: FileBackend) -> Self {
        AnyBackend::File(backend)
    }
}

impl MappedRegion for AnyMapping {
    fn as_ptr(&self) -> NonNull<u8> {
        match self {
            AnyMapping::Native(m) => m.as_ptr(),
            AnyMapping::File(m) => m.as_ptr(),
        }
    }

    fn len(&self) -> usize {
        match self {
            AnyMapping::Native(m) => m.len(),
            AnyMapping::File(m) => m.len(),
        }
    }
}

fn mismatched(what: &str, id: &SegmentName) -> SegmentError {
    SegmentError::internal(format!("{} of '{}' belongs to another backend", what, id))
}

impl SegmentBackend for AnyBackend {
    type Object = AnyObject;
    type Mapping = AnyMapping;

    fn kind(&self) -> BackendKind {
        match self {
            AnyBackend::Native(b) => b.kind(),
            AnyBackend::File(b) => b.kind(),
        }
    }

    fn create_or_open(
        &self,
        id: &SegmentName,
        size: usize,
        as_host: bool,
    ) -> SegmentResult<OpenedObject<AnyObject>> {
        match self {
            AnyBackend::Native(b) => b
                .create_or_open(id, size, as_host)
                .map(|opened| opened.map_object(AnyObject::Native)),
            AnyBackend::File(b) => b
                .create_or_open(id, size, as_host)
                .map(|opened| opened.map_object(AnyObject::File)),
        }
    }

    fn map(&self, id: &SegmentName, object: &AnyObject, size: usize) -> SegmentResult<AnyMapping> {
        match (self, object) {
            (AnyBackend::Native(b), AnyObject::Native(o)) => {
                b.map(id, o, size).map(AnyMapping::Native)
            }
            (AnyBackend::File(b), AnyObject::File(o)) => b.map(id, o, size).map(AnyMapping::File),
            _ => Err(mismatched("object", id)),
        }
    }

    fn unmap(&self, id: &SegmentName, mapping: AnyMapping) -> SegmentResult<()> {
        match (self, mapping) {
            (AnyBackend::Native(b), AnyMapping::Native(m)) => b.unmap(id, m),
            (AnyBackend::File(b), AnyMapping::File(m)) => b.unmap(id, m),
            _ => Err(mismatched("mapping", id)),
        }
    }

    fn close(&self, id: &SegmentName, object: AnyObject) -> SegmentResult<()> {
        match (self, object) {
            (AnyBackend::Native(b), AnyObject::Native(o)) => b.close(id, o),
            (AnyBackend::File(b), AnyObject::File(o)) => b.close(id, o),
            _ => Err(mismatched("object", id)),
        }
    }

    fn destroy(&self, id: &SegmentName) -> SegmentResult<()> {
        match self {
            AnyBackend::Native(b) => b.destroy(id),
            AnyBackend::File(b) => b.destroy(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("native".parse::<BackendKind>().unwrap(), BackendKind::Native);
        assert_eq!("FILE".parse::<BackendKind>().unwrap(), BackendKind::File);
        assert_eq!("mmap".parse::<BackendKind>().unwrap(), BackendKind::File);
        assert!("iceoryx".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_backend_kind_display_round_trips() {
        for kind in [BackendKind::Native, BackendKind::File] {
            assert_eq!(kind.to_string().parse::<BackendKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_any_backend_reports_kind() {
        assert_eq!(AnyBackend::native().kind(), BackendKind::Native);
        assert_eq!(
            AnyBackend::file(FileBackend::default()).kind(),
            BackendKind::File
        );
    }
}
