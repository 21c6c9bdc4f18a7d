// File-backed segments - memory-mapped files below a base directory
//
// On Linux the default base directory lives on tmpfs (/dev/shm/shmseg), so
// the pages never reach a disk. Useful where shm_open is unavailable or
// sandboxed, and for keeping segments inspectable with ordinary tools.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use memmap2::{MmapMut, MmapOptions};

use super::{BackendKind, MappedRegion, OpenedObject, SegmentBackend};
use crate::error::{SegmentError, SegmentResult};
use crate::identity::SegmentName;
use crate::platform;

/// Memory-mapped file backend
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

/// An open segment file
#[derive(Debug)]
pub struct FileObject {
    file: File,
    path: PathBuf,
}

/// A `MmapMut` over a segment file
#[derive(Debug)]
pub struct FileMapping {
    mmap: MmapMut,
    ptr: NonNull<u8>,
}

// Thread safety
unsafe impl Send for FileMapping {}
unsafe impl Sync for FileMapping {}

impl MappedRegion for FileMapping {
    fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    fn len(&self) -> usize {
        self.mmap.len()
    }
}

fn init_new_file(
    file: &File,
    path: &Path,
    size: usize,
    global: bool,
) -> Result<(), (&'static str, io::Error)> {
    // Set initial size; the new length reads back as zeros
    file.set_len(size as u64).map_err(|e| ("set_len", e))?;

    #[cfg(unix)]
    if global {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))
            .map_err(|e| ("chmod", e))?;
    }
    #[cfg(not(unix))]
    let _ = (path, global);

    Ok(())
}

impl Default for FileBackend {
    fn default() -> Self {
        Self::new(platform::segment_base_dir())
    }
}

impl FileBackend {
    /// Keep segment files below `root`
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding the segment `id`
    pub fn path_for(&self, id: &SegmentName) -> PathBuf {
        platform::segment_namespace_dir(&self.root, id.is_global()).join(id.name())
    }

    fn create(
        &self,
        id: &SegmentName,
        path: PathBuf,
        size: usize,
    ) -> SegmentResult<OpenedObject<FileObject>> {
        if id.is_global() {
            platform::require_global_privilege(id.name())?;
        }

        let dir = platform::segment_namespace_dir(&self.root, id.is_global());
        std::fs::create_dir_all(&dir)
            .map_err(|e| SegmentError::from_io("create_dir_all", &dir.to_string_lossy(), e))?;

        let path_str = path.to_string_lossy().into_owned();
        match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => {
                if let Err((op, e)) = init_new_file(&file, &path, size, id.is_global()) {
                    drop(file);
                    if let Err(e) = std::fs::remove_file(&path) {
                        log::warn!("Failed to remove half-created {}: {}", path.display(), e);
                    }
                    return Err(SegmentError::from_io(op, &path_str, e));
                }
                log::debug!("Created segment file {} ({} bytes)", path.display(), size);
                Ok(OpenedObject::fresh(FileObject { file, path }))
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open(&path)
                    .map_err(|e| SegmentError::from_io("open", &path_str, e))?;

                // Check existing size
                let existing = file
                    .metadata()
                    .map_err(|e| SegmentError::from_io("metadata", &path_str, e))?
                    .len();
                if existing != size as u64 {
                    return Err(SegmentError::AlreadyExists(format!(
                        "'{}' already exists with {} bytes, requested {}",
                        id, existing, size
                    )));
                }
                log::debug!("Adopted segment file {} ({} bytes)", path.display(), size);
                Ok(OpenedObject::existing(FileObject { file, path }))
            }
            Err(e) => Err(SegmentError::from_io("create", &path_str, e)),
        }
    }

    fn open(&self, id: &SegmentName, path: PathBuf, size: usize) -> SegmentResult<FileObject> {
        let path_str = path.to_string_lossy().into_owned();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| SegmentError::from_io("open", &path_str, e))?;

        let existing = file
            .metadata()
            .map_err(|e| SegmentError::from_io("metadata", &path_str, e))?
            .len();
        if existing < size as u64 {
            return Err(SegmentError::InvalidArgument(format!(
                "'{}' holds {} bytes, cannot attach {}",
                id, existing, size
            )));
        }

        log::debug!("Opened segment file {} ({} bytes)", path.display(), existing);
        Ok(FileObject { file, path })
    }
}

impl SegmentBackend for FileBackend {
    type Object = FileObject;
    type Mapping = FileMapping;

    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn create_or_open(
        &self,
        id: &SegmentName,
        size: usize,
        as_host: bool,
    ) -> SegmentResult<OpenedObject<FileObject>> {
        let path = self.path_for(id);
        if as_host {
            self.create(id, path, size)
        } else {
            self.open(id, path, size).map(OpenedObject::existing)
        }
    }

    fn map(&self, _id: &SegmentName, object: &FileObject, size: usize) -> SegmentResult<FileMapping> {
        // SAFETY: the file is at least `size` bytes; concurrent modification
        // by other mappings is the documented nature of a segment
        let mut mmap = unsafe { MmapOptions::new().len(size).map_mut(&object.file) }
            .map_err(|e| SegmentError::map_failed("mmap", &object.path.to_string_lossy(), e))?;

        let ptr = NonNull::new(mmap.as_mut_ptr())
            .ok_or_else(|| SegmentError::MapFailed(format!("mmap of {} returned null", object.path.display())))?;
        Ok(FileMapping { mmap, ptr })
    }

    fn unmap(&self, _id: &SegmentName, mapping: FileMapping) -> SegmentResult<()> {
        drop(mapping.mmap);
        Ok(())
    }

    fn close(&self, _id: &SegmentName, object: FileObject) -> SegmentResult<()> {
        drop(object.file);
        Ok(())
    }

    fn destroy(&self, id: &SegmentName) -> SegmentResult<()> {
        let path = self.path_for(id);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                log::debug!("Removed segment file {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SegmentError::from_io("remove_file", &path.to_string_lossy(), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::identity::resolve;

    #[test]
    fn test_paths_split_by_namespace() {
        let backend = FileBackend::new("/srv/segments");
        let local = backend.path_for(&resolve("a", false).unwrap());
        let global = backend.path_for(&resolve("a", true).unwrap());
        assert_eq!(local, PathBuf::from("/srv/segments/local/a"));
        assert_eq!(global, PathBuf::from("/srv/segments/global/a"));
    }

    #[test]
    fn test_create_open_destroy() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        let id = resolve("frames", false).unwrap();

        let err = backend.create_or_open(&id, 128, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let host = backend.create_or_open(&id, 128, true).unwrap();
        assert!(host.created);
        assert_eq!(std::fs::metadata(backend.path_for(&id)).unwrap().len(), 128);

        let adopted = backend.create_or_open(&id, 128, true).unwrap();
        assert!(!adopted.created);
        backend.close(&id, adopted.object).unwrap();

        let err = backend.create_or_open(&id, 64, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let err = backend.create_or_open(&id, 129, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        backend.close(&id, host.object).unwrap();
        backend.destroy(&id).unwrap();
        backend.destroy(&id).unwrap();
        assert!(!backend.path_for(&id).exists());
    }

    #[test]
    fn test_mapping_is_shared_between_opens() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        let id = resolve("shared", false).unwrap();

        let host = backend.create_or_open(&id, 16, true).unwrap().object;
        let host_map = backend.map(&id, &host, 16).unwrap();
        let client = backend.create_or_open(&id, 16, false).unwrap().object;
        let client_map = backend.map(&id, &client, 16).unwrap();

        unsafe {
            host_map.as_ptr().as_ptr().add(3).write(42);
            assert_eq!(client_map.as_ptr().as_ptr().add(3).read(), 42);
        }

        backend.unmap(&id, client_map).unwrap();
        backend.unmap(&id, host_map).unwrap();
    }
}
