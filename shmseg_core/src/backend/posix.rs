// POSIX shared memory objects (shm_open / mmap / shm_unlink)

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr::{self, NonNull};

use super::{BackendKind, MappedRegion, OpenedObject, SegmentBackend};
use crate::error::{SegmentError, SegmentResult};
use crate::identity::SegmentName;
use crate::platform;

/// Owner-only access for local segments
const LOCAL_MODE: libc::mode_t = 0o600;

/// World read/write for global segments
const GLOBAL_MODE: libc::mode_t = 0o666;

/// `shm_open` based backend
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixBackend;

/// An `mmap`ed range of a shared memory object
#[derive(Debug)]
pub struct PosixMapping {
    ptr: NonNull<u8>,
    len: usize,
}

// The mapping is plain process memory; access discipline is the caller's
unsafe impl Send for PosixMapping {}
unsafe impl Sync for PosixMapping {}

impl MappedRegion for PosixMapping {
    fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    fn len(&self) -> usize {
        self.len
    }
}

fn c_name(id: &SegmentName) -> SegmentResult<CString> {
    CString::new(id.os_name()).map_err(|_| {
        SegmentError::invalid_argument(format!("segment name '{}' contains a NUL byte", id))
    })
}

fn shm_open(name: &CString, oflag: libc::c_int, mode: libc::mode_t) -> io::Result<OwnedFd> {
    // SAFETY: name is a valid NUL-terminated string
    let fd = unsafe { libc::shm_open(name.as_ptr(), oflag, mode as libc::c_uint) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd was just returned by shm_open and is owned by nobody else
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn shm_unlink(name: &CString) -> io::Result<()> {
    // SAFETY: name is a valid NUL-terminated string
    if unsafe { libc::shm_unlink(name.as_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn object_len(fd: &OwnedFd) -> io::Result<u64> {
    // SAFETY: an all-zero stat is a valid value to be overwritten by fstat
    let mut st: libc::stat = unsafe { mem::zeroed() };
    // SAFETY: fd is open and st is a valid out pointer
    if unsafe { libc::fstat(fd.as_raw_fd(), &mut st) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(st.st_size as u64)
}

fn init_new_object(fd: &OwnedFd, size: usize, global: bool) -> Result<(), (&'static str, io::Error)> {
    if global {
        // shm_open's mode is filtered through the umask
        // SAFETY: fd is open
        if unsafe { libc::fchmod(fd.as_raw_fd(), GLOBAL_MODE) } != 0 {
            return Err(("fchmod", io::Error::last_os_error()));
        }
    }

    // New length reads back as zeros
    // SAFETY: fd is open for writing
    if unsafe { libc::ftruncate(fd.as_raw_fd(), size as libc::off_t) } != 0 {
        return Err(("ftruncate", io::Error::last_os_error()));
    }
    Ok(())
}

impl PosixBackend {
    fn create(
        &self,
        id: &SegmentName,
        name: &CString,
        size: usize,
    ) -> SegmentResult<OpenedObject<OwnedFd>> {
        if id.is_global() {
            platform::require_global_privilege(id.name())?;
        }
        let mode = if id.is_global() { GLOBAL_MODE } else { LOCAL_MODE };

        match shm_open(name, libc::O_CREAT | libc::O_EXCL | libc::O_RDWR, mode) {
            Ok(fd) => {
                if let Err((op, err)) = init_new_object(&fd, size, id.is_global()) {
                    drop(fd);
                    if let Err(e) = shm_unlink(name) {
                        log::warn!("Failed to remove half-created segment '{}': {}", id, e);
                    }
                    return Err(SegmentError::from_io(op, id.os_name(), err));
                }
                log::debug!("shm_open created '{}' ({} bytes)", id, size);
                Ok(OpenedObject::fresh(fd))
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let fd = shm_open(name, libc::O_RDWR, 0)
                    .map_err(|e| SegmentError::from_io("shm_open", id.os_name(), e))?;
                let existing =
                    object_len(&fd).map_err(|e| SegmentError::from_io("fstat", id.os_name(), e))?;
                if existing != size as u64 {
                    return Err(SegmentError::AlreadyExists(format!(
                        "'{}' already exists with {} bytes, requested {}",
                        id, existing, size
                    )));
                }
                log::debug!("shm_open adopted existing '{}' ({} bytes)", id, size);
                Ok(OpenedObject::existing(fd))
            }
            Err(e) => Err(SegmentError::from_io("shm_open", id.os_name(), e)),
        }
    }

    fn open(&self, id: &SegmentName, name: &CString, size: usize) -> SegmentResult<OwnedFd> {
        let fd = shm_open(name, libc::O_RDWR, 0)
            .map_err(|e| SegmentError::from_io("shm_open", id.os_name(), e))?;

        let existing =
            object_len(&fd).map_err(|e| SegmentError::from_io("fstat", id.os_name(), e))?;
        if existing < size as u64 {
            return Err(SegmentError::InvalidArgument(format!(
                "'{}' holds {} bytes, cannot attach {}",
                id, existing, size
            )));
        }

        log::debug!("shm_open attached '{}' ({} of {} bytes)", id, size, existing);
        Ok(fd)
    }
}

impl SegmentBackend for PosixBackend {
    type Object = OwnedFd;
    type Mapping = PosixMapping;

    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn create_or_open(
        &self,
        id: &SegmentName,
        size: usize,
        as_host: bool,
    ) -> SegmentResult<OpenedObject<OwnedFd>> {
        let name = c_name(id)?;
        if as_host {
            self.create(id, &name, size)
        } else {
            self.open(id, &name, size).map(OpenedObject::existing)
        }
    }

    fn map(&self, id: &SegmentName, object: &OwnedFd, size: usize) -> SegmentResult<PosixMapping> {
        // SAFETY: a fresh shared mapping at an address chosen by the kernel;
        // the object is at least `size` bytes (checked by create_or_open)
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                object.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(SegmentError::map_failed(
                "mmap",
                id.os_name(),
                io::Error::last_os_error(),
            ));
        }

        let ptr = NonNull::new(addr as *mut u8)
            .ok_or_else(|| SegmentError::MapFailed(format!("mmap returned null for '{}'", id)))?;
        Ok(PosixMapping { ptr, len: size })
    }

    fn unmap(&self, id: &SegmentName, mapping: PosixMapping) -> SegmentResult<()> {
        // SAFETY: ptr/len describe a mapping created by map() and not yet unmapped
        if unsafe { libc::munmap(mapping.ptr.as_ptr() as *mut libc::c_void, mapping.len) } != 0 {
            return Err(SegmentError::from_io(
                "munmap",
                id.os_name(),
                io::Error::last_os_error(),
            ));
        }
        Ok(())
    }

    fn close(&self, _id: &SegmentName, object: OwnedFd) -> SegmentResult<()> {
        drop(object);
        Ok(())
    }

    fn destroy(&self, id: &SegmentName) -> SegmentResult<()> {
        let name = c_name(id)?;
        match shm_unlink(&name) {
            Ok(()) => {
                log::debug!("shm_unlink removed '{}'", id);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("shm_unlink: '{}' already removed", id);
                Ok(())
            }
            Err(e) => Err(SegmentError::from_io("shm_unlink", id.os_name(), e)),
        }
    }
}
