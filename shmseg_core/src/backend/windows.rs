// Windows named file mappings backed by the paging file
//
// The kernel drops an object's name once its last handle is closed, even
// while views of it are still mapped. Segments rely on that: clients close
// their handle right after mapping, the host keeps its handle until it is
// disposed, so disposing the host is what makes the name unreachable.

use std::io;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle};
use std::ptr::{self, NonNull};

use windows_sys::Win32::Foundation::{GetLastError, ERROR_ALREADY_EXISTS, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::System::Memory::{
    CreateFileMappingW, MapViewOfFile, OpenFileMappingW, UnmapViewOfFile, VirtualQuery,
    FILE_MAP_ALL_ACCESS, MEMORY_BASIC_INFORMATION, MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READWRITE,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

use super::{BackendKind, MappedRegion, OpenedObject, SegmentBackend};
use crate::error::{SegmentError, SegmentResult};
use crate::identity::SegmentName;

/// `CreateFileMappingW` based backend
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsBackend;

/// A view returned by `MapViewOfFile`
#[derive(Debug)]
pub struct WindowsMapping {
    ptr: NonNull<u8>,
    len: usize,
}

unsafe impl Send for WindowsMapping {}
unsafe impl Sync for WindowsMapping {}

impl MappedRegion for WindowsMapping {
    fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    fn len(&self) -> usize {
        self.len
    }
}

fn wide_name(id: &SegmentName) -> Vec<u16> {
    id.os_name().encode_utf16().chain(std::iter::once(0)).collect()
}

fn raw(handle: &OwnedHandle) -> HANDLE {
    handle.as_raw_handle() as HANDLE
}

fn page_size() -> usize {
    // SAFETY: an all-zero SYSTEM_INFO is valid and fully overwritten
    let mut info: SYSTEM_INFO = unsafe { std::mem::zeroed() };
    unsafe { GetSystemInfo(&mut info) };
    info.dwPageSize as usize
}

/// Size of the section behind `handle`, rounded up to whole pages
fn section_len(id: &SegmentName, handle: &OwnedHandle) -> SegmentResult<usize> {
    // SAFETY: mapping 0 bytes maps the whole section
    let view = unsafe { MapViewOfFile(raw(handle), FILE_MAP_ALL_ACCESS, 0, 0, 0) };
    if view.Value.is_null() {
        return Err(SegmentError::map_failed(
            "MapViewOfFile",
            id.os_name(),
            io::Error::last_os_error(),
        ));
    }

    // SAFETY: an all-zero MEMORY_BASIC_INFORMATION is valid
    let mut info: MEMORY_BASIC_INFORMATION = unsafe { std::mem::zeroed() };
    let written = unsafe {
        VirtualQuery(
            view.Value,
            &mut info,
            std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
        )
    };
    let query_err = io::Error::last_os_error();
    // SAFETY: view was returned by MapViewOfFile above
    unsafe { UnmapViewOfFile(view) };

    if written == 0 {
        return Err(SegmentError::from_io("VirtualQuery", id.os_name(), query_err));
    }
    Ok(info.RegionSize)
}

fn round_to_pages(size: usize) -> usize {
    let page = page_size();
    size.div_ceil(page) * page
}

impl WindowsBackend {
    fn create(&self, id: &SegmentName, size: usize) -> SegmentResult<OpenedObject<OwnedHandle>> {
        let name = wide_name(id);
        let size64 = size as u64;

        // SAFETY: INVALID_HANDLE_VALUE selects the paging file; name is NUL-terminated
        let handle = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                ptr::null(),
                PAGE_READWRITE,
                (size64 >> 32) as u32,
                size64 as u32,
                name.as_ptr(),
            )
        };
        // Must be read before any other call touches the thread's last error
        let last = unsafe { GetLastError() };

        if handle == 0 {
            return Err(SegmentError::from_io(
                "CreateFileMappingW",
                id.os_name(),
                io::Error::from_raw_os_error(last as i32),
            ));
        }
        // SAFETY: handle is valid and owned by us from here on
        let handle = unsafe { OwnedHandle::from_raw_handle(handle as RawHandle) };

        if last == ERROR_ALREADY_EXISTS {
            // The size argument is ignored for an existing section
            let existing = section_len(id, &handle)?;
            if existing != round_to_pages(size) {
                return Err(SegmentError::AlreadyExists(format!(
                    "'{}' already exists with {} bytes, requested {}",
                    id, existing, size
                )));
            }
            log::debug!("CreateFileMappingW adopted existing '{}' ({} bytes)", id, size);
            Ok(OpenedObject::existing(handle))
        } else {
            log::debug!("CreateFileMappingW created '{}' ({} bytes)", id, size);
            Ok(OpenedObject::fresh(handle))
        }
    }

    fn open(&self, id: &SegmentName, size: usize) -> SegmentResult<OwnedHandle> {
        let name = wide_name(id);

        // SAFETY: name is NUL-terminated
        let handle = unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS, 0, name.as_ptr()) };
        if handle == 0 {
            return Err(SegmentError::from_io(
                "OpenFileMappingW",
                id.os_name(),
                io::Error::last_os_error(),
            ));
        }
        // SAFETY: handle is valid and owned by us from here on
        let handle = unsafe { OwnedHandle::from_raw_handle(handle as RawHandle) };

        let existing = section_len(id, &handle)?;
        if existing < size {
            return Err(SegmentError::InvalidArgument(format!(
                "'{}' holds {} bytes, cannot attach {}",
                id, existing, size
            )));
        }

        log::debug!("OpenFileMappingW attached '{}' ({} bytes)", id, size);
        Ok(handle)
    }
}

impl SegmentBackend for WindowsBackend {
    type Object = OwnedHandle;
    type Mapping = WindowsMapping;

    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn create_or_open(
        &self,
        id: &SegmentName,
        size: usize,
        as_host: bool,
    ) -> SegmentResult<OpenedObject<OwnedHandle>> {
        if as_host {
            self.create(id, size)
        } else {
            self.open(id, size).map(OpenedObject::existing)
        }
    }

    fn map(
        &self,
        id: &SegmentName,
        object: &OwnedHandle,
        size: usize,
    ) -> SegmentResult<WindowsMapping> {
        // SAFETY: object is a live section handle at least `size` bytes long
        let view = unsafe { MapViewOfFile(raw(object), FILE_MAP_ALL_ACCESS, 0, 0, size) };
        let ptr = NonNull::new(view.Value as *mut u8).ok_or_else(|| {
            SegmentError::map_failed("MapViewOfFile", id.os_name(), io::Error::last_os_error())
        })?;
        Ok(WindowsMapping { ptr, len: size })
    }

    fn unmap(&self, id: &SegmentName, mapping: WindowsMapping) -> SegmentResult<()> {
        let view = MEMORY_MAPPED_VIEW_ADDRESS {
            Value: mapping.ptr.as_ptr() as *mut _,
        };
        // SAFETY: view was returned by MapViewOfFile and not yet unmapped
        if unsafe { UnmapViewOfFile(view) } == 0 {
            return Err(SegmentError::from_io(
                "UnmapViewOfFile",
                id.os_name(),
                io::Error::last_os_error(),
            ));
        }
        Ok(())
    }

    fn close(&self, _id: &SegmentName, object: OwnedHandle) -> SegmentResult<()> {
        drop(object);
        Ok(())
    }

    fn destroy(&self, id: &SegmentName) -> SegmentResult<()> {
        // Nothing to unlink: the name went away with the host's handle
        log::debug!("'{}' released with its last handle", id);
        Ok(())
    }
}
