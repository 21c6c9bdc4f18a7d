//! Named shared memory segment
//!
//! A [`SharedSegment`] is either the *host* of a backing object (it creates
//! the object and removes its name when disposed) or a *client* (it attaches
//! to an object some host already created). Every instance owns exactly one
//! mapping of `size` bytes.
//!
//! ## Lifecycle
//!
//! ```text
//! owner:  resolve -> create_or_open(host) -> map ......... unmap -> close -> destroy
//! client: resolve -> create_or_open(open) -> map -> close ... unmap
//! ```
//!
//! Only the instance whose construction actually created the object is its
//! owner. A second host of the same name and size adopts the object and is
//! treated like a client for teardown: it never removes the name.
//!
//! Non-owners release their handle to the object right after mapping. Once
//! the owner is disposed no new client can attach (`NotFound`), while
//! instances already attached keep a valid mapping until they are disposed
//! themselves.
//!
//! ## Concurrency
//!
//! There is no synchronization between instances. Writes are plain memory
//! copies; two instances writing at once interleave arbitrarily and a reader
//! may see a mix of both. Within one instance, writes need `&mut self`.

use std::fmt;
use std::ptr::NonNull;

use serde::{Deserialize, Serialize};

use crate::backend::{AnyBackend, BackendKind, MappedRegion, NativeBackend, SegmentBackend};
use crate::config::SegmentConfig;
use crate::error::{SegmentError, SegmentResult};
use crate::identity::{self, SegmentName};
use crate::platform;
use crate::view::{DataView, DataViewMut, Payload};

/// Attributes of a segment, for diagnostics and introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub name: String,
    pub os_name: String,
    pub size: usize,
    pub host: bool,
    pub owner: bool,
    pub global: bool,
    pub backend: BackendKind,
    pub platform: String,
}

struct Attached<B: SegmentBackend> {
    mapping: B::Mapping,
    /// Only the owner keeps the object open
    object: Option<B::Object>,
}

/// A named block of memory shared between processes
pub struct SharedSegment<B: SegmentBackend = NativeBackend> {
    id: SegmentName,
    size: usize,
    host: bool,
    /// Created the backing object, so holds the right to destroy it
    owner: bool,
    backend: B,
    state: Option<Attached<B>>,
}

impl SharedSegment<NativeBackend> {
    /// Create or attach to the segment `name`
    ///
    /// `host = true` creates the backing object (or adopts an existing one of
    /// the same size); `host = false` attaches to an existing one.
    pub fn new(name: &str, size: usize, global: bool, host: bool) -> SegmentResult<Self> {
        Self::with_backend(NativeBackend::default(), name, size, global, host)
    }

    /// Host a local segment
    pub fn create(name: &str, size: usize) -> SegmentResult<Self> {
        Self::new(name, size, false, true)
    }

    /// Attach to a local segment hosted elsewhere
    pub fn open(name: &str, size: usize) -> SegmentResult<Self> {
        Self::new(name, size, false, false)
    }

    /// Create or attach using an already resolved name
    pub fn from_name(id: &SegmentName, size: usize, host: bool) -> SegmentResult<Self> {
        Self::attach(NativeBackend::default(), id.clone(), size, host)
    }
}

impl SharedSegment<AnyBackend> {
    /// Create or attach as described by a configuration entry
    pub fn from_config(config: &SegmentConfig) -> SegmentResult<Self> {
        config.validate()?;
        Self::with_backend(
            config.to_backend(),
            &config.name,
            config.size,
            config.global,
            config.host,
        )
    }
}

impl<B: SegmentBackend> SharedSegment<B> {
    /// Create or attach through a specific backend
    pub fn with_backend(
        backend: B,
        name: &str,
        size: usize,
        global: bool,
        host: bool,
    ) -> SegmentResult<Self> {
        let id = identity::resolve(name, global)?;
        Self::attach(backend, id, size, host)
    }

    fn attach(backend: B, id: SegmentName, size: usize, host: bool) -> SegmentResult<Self> {
        if size == 0 {
            return Err(SegmentError::invalid_argument(format!(
                "size of segment '{}' must be greater than zero",
                id.name()
            )));
        }

        let opened = backend.create_or_open(&id, size, host)?;
        let owner = opened.created;
        let object = opened.object;

        let mapping = match backend.map(&id, &object, size) {
            Ok(mapping) => mapping,
            Err(e) => {
                Self::rollback(&backend, &id, owner, None, Some(object));
                return Err(e);
            }
        };

        let object = if owner {
            Some(object)
        } else if let Err(e) = backend.close(&id, object) {
            Self::rollback(&backend, &id, owner, Some(mapping), None);
            return Err(e);
        } else {
            None
        };

        log::info!(
            "{} segment '{}' ({} bytes, {}, {} backend)",
            match (host, owner) {
                (_, true) => "Hosting",
                (true, false) => "Adopted existing",
                (false, false) => "Attached to",
            },
            id,
            size,
            if id.is_global() { "global" } else { "local" },
            backend.kind()
        );

        Ok(Self {
            id,
            size,
            host,
            owner,
            backend,
            state: Some(Attached { mapping, object }),
        })
    }

    /// Undo a partial construction; the construction error wins over these
    ///
    /// The name is removed only when this construction created the object.
    fn rollback(
        backend: &B,
        id: &SegmentName,
        owner: bool,
        mapping: Option<B::Mapping>,
        object: Option<B::Object>,
    ) {
        if let Some(mapping) = mapping {
            if let Err(e) = backend.unmap(id, mapping) {
                log::warn!("Rollback of '{}': unmap failed: {}", id, e);
            }
        }
        if let Some(object) = object {
            if let Err(e) = backend.close(id, object) {
                log::warn!("Rollback of '{}': close failed: {}", id, e);
            }
        }
        if owner {
            if let Err(e) = backend.destroy(id) {
                log::warn!("Rollback of '{}': destroy failed: {}", id, e);
            }
        }
    }

    /// The name as supplied by the caller
    pub fn name(&self) -> &str {
        self.id.name()
    }

    /// The identifier used in the OS namespace
    pub fn os_name(&self) -> &str {
        self.id.os_name()
    }

    pub fn id(&self) -> &SegmentName {
        &self.id
    }

    /// Size in bytes, fixed at construction
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_host(&self) -> bool {
        self.host
    }

    /// Whether this instance created the backing object and will remove it
    ///
    /// False for clients, and for a host that adopted an object of the same
    /// name and size created by someone else.
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn is_global(&self) -> bool {
        self.id.is_global()
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn is_disposed(&self) -> bool {
        self.state.is_none()
    }

    pub fn info(&self) -> SegmentInfo {
        SegmentInfo {
            name: self.name().to_string(),
            os_name: self.os_name().to_string(),
            size: self.size,
            host: self.host,
            owner: self.owner,
            global: self.is_global(),
            backend: self.backend_kind(),
            platform: platform::platform_name().to_string(),
        }
    }

    fn base_ptr(&self) -> SegmentResult<NonNull<u8>> {
        self.state
            .as_ref()
            .map(|attached| attached.mapping.as_ptr())
            .ok_or_else(|| SegmentError::Disposed(self.id.name().to_string()))
    }

    /// Read access to the mapped bytes
    pub fn view(&self) -> SegmentResult<DataView<'_>> {
        let ptr = self.base_ptr()?;
        // SAFETY: the mapping is live for as long as self is borrowed and
        // spans `size` bytes. Other instances may write it concurrently; the
        // view only copies out of it, so that affects values, not validity.
        Ok(unsafe { DataView::from_raw(ptr, self.size) })
    }

    /// Write access to the mapped bytes
    pub fn view_mut(&mut self) -> SegmentResult<DataViewMut<'_>> {
        let ptr = self.base_ptr()?;
        // SAFETY: as in view(); &mut self rules out other views from this instance
        Ok(unsafe { DataViewMut::from_raw(ptr, self.size) })
    }

    /// Read text up to the first zero byte or `size` bytes
    pub fn read(&self) -> SegmentResult<String> {
        Ok(self.view()?.read_text())
    }

    /// Copy all `size` bytes
    pub fn read_buffer(&self) -> SegmentResult<Vec<u8>> {
        Ok(self.view()?.read_buffer())
    }

    /// Write text or bytes from offset 0, truncating at `size`
    ///
    /// Returns the number of payload bytes copied.
    pub fn write<'a, P: Into<Payload<'a>>>(&mut self, data: P) -> SegmentResult<usize> {
        let payload = data.into();
        Ok(self.view_mut()?.write(payload))
    }

    /// Like [`write`](Self::write), but input longer than `size` is rejected
    /// with `InvalidArgument` and memory is left untouched
    pub fn try_write<'a, P: Into<Payload<'a>>>(&mut self, data: P) -> SegmentResult<usize> {
        let payload = data.into();
        if payload.len() > self.size {
            return Err(SegmentError::InvalidArgument(format!(
                "{} bytes do not fit in segment '{}' of {} bytes",
                payload.len(),
                self.id.name(),
                self.size
            )));
        }
        Ok(self.view_mut()?.write(payload))
    }

    pub fn write_text(&mut self, text: &str) -> SegmentResult<usize> {
        Ok(self.view_mut()?.write_text(text))
    }

    pub fn write_buffer(&mut self, bytes: &[u8]) -> SegmentResult<usize> {
        Ok(self.view_mut()?.write_buffer(bytes))
    }

    /// Text accessor, same as [`read`](Self::read)
    pub fn data(&self) -> SegmentResult<String> {
        self.read()
    }

    /// Text setter, same as [`write_text`](Self::write_text)
    pub fn set_data(&mut self, text: &str) -> SegmentResult<()> {
        self.write_text(text).map(|_| ())
    }

    /// Buffer accessor, same as [`read_buffer`](Self::read_buffer)
    pub fn buffer(&self) -> SegmentResult<Vec<u8>> {
        self.read_buffer()
    }

    /// Buffer setter, same as [`write_buffer`](Self::write_buffer)
    pub fn set_buffer(&mut self, bytes: &[u8]) -> SegmentResult<()> {
        self.write_buffer(bytes).map(|_| ())
    }

    /// Release the mapping and, for the owner, remove the name
    ///
    /// Safe to call repeatedly. The segment counts as released even when a
    /// step fails; the first failure is returned once and never retried.
    pub fn dispose(&mut self) -> SegmentResult<()> {
        let Some(attached) = self.state.take() else {
            return Ok(());
        };

        let mut first_err: Option<SegmentError> = None;

        if let Err(e) = self.backend.unmap(&self.id, attached.mapping) {
            log::warn!("Failed to unmap segment '{}': {}", self.id, e);
            first_err.get_or_insert(e);
        }
        if let Some(object) = attached.object {
            if let Err(e) = self.backend.close(&self.id, object) {
                log::warn!("Failed to close segment '{}': {}", self.id, e);
                first_err.get_or_insert(e);
            }
        }
        if self.owner {
            if let Err(e) = self.backend.destroy(&self.id) {
                log::warn!("Failed to destroy segment '{}': {}", self.id, e);
                first_err.get_or_insert(e);
            }
        }

        log::debug!("Disposed segment '{}'", self.id);
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<B: SegmentBackend> Drop for SharedSegment<B> {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            log::warn!("Error while dropping segment '{}': {}", self.id, e);
        }
    }
}

impl<B: SegmentBackend> fmt::Debug for SharedSegment<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSegment")
            .field("name", &self.id.name())
            .field("os_name", &self.id.os_name())
            .field("size", &self.size)
            .field("host", &self.host)
            .field("owner", &self.owner)
            .field("global", &self.id.is_global())
            .field("backend", &self.backend.kind())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl<B: SegmentBackend> fmt::Display for SharedSegment<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} bytes, {}{})",
            self.id,
            self.size,
            if self.host { "host" } else { "client" },
            if self.id.is_global() { ", global" } else { "" }
        )
    }
}
