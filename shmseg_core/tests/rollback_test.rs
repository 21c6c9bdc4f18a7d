// Cleanup when a backend step fails during construction or disposal
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use shmseg_core::backend::{FileMapping, FileObject, OpenedObject};
use shmseg_core::error::ErrorKind;
use shmseg_core::identity::SegmentName;
use shmseg_core::{BackendKind, FileBackend, SegmentBackend, SegmentError, SegmentResult, SharedSegment};

#[derive(Debug, Default)]
struct Calls {
    close: AtomicUsize,
    unmap: AtomicUsize,
    destroy: AtomicUsize,
}

/// File backend that can be told to fail `map` or `unmap`
#[derive(Debug, Clone)]
struct FlakyBackend {
    inner: FileBackend,
    fail_map: bool,
    fail_unmap: bool,
    calls: Arc<Calls>,
}

impl FlakyBackend {
    fn new(root: &Path) -> Self {
        Self {
            inner: FileBackend::new(root),
            fail_map: false,
            fail_unmap: false,
            calls: Arc::new(Calls::default()),
        }
    }
}

impl SegmentBackend for FlakyBackend {
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
        self.inner.create_or_open(id, size, as_host)
    }

    fn map(&self, id: &SegmentName, object: &FileObject, size: usize) -> SegmentResult<FileMapping> {
        if self.fail_map {
            return Err(SegmentError::map_failed(
                "mmap",
                id.os_name(),
                io::Error::other("address space exhausted"),
            ));
        }
        self.inner.map(id, object, size)
    }

    fn unmap(&self, id: &SegmentName, mapping: FileMapping) -> SegmentResult<()> {
        self.calls.unmap.fetch_add(1, Ordering::SeqCst);
        self.inner.unmap(id, mapping)?;
        if self.fail_unmap {
            return Err(SegmentError::from_io(
                "munmap",
                id.os_name(),
                io::Error::other("unmap refused"),
            ));
        }
        Ok(())
    }

    fn close(&self, id: &SegmentName, object: FileObject) -> SegmentResult<()> {
        self.calls.close.fetch_add(1, Ordering::SeqCst);
        self.inner.close(id, object)
    }

    fn destroy(&self, id: &SegmentName) -> SegmentResult<()> {
        self.calls.destroy.fetch_add(1, Ordering::SeqCst);
        self.inner.destroy(id)
    }
}

fn segment_file(root: &Path, name: &str) -> std::path::PathBuf {
    root.join("local").join(name)
}

#[test]
fn test_map_failure_rolls_back_created_object() {
    let dir = tempfile::tempdir().unwrap();
    let mut backend = FlakyBackend::new(dir.path());
    backend.fail_map = true;
    let calls = backend.calls.clone();

    let err = SharedSegment::with_backend(backend, "frames", 256, false, true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MapFailed);

    assert_eq!(calls.close.load(Ordering::SeqCst), 1);
    assert_eq!(calls.destroy.load(Ordering::SeqCst), 1);
    assert!(!segment_file(dir.path(), "frames").exists());
}

#[test]
fn test_map_failure_after_adopting_keeps_creator_object() {
    let dir = tempfile::tempdir().unwrap();
    let mut creator =
        SharedSegment::with_backend(FileBackend::new(dir.path()), "shared", 64, false, true)
            .unwrap();
    creator.write("kept").unwrap();

    let mut backend = FlakyBackend::new(dir.path());
    backend.fail_map = true;
    let calls = backend.calls.clone();

    let err = SharedSegment::with_backend(backend, "shared", 64, false, true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MapFailed);
    assert_eq!(calls.close.load(Ordering::SeqCst), 1);
    assert_eq!(calls.destroy.load(Ordering::SeqCst), 0);

    assert!(segment_file(dir.path(), "shared").exists());
    let client =
        SharedSegment::with_backend(FileBackend::new(dir.path()), "shared", 64, false, false)
            .unwrap();
    assert_eq!(client.read().unwrap(), "kept");
}

#[test]
fn test_map_failure_on_client_never_destroys() {
    let dir = tempfile::tempdir().unwrap();
    let _host =
        SharedSegment::with_backend(FileBackend::new(dir.path()), "telemetry", 32, false, true)
            .unwrap();

    let mut backend = FlakyBackend::new(dir.path());
    backend.fail_map = true;
    let calls = backend.calls.clone();

    let err = SharedSegment::with_backend(backend, "telemetry", 32, false, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MapFailed);
    assert_eq!(calls.close.load(Ordering::SeqCst), 1);
    assert_eq!(calls.destroy.load(Ordering::SeqCst), 0);
    assert!(segment_file(dir.path(), "telemetry").exists());
}

#[test]
fn test_unmap_failure_is_reported_once_and_segment_released() {
    let dir = tempfile::tempdir().unwrap();
    let mut backend = FlakyBackend::new(dir.path());
    backend.fail_unmap = true;
    let calls = backend.calls.clone();

    let mut host = SharedSegment::with_backend(backend, "status", 128, false, true).unwrap();
    host.write("bye").unwrap();

    let err = host.dispose().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Os);
    assert!(host.is_disposed());

    // Later steps still ran despite the unmap failure
    assert_eq!(calls.close.load(Ordering::SeqCst), 1);
    assert_eq!(calls.destroy.load(Ordering::SeqCst), 1);
    assert!(!segment_file(dir.path(), "status").exists());

    // Surfaced once, never retried
    host.dispose().unwrap();
    drop(host);
    assert_eq!(calls.unmap.load(Ordering::SeqCst), 1);
    assert_eq!(calls.destroy.load(Ordering::SeqCst), 1);
}

#[test]
fn test_drop_after_failed_unmap_does_not_panic() {
    let dir = tempfile::tempdir().unwrap();
    let mut backend = FlakyBackend::new(dir.path());
    backend.fail_unmap = true;
    let calls = backend.calls.clone();

    let host = SharedSegment::with_backend(backend, "dropped", 16, false, true).unwrap();
    drop(host);

    assert_eq!(calls.unmap.load(Ordering::SeqCst), 1);
    assert_eq!(calls.destroy.load(Ordering::SeqCst), 1);
    assert!(!segment_file(dir.path(), "dropped").exists());
}
