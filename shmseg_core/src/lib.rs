//! # SHMSEG Core
//!
//! Named shared memory segments that several processes can map at once.
//!
//! One process *hosts* a segment of a fixed size under a string name; any
//! process that knows the name attaches as a *client* and reads or writes
//! the same physical memory. This crate provides:
//!
//! - **Identity**: name validation and placement in the local or global namespace
//! - **Backends**: POSIX `shm_open`, Windows named file mappings, memory-mapped files
//! - **Segments**: host/client lifecycle with guaranteed release on drop
//! - **Views**: zero-terminated text and fixed-length buffer access
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shmseg_core::SharedSegment;
//!
//! let mut host = SharedSegment::create("status", 1024)?;
//! let client = SharedSegment::open("status", 1024)?;
//!
//! host.set_data("hello")?;
//! assert_eq!(client.data()?, "hello");
//! # Ok::<(), shmseg_core::SegmentError>(())
//! ```
//!
//! No locking is provided. Writers in different instances race, and readers
//! may observe partially written data; see [`segment`] for details.

pub mod backend;
pub mod config;
pub mod error;
pub mod identity;
pub mod platform;
pub mod segment;
pub mod view;

// Re-export commonly used types for easy access
pub use backend::{AnyBackend, BackendKind, FileBackend, NativeBackend, SegmentBackend};
pub use config::{SegmentConfig, ShmsegConfig};
pub use error::{ErrorKind, SegmentError, SegmentResult};
pub use identity::{generate_id, generate_id_async, resolve, SegmentName};
pub use segment::{SegmentInfo, SharedSegment};
pub use view::{DataView, DataViewMut, Payload};
