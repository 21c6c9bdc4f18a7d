//! # SHMSEG - named shared memory segments
//!
//! One process hosts a block of memory under a name; every process that
//! knows the name can attach and see the same bytes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shmseg::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let id = generate_id(false);
//!     let mut host = SharedSegment::from_name(&id, 1024, true)?;
//!     let client = SharedSegment::from_name(&id, 1024, false)?;
//!
//!     host.write("hello")?;
//!     assert_eq!(client.read()?, "hello");
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Host/client lifecycle** with release on drop
//! - **Text and buffer views** over the same memory
//! - **Native and file-backed** storage, selectable by configuration

// Re-export core components
pub use shmseg_core::{self, *};

/// The SHMSEG prelude - everything you need to get started
pub mod prelude {
    pub use shmseg_core::backend::{AnyBackend, BackendKind, FileBackend, NativeBackend};
    pub use shmseg_core::config::{SegmentConfig, ShmsegConfig};
    pub use shmseg_core::identity::{generate_id, generate_id_async, SegmentName};
    pub use shmseg_core::segment::{SegmentInfo, SharedSegment};
    pub use shmseg_core::view::Payload;

    // Error types
    pub use shmseg_core::error::{ErrorKind, SegmentError, SegmentResult};
    pub type Result<T> = SegmentResult<T>;

    // Re-export anyhow for application-level error handling
    pub use anyhow::{anyhow, bail, ensure, Context, Result as AnyResult};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get SHMSEG version
pub fn version() -> &'static str {
    VERSION
}
