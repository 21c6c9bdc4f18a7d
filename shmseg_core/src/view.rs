//! Text and raw byte access over a mapped region
//!
//! Both disciplines address the same bytes from offset 0 and can be mixed
//! freely on one segment, with one hazard: text reads stop at the first zero
//! byte *or* at the end of the region. Bytes written with buffer semantics
//! and no zero byte inside the region therefore read back as text spanning
//! the whole region, including whatever was never meant to be characters.
//!
//! ```text
//! write_text("hi") on 8 bytes of 0xFF:   68 69 00 FF FF FF FF FF
//!                                        └─ text ─┘└ untouched ┘
//! write_buffer([1, 2]) on the same:      01 02 00 FF FF FF FF FF
//! ```
//!
//! Neither discipline zero-fills the tail. Nothing here synchronizes with
//! other mappings of the segment: a concurrent writer in another instance
//! or process may interleave with any copy, and readers may observe torn
//! data. Callers that need ordering have to build it on top.

use std::marker::PhantomData;
use std::ptr::{self, NonNull};

/// Data handed to [`DataViewMut::write`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload<'a> {
    /// UTF-8 text, terminated with a zero byte when room remains
    Text(&'a str),
    /// Raw bytes, copied verbatim
    Bytes(&'a [u8]),
}

impl Payload<'_> {
    /// Encoded length before truncation
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(s) => s.len(),
            Payload::Bytes(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a> From<&'a str> for Payload<'a> {
    fn from(s: &'a str) -> Self {
        Payload::Text(s)
    }
}

impl<'a> From<&'a String> for Payload<'a> {
    fn from(s: &'a String) -> Self {
        Payload::Text(s.as_str())
    }
}

impl<'a> From<&'a [u8]> for Payload<'a> {
    fn from(b: &'a [u8]) -> Self {
        Payload::Bytes(b)
    }
}

impl<'a> From<&'a Vec<u8>> for Payload<'a> {
    fn from(b: &'a Vec<u8>) -> Self {
        Payload::Bytes(b.as_slice())
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for Payload<'a> {
    fn from(b: &'a [u8; N]) -> Self {
        Payload::Bytes(b.as_slice())
    }
}

/// Read access to a region
///
/// Holds the base pointer instead of a slice: other mappings of the same
/// object may change the bytes at any time, so every access is a copy out of
/// the region and no reference into it is handed out.
#[derive(Debug, Clone, Copy)]
pub struct DataView<'a> {
    ptr: NonNull<u8>,
    len: usize,
    _region: PhantomData<&'a [u8]>,
}

impl<'a> DataView<'a> {
    /// View over memory owned by this process alone
    pub fn new(region: &'a [u8]) -> Self {
        Self {
            ptr: NonNull::from(region).cast(),
            len: region.len(),
            _region: PhantomData,
        }
    }

    /// View over `len` bytes of mapped memory at `ptr`
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads of `len` bytes for the whole of `'a`.
    pub unsafe fn from_raw(ptr: NonNull<u8>, len: usize) -> Self {
        Self {
            ptr,
            len,
            _region: PhantomData,
        }
    }

    /// Region length in bytes
    pub fn size(&self) -> usize {
        self.len
    }

    fn byte(&self, i: usize) -> u8 {
        debug_assert!(i < self.len);
        // SAFETY: i < len, and the region is readable for 'a
        unsafe { self.ptr.as_ptr().add(i).read() }
    }

    /// Length of the text prefix: up to the first zero byte or the region end
    pub fn text_len(&self) -> usize {
        (0..self.len).find(|&i| self.byte(i) == 0).unwrap_or(self.len)
    }

    /// Decode the text prefix
    ///
    /// Invalid UTF-8 (e.g. a multi-byte character cut by a truncating write,
    /// or raw bytes written as a buffer) is replaced with U+FFFD.
    pub fn read_text(&self) -> String {
        let mut bytes = vec![0u8; self.text_len()];
        self.read_into(&mut bytes);
        // A concurrent writer may have moved the terminator since the scan
        if let Some(end) = bytes.iter().position(|&b| b == 0) {
            bytes.truncate(end);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Copy the whole region, embedded zero bytes included
    pub fn read_buffer(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.len];
        self.read_into(&mut bytes);
        bytes
    }

    /// Copy the start of the region into `dst`, returning the number of bytes copied
    pub fn read_into(&self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.len);
        // SAFETY: the source is readable for n <= len bytes and cannot
        // overlap a slice the caller holds exclusively
        unsafe { ptr::copy_nonoverlapping(self.ptr.as_ptr(), dst.as_mut_ptr(), n) };
        n
    }
}

/// Write access to a region
#[derive(Debug)]
pub struct DataViewMut<'a> {
    ptr: NonNull<u8>,
    len: usize,
    _region: PhantomData<&'a mut [u8]>,
}

impl<'a> DataViewMut<'a> {
    /// View over memory owned by this process alone
    pub fn new(region: &'a mut [u8]) -> Self {
        Self {
            len: region.len(),
            ptr: NonNull::from(region).cast(),
            _region: PhantomData,
        }
    }

    /// Writable view over `len` bytes of mapped memory at `ptr`
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for the whole
    /// of `'a`, with no other view of it alive in this instance.
    pub unsafe fn from_raw(ptr: NonNull<u8>, len: usize) -> Self {
        Self {
            ptr,
            len,
            _region: PhantomData,
        }
    }

    pub fn size(&self) -> usize {
        self.len
    }

    pub fn as_view(&self) -> DataView<'_> {
        // SAFETY: readable for as long as self is borrowed
        unsafe { DataView::from_raw(self.ptr, self.len) }
    }

    fn copy_from(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.len);
        // SAFETY: the region is writable for n <= len bytes; `bytes` is a
        // Rust slice and cannot alias the mapping through this view
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.as_ptr(), n) };
        n
    }

    /// Copy `text` from offset 0, truncating at the region end
    ///
    /// A zero terminator follows the text when it fits; nothing beyond the
    /// terminator is touched. Returns the number of text bytes copied.
    pub fn write_text(&mut self, text: &str) -> usize {
        let n = self.copy_from(text.as_bytes());
        if n < self.len {
            // SAFETY: n < len
            unsafe { self.ptr.as_ptr().add(n).write(0) };
        }
        n
    }

    /// Copy `bytes` from offset 0, truncating at the region end
    ///
    /// The tail beyond `bytes` keeps its previous contents. Returns the number
    /// of bytes copied.
    pub fn write_buffer(&mut self, bytes: &[u8]) -> usize {
        self.copy_from(bytes)
    }

    /// Dispatch on the payload variant
    pub fn write(&mut self, payload: Payload<'_>) -> usize {
        match payload {
            Payload::Text(s) => self.write_text(s),
            Payload::Bytes(b) => self.write_buffer(b),
        }
    }
}
