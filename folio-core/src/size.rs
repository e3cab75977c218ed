//! Byte-footprint estimation for size accounting.
//!
//! Estimates are used for the memory tier's running total and for the
//! `size_bytes` recorded in entry metadata. They need to be consistent, not
//! exact: structured values are measured by their compact JSON length
//! without allocating the encoded buffer.

use serde::Serialize;
use std::io;

/// Counts bytes written through it.
struct ByteCounter(u64);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Estimated footprint of a structured value (its compact JSON length).
///
/// Values that cannot be serialized fall back to their in-memory size.
pub fn estimate_size<T: Serialize + ?Sized>(value: &T) -> u64 {
    let mut counter = ByteCounter(0);
    match serde_json::to_writer(&mut counter, value) {
        Ok(()) => counter.0,
        Err(_) => std::mem::size_of_val(value) as u64,
    }
}

/// Footprint of a string (UTF-8 byte length).
pub fn estimate_str_size(s: &str) -> u64 {
    s.len() as u64
}

/// Footprint of a binary blob.
pub fn estimate_blob_size(bytes: &[u8]) -> u64 {
    bytes.len() as u64
}
