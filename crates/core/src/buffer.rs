//! A growable byte buffer split into `[prepend reserve | readable | writable]`.
//!
//! Mirrors the original C++ `Buffer`: a small cheap-prepend region lets a
//! 4-byte length prefix be written in place once the payload is already
//! buffered, instead of a separate allocation-and-copy per frame.

use std::io::{self, IoSliceMut, Read};

/// Bytes reserved at the front of the buffer so a length prefix can be
/// back-written without shifting the payload.
pub const CHEAP_PREPEND: usize = 8;
const INITIAL_SIZE: usize = 1024;
/// Size of the on-stack scratch block used by `read_fd`'s scatter read.
const SCRATCH_SIZE: usize = 65536;

/// A readable/writable byte buffer with cheap prepend reserve and amortized
/// growth.
#[derive(Debug, Clone)]
pub struct Buffer {
    data: Vec<u8>,
    reader_idx: usize,
    writer_idx: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_SIZE)
    }

    pub fn with_capacity(initial: usize) -> Self {
        Self {
            data: vec![0u8; CHEAP_PREPEND + initial],
            reader_idx: CHEAP_PREPEND,
            writer_idx: CHEAP_PREPEND,
        }
    }

    pub fn readable_bytes(&self) -> usize {
        self.writer_idx - self.reader_idx
    }

    pub fn writable_bytes(&self) -> usize {
        self.data.len() - self.writer_idx
    }

    pub fn prependable_bytes(&self) -> usize {
        self.reader_idx
    }

    pub fn is_empty(&self) -> bool {
        self.readable_bytes() == 0
    }

    /// The readable region.
    pub fn peek(&self) -> &[u8] {
        &self.data[self.reader_idx..self.writer_idx]
    }

    /// Peek a big-endian `u32` at the front of the readable region, without
    /// consuming it. Panics if fewer than 4 bytes are readable.
    pub fn peek_u32_be(&self) -> u32 {
        let b = &self.data[self.reader_idx..self.reader_idx + 4];
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }

    /// Read and consume a big-endian `u32` from the front of the readable
    /// region.
    pub fn read_u32_be(&mut self) -> u32 {
        let v = self.peek_u32_be();
        self.retrieve(4);
        v
    }

    /// Advance the reader index by `len`, collapsing both indices back to
    /// the reserve base once everything has been consumed.
    pub fn retrieve(&mut self, len: usize) {
        if len < self.readable_bytes() {
            self.reader_idx += len;
        } else {
            self.retrieve_all();
        }
    }

    pub fn retrieve_all(&mut self) {
        self.reader_idx = CHEAP_PREPEND;
        self.writer_idx = CHEAP_PREPEND;
    }

    pub fn retrieve_as_vec(&mut self, len: usize) -> Vec<u8> {
        let out = self.data[self.reader_idx..self.reader_idx + len].to_vec();
        self.retrieve(len);
        out
    }

    pub fn retrieve_all_as_vec(&mut self) -> Vec<u8> {
        self.retrieve_as_vec(self.readable_bytes())
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.ensure_writable(bytes.len());
        let start = self.writer_idx;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.has_written(bytes.len());
    }

    /// Prepend `bytes` directly ahead of the readable region. Requires
    /// `bytes.len() <= prependable_bytes()`; used to back-write a length
    /// prefix once the payload is already in the buffer.
    pub fn prepend(&mut self, bytes: &[u8]) {
        debug_assert!(bytes.len() <= self.prependable_bytes());
        self.reader_idx -= bytes.len();
        self.data[self.reader_idx..self.reader_idx + bytes.len()].copy_from_slice(bytes);
    }

    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable_bytes() < len {
            self.make_space(len);
        }
    }

    pub fn has_written(&mut self, len: usize) {
        self.writer_idx += len;
    }

    fn make_space(&mut self, len: usize) {
        if self.writable_bytes() + self.prependable_bytes() < len + CHEAP_PREPEND {
            self.data.resize(self.writer_idx + len, 0);
        } else {
            let readable = self.readable_bytes();
            self.data
                .copy_within(self.reader_idx..self.writer_idx, CHEAP_PREPEND);
            self.reader_idx = CHEAP_PREPEND;
            self.writer_idx = self.reader_idx + readable;
        }
    }

    /// Read as many bytes as the kernel will hand back in one call, using a
    /// stack scratch block as a second scatter-read target so a single
    /// syscall can absorb more than the buffer's current writable capacity.
    pub fn read_fd(&mut self, fd: &mut impl Read) -> io::Result<usize> {
        let writable = self.writable_bytes();
        let mut scratch = [0u8; SCRATCH_SIZE];

        let mut slices = [
            IoSliceMut::new(&mut self.data[self.writer_idx..]),
            IoSliceMut::new(&mut scratch),
        ];
        // `writable` is unused directly; `read_vectored` fills the first
        // slice before spilling into the scratch block.
        let n = fd.read_vectored(&mut slices)?;

        if n <= writable {
            self.has_written(n);
        } else {
            self.has_written(writable);
            self.append(&scratch[..n - writable]);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_retrieve_round_trips() {
        let mut buf = Buffer::new();
        buf.append(b"hello");
        assert_eq!(buf.readable_bytes(), 5);
        assert_eq!(buf.retrieve_as_vec(5), b"hello");
        assert_eq!(buf.readable_bytes(), 0);
    }

    #[test]
    fn prepend_writes_length_prefix_in_place() {
        let mut buf = Buffer::new();
        buf.append(b"payload");
        buf.prepend(&7u32.to_be_bytes());
        assert_eq!(buf.readable_bytes(), 11);
        assert_eq!(&buf.peek()[..4], &7u32.to_be_bytes());
        assert_eq!(&buf.peek()[4..], b"payload");
    }

    #[test]
    fn growth_shifts_before_reallocating() {
        let mut buf = Buffer::with_capacity(16);
        buf.append(&[1; 10]);
        buf.retrieve(10);
        // readable is empty but writer_idx has advanced; appending again
        // should shift back to the reserve base rather than growing.
        let cap_before = buf.data.len();
        buf.append(&[2; 10]);
        assert_eq!(buf.data.len(), cap_before);
        assert_eq!(buf.peek(), &[2; 10]);
    }

    #[test]
    fn growth_reallocates_when_shift_is_insufficient() {
        let mut buf = Buffer::with_capacity(4);
        buf.append(&[1, 2, 3, 4]);
        buf.append(&[5, 6, 7, 8]);
        assert_eq!(buf.readable_bytes(), 8);
        assert_eq!(buf.peek(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn peek_u32_be_reads_without_consuming() {
        let mut buf = Buffer::new();
        buf.append(&42u32.to_be_bytes());
        assert_eq!(buf.peek_u32_be(), 42);
        assert_eq!(buf.readable_bytes(), 4);
        assert_eq!(buf.read_u32_be(), 42);
        assert_eq!(buf.readable_bytes(), 0);
    }
}
