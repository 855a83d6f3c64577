//! Fixed capacity byte buffer with independent read/write cursors.
//!
//! ```text
//! 0          read         write       capacity
//! |  consumed  | readable  | writable    |
//! ```
//!
//! Both cursors go back to 0 once every written byte has been read.

use std::fmt;

pub struct Buffer {
    data: Box<[u8]>,
    // 0 <= read <= write <= data.len()
    read: usize,
    write: usize,
}

impl Buffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            read: 0,
            write: 0,
        }
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// number of bytes written but not read yet
    pub fn len(&self) -> usize {
        self.write - self.read
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    pub fn can_read(&self) -> bool {
        !self.is_empty()
    }

    pub fn can_write(&self) -> bool {
        self.write < self.data.len()
    }

    pub fn readable(&self) -> &[u8] {
        &self.data[self.read..self.write]
    }

    pub fn writable(&mut self) -> &mut [u8] {
        &mut self.data[self.write..]
    }

    /// Mark `n` readable bytes as consumed.
    ///
    /// # Panics
    /// `n` is larger than `self.len()`
    pub fn advance_read(&mut self, n: usize) {
        assert!(n <= self.len(), "advance_read: {} > {}", n, self.len());
        self.read += n;
        if self.read == self.write {
            self.compact();
        }
    }

    /// Mark `n` bytes of the writable region as filled.
    ///
    /// # Panics
    /// `n` is larger than the writable region
    pub fn advance_write(&mut self, n: usize) {
        assert!(
            n <= self.data.len() - self.write,
            "advance_write: {} > {}",
            n,
            self.data.len() - self.write
        );
        self.write += n;
    }

    pub fn read_byte(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let b = self.data[self.read];
        self.advance_read(1);
        Some(b)
    }

    /// Copy as many bytes of `src` as fit. Returns the number of bytes copied.
    #[cfg(test)]
    pub fn write_slice(&mut self, src: &[u8]) -> usize {
        let dst = self.writable();
        let n = dst.len().min(src.len());
        dst[..n].copy_from_slice(&src[..n]);
        self.advance_write(n);
        n
    }

    fn compact(&mut self) {
        self.read = 0;
        self.write = 0;
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Buffer {{ read: {}, write: {}, capacity: {} }}",
            self.read,
            self.write,
            self.data.len()
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cursors() {
        let mut buf = Buffer::new(8);
        assert!(buf.is_empty());
        assert!(buf.can_write());
        assert_eq!(buf.write_slice(b"hello"), 5);
        assert_eq!(buf.readable(), b"hello");
        assert_eq!(buf.writable().len(), 3);

        assert_eq!(buf.read_byte(), Some(b'h'));
        buf.advance_read(2);
        assert_eq!(buf.readable(), b"lo");
        // not compacted until drained
        assert_eq!(buf.writable().len(), 3);

        assert_eq!(buf.write_slice(b"world"), 3);
        assert!(!buf.can_write());
        assert_eq!(buf.readable(), b"lowor");

        buf.advance_read(5);
        assert!(buf.is_empty());
        assert_eq!(buf.writable().len(), 8);
        assert_eq!(buf.read_byte(), None);
    }

    #[test]
    #[should_panic]
    fn advance_read_beyond_write() {
        let mut buf = Buffer::new(4);
        buf.write_slice(b"ab");
        buf.advance_read(3);
    }

    #[test]
    #[should_panic]
    fn advance_write_beyond_capacity() {
        let mut buf = Buffer::new(4);
        buf.advance_write(5);
    }
}
