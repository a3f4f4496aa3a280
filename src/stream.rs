use std::fmt;

/// Growable output buffer for an encoder session.
///
/// Capacity is tracked explicitly: when a write of `n` bytes would run past it, the capacity
/// becomes `2 * (len + n)`. Growth never fails from the caller's point of view.
#[derive(Clone, Default)]
pub struct StreamBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl fmt::Debug for StreamBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StreamBuffer")
            .field("len", &self.data.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Drop all written bytes, keeping the capacity.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Make room for `n` more bytes.
    pub fn reserve(&mut self, n: usize) {
        let needed = self.data.len() + n;
        if needed > self.capacity {
            self.capacity = 2 * needed;
            self.data.reserve_exact(self.capacity - self.data.len());
        }
    }

    pub fn push(&mut self, byte: u8) {
        self.reserve(1);
        self.data.push(byte);
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        self.data.extend_from_slice(bytes);
    }

    /// Insert `bytes` at `pos`, shifting everything after it back. Used to put a presence map in
    /// front of fields that were encoded before the map was complete.
    pub fn insert(&mut self, pos: usize, bytes: &[u8]) {
        debug_assert!(pos <= self.data.len());
        self.reserve(bytes.len());
        self.data.splice(pos..pos, bytes.iter().copied());
    }

    /// Cut the buffer back to `len` bytes. Used to drop a partially encoded message.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    /// Take the written bytes out, leaving the buffer empty with its capacity reset.
    pub fn take(&mut self) -> Vec<u8> {
        self.capacity = 0;
        std::mem::take(&mut self.data)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn growth_doubles_required_size() {
        let mut buf = StreamBuffer::with_capacity(4);
        buf.extend_from_slice(&[1, 2, 3]);
        assert_eq!(buf.capacity(), 4);
        buf.extend_from_slice(&[4, 5]);
        assert_eq!(buf.capacity(), 10);
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4, 5]);
        buf.push(6);
        assert_eq!(buf.capacity(), 10);
    }

    #[test]
    fn zero_capacity_grows_on_first_write() {
        let mut buf = StreamBuffer::new();
        assert_eq!(buf.capacity(), 0);
        buf.push(0x80);
        assert_eq!(buf.capacity(), 2);
    }

    #[test]
    fn insert_and_truncate() {
        let mut buf = StreamBuffer::with_capacity(8);
        buf.extend_from_slice(&[9, 9, 3, 4]);
        buf.insert(2, &[0xC0]);
        assert_eq!(buf.as_slice(), &[9, 9, 0xC0, 3, 4]);
        buf.truncate(2);
        assert_eq!(buf.as_slice(), &[9, 9]);
        let out = buf.take();
        assert_eq!(out, vec![9, 9]);
        assert!(buf.is_empty());
    }
}
