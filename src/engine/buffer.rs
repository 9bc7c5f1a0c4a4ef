use std::cmp;

/// Decoded bytes of the current entry that were produced but not served yet.
///
/// Owned storage plus a `(start, remaining)` window over it: nothing ever
/// points into the storage from outside, so tearing the decoder down and
/// rebuilding it can't leave a dangling view behind.
#[derive(Debug)]
pub(crate) struct DecompressBuffer {
    storage: Vec<u8>,
    capacity: usize,
    start: usize,
    remaining: usize,
}

impl DecompressBuffer {
    /// Storage is only allocated on the first refill.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            storage: Vec::new(),
            capacity,
            start: 0,
            remaining: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn remaining(&self) -> usize {
        self.remaining
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.remaining == 0
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.storage[self.start..][..self.remaining]
    }

    pub(crate) fn consume(&mut self, n: usize) {
        let n = cmp::min(n, self.remaining);
        self.start += n;
        self.remaining -= n;
        if self.remaining == 0 {
            self.start = 0;
        }
    }

    /// Copies up to `out.len()` bytes out of the window, consuming them.
    pub(crate) fn serve(&mut self, out: &mut [u8]) -> usize {
        let n = cmp::min(out.len(), self.remaining);
        out[..n].copy_from_slice(&self.data()[..n]);
        self.consume(n);
        n
    }

    pub(crate) fn clear(&mut self) {
        self.start = 0;
        self.remaining = 0;
    }

    /// Replaces the window with up to `max` fresh bytes (bounded by the
    /// capacity), calling `produce` until it fills the space or returns 0.
    ///
    /// On error the window is left empty.
    pub(crate) fn refill<E>(
        &mut self,
        max: usize,
        mut produce: impl FnMut(&mut [u8]) -> Result<usize, E>,
    ) -> Result<usize, E> {
        self.clear();
        let max = cmp::min(max, self.capacity);
        if self.storage.len() < max {
            self.storage.resize(self.capacity, 0);
        }

        let mut filled = 0;
        while filled < max {
            match produce(&mut self.storage[filled..max]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => return Err(e),
            }
        }
        self.remaining = filled;
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refill_is_bounded_by_capacity() {
        let mut buf = DecompressBuffer::new(8);
        let mut calls = 0;
        let n = buf
            .refill(1 << 20, |out| {
                calls += 1;
                let n = cmp::min(3, out.len());
                out[..n].copy_from_slice(&b"abc"[..n]);
                Ok::<_, ()>(n)
            })
            .unwrap();
        assert_eq!(n, 8);
        assert_eq!(buf.remaining(), buf.capacity());
        assert_eq!(calls, 3);
        assert_eq!(buf.data(), b"abcabcab");
    }

    #[test]
    fn serve_advances_window() {
        let mut buf = DecompressBuffer::new(16);
        let mut source = &b"0123456789"[..];
        buf.refill(16, |out| {
            let n = cmp::min(out.len(), source.len());
            out[..n].copy_from_slice(&source[..n]);
            source = &source[n..];
            Ok::<_, ()>(n)
        })
        .unwrap();
        assert_eq!(buf.remaining(), 10);

        let mut out = [0u8; 4];
        assert_eq!(buf.serve(&mut out), 4);
        assert_eq!(&out, b"0123");
        buf.consume(2);
        assert_eq!(buf.data(), b"6789");
        assert_eq!(buf.serve(&mut [0u8; 100]), 4);
        assert!(buf.is_empty());
    }

    #[test]
    fn errors_leave_the_window_empty() {
        let mut buf = DecompressBuffer::new(16);
        let res = buf.refill(16, |_| Err("boom"));
        assert_eq!(res, Err("boom"));
        assert!(buf.is_empty());
    }
}
