//! Fixed-capacity accumulation buffer for audio fragments
//!
//! The window is allocated once and never grows. Bytes offered past capacity
//! are dropped; the caller learns how many were taken from `append`.

/// Bounded sample buffer filled by successive audio packets
#[derive(Debug, Clone)]
pub struct AudioWindow {
    buf: Box<[u8]>,
    cursor: usize,
}

impl AudioWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    pub fn remaining_capacity(&self) -> usize {
        self.buf.len() - self.cursor
    }

    pub fn is_full(&self) -> bool {
        self.cursor == self.buf.len()
    }

    /// Copy as much of `bytes` as fits, returning the number accepted
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.remaining_capacity());
        self.buf[self.cursor..self.cursor + n].copy_from_slice(&bytes[..n]);
        self.cursor += n;
        n
    }

    /// Filled portion of the window
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.cursor]
    }

    /// Rewind the write cursor; only the driver calls this, after a drain
    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fills_exactly_from_uneven_fragments() {
        let mut window = AudioWindow::new(320);
        assert_eq!(window.append(&[1u8; 100]), 100);
        assert_eq!(window.append(&[2u8; 100]), 100);
        assert!(!window.is_full());
        assert_eq!(window.remaining_capacity(), 120);
        assert_eq!(window.append(&[3u8; 120]), 120);
        assert!(window.is_full());
        assert_eq!(window.as_slice()[0], 1);
        assert_eq!(window.as_slice()[319], 3);
    }

    #[test]
    fn test_excess_is_dropped() {
        let mut window = AudioWindow::new(8);
        assert_eq!(window.append(&[0xAA; 5]), 5);
        assert_eq!(window.append(&[0xBB; 5]), 3);
        assert!(window.is_full());
        assert_eq!(window.append(&[0xCC; 1]), 0);
        assert_eq!(window.as_slice(), &[0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xBB, 0xBB, 0xBB]);
    }

    #[test]
    fn test_reset_is_explicit() {
        let mut window = AudioWindow::new(4);
        window.append(&[1, 2, 3, 4]);
        assert!(window.is_full());
        window.reset();
        assert!(window.is_empty());
        assert_eq!(window.remaining_capacity(), 4);
        assert_eq!(window.append(&[9]), 1);
        assert_eq!(window.as_slice(), &[9]);
    }

    proptest! {
        #[test]
        fn prop_stored_bytes_are_bounded_by_capacity(
            capacity in 0usize..1024,
            fragments in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..200), 0..20)
        ) {
            let mut window = AudioWindow::new(capacity);
            let mut offered = Vec::new();
            for fragment in &fragments {
                window.append(fragment);
                offered.extend_from_slice(fragment);
                prop_assert!(window.len() <= capacity);
            }
            let expected = offered.len().min(capacity);
            prop_assert_eq!(window.len(), expected);
            prop_assert_eq!(window.as_slice(), &offered[..expected]);
        }
    }
}
