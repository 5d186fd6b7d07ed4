//! The UART RX ring buffer (spec §4.A). On real hardware this is filled by
//! an interrupt handler; here a [`binding::SerialBinding`] reader task plays
//! that role, pushing bytes as they arrive off the wire.

use std::collections::VecDeque;

/// Minimum capacity per spec §4.A ("fixed ring of size >= 128").
pub const MIN_CAPACITY: usize = 128;

/// A fixed-capacity byte ring. On overflow the oldest byte is dropped
/// silently — the spec's framer resynchronizes on the next `SOF` byte, so
/// losing an old, already-unparseable byte is harmless.
pub struct RxRing {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl RxRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn put_char(&mut self, byte: u8) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(byte);
    }

    pub fn put_buf(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.put_char(b);
        }
    }

    pub fn get_char(&mut self) -> Option<u8> {
        self.buf.pop_front()
    }

    /// Drains up to `max` bytes, in order, leaving the rest in the ring.
    pub fn get_buf(&mut self, max: usize) -> Vec<u8> {
        let n = max.min(self.buf.len());
        self.buf.drain(..n).collect()
    }

    /// Copies out everything currently buffered without removing it, for
    /// the framer to peek at while it decides whether a full frame has
    /// arrived yet.
    pub fn peek_all(&self) -> Vec<u8> {
        self.buf.iter().copied().collect()
    }

    pub fn rx_count(&self) -> usize {
        self.buf.len()
    }
}

impl Default for RxRing {
    fn default() -> Self {
        Self::new(MIN_CAPACITY)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fifo_order_is_preserved() {
        let mut ring = RxRing::new(4);
        ring.put_buf(&[1, 2, 3]);
        assert_eq!(ring.rx_count(), 3);
        assert_eq!(ring.get_char(), Some(1));
        assert_eq!(ring.get_buf(10), vec![2, 3]);
    }

    #[test]
    fn overflow_drops_oldest_byte_silently() {
        let mut ring = RxRing::new(2);
        ring.put_buf(&[1, 2, 3]);
        assert_eq!(ring.rx_count(), 2);
        assert_eq!(ring.get_buf(10), vec![2, 3]);
    }
}
