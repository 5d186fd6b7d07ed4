//! Nonce table and replay blacklist (spec §4.D). Grounded in the teacher's
//! fixed-capacity resource tables (`controller/storage.rs`'s `RwLock`-guarded
//! arrays) but following spec §9's explicit redesign note: `Option<Entry>`
//! slots instead of an in-band `ttl == 0` sentinel.

use std::collections::VecDeque;

pub const NONCE_CAPACITY: usize = 30;
pub const BLACKLIST_CAPACITY: usize = 10;

/// Decremented once a second by [`NonceStore::tick`]; an entry is live
/// while `ttl > 0` (spec §4.D).
pub const NONCE_TTL_SECONDS: u8 = 10;

#[derive(Debug, Clone, Copy)]
struct NonceEntry {
    src: u8,
    dst: u8,
    nonce: [u8; 8],
    reply_nonce: bool,
    ttl: u8,
}

/// The short-lived nonce table (spec §4.D). `src`/`dst` are plain node
/// bytes: S0 is a classic-only security class and never runs over Long
/// Range, so there's no 16-bit node-id case to carry here.
#[derive(Default)]
pub struct NonceStore {
    entries: [Option<NonceEntry>; NONCE_CAPACITY],
}

impl NonceStore {
    pub fn new() -> Self {
        Self {
            entries: [None; NONCE_CAPACITY],
        }
    }

    /// Stores `nonce` for `(src, dst)`. A live reply-nonce entry for the
    /// same pair is overwritten in place; otherwise the first empty slot is
    /// used. Returns `false` if the table is full and no existing
    /// reply-nonce slot could be reused.
    pub fn register(&mut self, src: u8, dst: u8, reply_nonce: bool, nonce: [u8; 8]) -> bool {
        if reply_nonce {
            if let Some(slot) = self
                .entries
                .iter_mut()
                .flatten()
                .find(|e| e.src == src && e.dst == dst && e.reply_nonce)
            {
                slot.nonce = nonce;
                slot.ttl = NONCE_TTL_SECONDS;
                return true;
            }
        }
        match self.entries.iter_mut().find(|e| e.is_none()) {
            Some(slot) => {
                *slot = Some(NonceEntry {
                    src,
                    dst,
                    nonce,
                    reply_nonce,
                    ttl: NONCE_TTL_SECONDS,
                });
                true
            }
            None => false,
        }
    }

    /// Finds the first live entry for `(src, dst)` whose first nonce byte
    /// equals `ri`, or any entry for the pair when `ri` is `None`.
    pub fn get(&self, src: u8, dst: u8, ri: Option<u8>) -> Option<[u8; 8]> {
        self.entries.iter().flatten().find_map(|e| {
            let matches_pair = e.src == src && e.dst == dst;
            let matches_ri = ri.is_none_or(|ri| e.nonce[0] == ri);
            (matches_pair && matches_ri).then_some(e.nonce)
        })
    }

    /// Marks every entry for `(src, dst)` as expired.
    pub fn clear(&mut self, src: u8, dst: u8) {
        for slot in self.entries.iter_mut() {
            if matches!(slot, Some(e) if e.src == src && e.dst == dst) {
                *slot = None;
            }
        }
    }

    /// Decrements every live entry's TTL by one second; entries that reach
    /// zero are dropped.
    pub fn tick(&mut self) {
        for slot in self.entries.iter_mut() {
            if let Some(entry) = slot {
                entry.ttl -= 1;
                if entry.ttl == 0 {
                    *slot = None;
                }
            }
        }
    }

    /// Number of live entries for `(src, dst)`, used to bound how many
    /// outstanding nonces the receiver lets a peer accumulate.
    pub fn count(&self, src: u8, dst: u8) -> usize {
        self.entries
            .iter()
            .flatten()
            .filter(|e| e.src == src && e.dst == dst)
            .count()
    }

    pub fn has_three(&self, src: u8, dst: u8) -> bool {
        self.count(src, dst) >= 3
    }
}

/// Replay defense: once a nonce has been used to successfully decrypt a
/// frame, seeing it again from the same pair is a replay (spec §4.D/§4.E
/// step 5).
#[derive(Default)]
pub struct NonceBlacklist {
    entries: VecDeque<(u8, u8, [u8; 8])>,
}

impl NonceBlacklist {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(BLACKLIST_CAPACITY),
        }
    }

    pub fn is_blacklisted(&self, src: u8, dst: u8, nonce: [u8; 8]) -> bool {
        self.entries.contains(&(src, dst, nonce))
    }

    /// FIFO eviction at capacity 10 (spec §4.D).
    pub fn add(&mut self, src: u8, dst: u8, nonce: [u8; 8]) {
        if self.entries.len() == BLACKLIST_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back((src, dst, nonce));
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn register_then_get_round_trips() {
        let mut store = NonceStore::new();
        assert!(store.register(7, 1, true, [0xaa; 8]));
        assert_eq!(store.get(7, 1, Some(0xaa)), Some([0xaa; 8]));
        assert_eq!(store.get(7, 1, None), Some([0xaa; 8]));
        assert_eq!(store.get(7, 2, None), None);
    }

    #[test]
    fn reply_nonce_overwrites_instead_of_allocating() {
        let mut store = NonceStore::new();
        assert!(store.register(7, 1, true, [0x01; 8]));
        assert!(store.register(7, 1, true, [0x02; 8]));
        assert_eq!(store.count(7, 1), 1);
        assert_eq!(store.get(7, 1, None), Some([0x02; 8]));
    }

    #[test]
    fn table_rejects_registration_once_full() {
        let mut store = NonceStore::new();
        for i in 0..NONCE_CAPACITY as u8 {
            assert!(store.register(i, 0, false, [i; 8]));
        }
        assert!(!store.register(255, 0, false, [0xff; 8]));
    }

    #[test]
    fn ttl_expires_entries_after_ten_ticks() {
        let mut store = NonceStore::new();
        store.register(7, 1, false, [0x01; 8]);
        for _ in 0..(NONCE_TTL_SECONDS - 1) {
            store.tick();
            assert_eq!(store.get(7, 1, None), Some([0x01; 8]));
        }
        store.tick();
        assert_eq!(store.get(7, 1, None), None);
    }

    #[test]
    fn clear_expires_only_the_matching_pair() {
        let mut store = NonceStore::new();
        store.register(7, 1, false, [0x01; 8]);
        store.register(7, 2, false, [0x02; 8]);
        store.clear(7, 1);
        assert_eq!(store.get(7, 1, None), None);
        assert_eq!(store.get(7, 2, None), Some([0x02; 8]));
    }

    #[test]
    fn blacklist_evicts_oldest_after_capacity() {
        let mut blacklist = NonceBlacklist::new();
        blacklist.add(1, 2, [0x00; 8]);
        assert!(blacklist.is_blacklisted(1, 2, [0x00; 8]));
        for i in 1..=BLACKLIST_CAPACITY as u8 {
            blacklist.add(1, 2, [i; 8]);
        }
        assert!(!blacklist.is_blacklisted(1, 2, [0x00; 8]));
    }
}
