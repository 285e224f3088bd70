use super::zobrist::Zobrist;
use crate::CACHE_SLOTS;
use crate::board::Point;
use crate::stats::EvalMetrics;
use std::sync::OnceLock;
use std::sync::RwLock;

/// Process-wide content-addressed evaluation cache.
///
/// A fixed-size open-addressed slot array keyed by the position hash. No
/// chaining: colliding hashes overwrite each other, and a read only counts
/// as a hit when the full 64-bit hash matches, so a false hit cannot
/// happen. Guarantees each distinct position is analyzed at most once as
/// long as its slot survives.
struct Cache {
    zobrist: Zobrist,
    slots: RwLock<Vec<Slot>>,
}

#[derive(Clone, Copy, Default)]
struct Slot {
    hash: u64,
    metrics: EvalMetrics,
}

static CACHE: OnceLock<Cache> = OnceLock::new();

/// Initialize the cache and the hash keys once per process. Later calls
/// are no-ops; the board size is fixed for a batch.
pub fn init(size: usize) {
    CACHE.get_or_init(|| Cache {
        zobrist: Zobrist::new(size),
        slots: RwLock::new(vec![Slot::default(); CACHE_SLOTS]),
    });
}

pub fn hash(moves: &[Point]) -> u64 {
    match CACHE.get() {
        Some(cache) => cache.zobrist.hash(moves),
        None => 0,
    }
}

pub fn get(h: u64) -> Option<EvalMetrics> {
    let cache = CACHE.get()?;
    let slots = cache.slots.read().expect("cache lock");
    let slot = &slots[h as usize & (CACHE_SLOTS - 1)];
    (slot.hash == h).then_some(slot.metrics)
}

pub fn set(h: u64, metrics: EvalMetrics) {
    let Some(cache) = CACHE.get() else { return };
    let mut slots = cache.slots.write().expect("cache lock");
    slots[h as usize & (CACHE_SLOTS - 1)] = Slot { hash: h, metrics };
}
