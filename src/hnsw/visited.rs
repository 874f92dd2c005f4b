//! Visited-set pool for layer searches.
//!
//! Internal ids are dense (assigned monotonically from 0), so visited state
//! is an epoch array indexed by id: marking is one write, testing is one
//! read, and clearing advances the epoch instead of zeroing memory. A small
//! thread-local pool recycles the arrays across queries.

use std::cell::RefCell;

thread_local! {
    static VISITED_POOL: RefCell<Vec<EpochVisited>> = RefCell::new(Vec::with_capacity(4));
}

const MIN_CAPACITY: usize = 1024;
const POOL_LIMIT: usize = 4;

struct EpochVisited {
    epochs: Vec<u32>,
    current_epoch: u32,
}

impl EpochVisited {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            epochs: vec![0; capacity.max(MIN_CAPACITY)],
            current_epoch: 1,
        }
    }

    #[inline(always)]
    fn len(&self) -> usize {
        self.epochs.len()
    }

    #[inline(always)]
    fn grow_for(&mut self, idx: usize) {
        if idx < self.epochs.len() {
            return;
        }
        let required = idx.saturating_add(1);
        let new_len = required
            .checked_next_power_of_two()
            .unwrap_or(required)
            .max(MIN_CAPACITY);
        self.epochs.resize(new_len, 0);
    }

    #[inline(always)]
    fn is_visited(&self, idx: usize) -> bool {
        idx < self.epochs.len() && self.epochs[idx] == self.current_epoch
    }

    #[inline(always)]
    fn visit(&mut self, idx: usize) {
        self.grow_for(idx);
        self.epochs[idx] = self.current_epoch;
    }

    fn clear(&mut self) {
        self.current_epoch = self.current_epoch.wrapping_add(1);
        if self.current_epoch == 0 {
            // Epoch counter wrapped; reset the array once and restart.
            self.epochs.fill(0);
            self.current_epoch = 1;
        }
    }
}

/// RAII handle to a pooled visited set. Returns the set to the thread-local
/// pool on drop.
pub struct VisitedGuard {
    set: Option<EpochVisited>,
}

impl VisitedGuard {
    /// Borrow a cleared visited set sized for at least `capacity` ids.
    pub fn new(capacity: usize) -> Self {
        let set = VISITED_POOL.with(|pool| {
            let mut pool = pool.borrow_mut();
            let mut set = match pool.iter().position(|s| s.len() >= capacity) {
                Some(idx) => pool.swap_remove(idx),
                None => EpochVisited::with_capacity(capacity),
            };
            set.clear();
            set
        });
        Self { set: Some(set) }
    }

    /// Whether `id` was marked during this borrow.
    #[inline(always)]
    pub fn is_visited(&self, id: i64) -> bool {
        self.set
            .as_ref()
            .map(|s| s.is_visited(id as usize))
            .unwrap_or(false)
    }

    /// Mark `id` as visited.
    #[inline(always)]
    pub fn visit(&mut self, id: i64) {
        if let Some(set) = self.set.as_mut() {
            set.visit(id as usize);
        }
    }
}

impl Drop for VisitedGuard {
    fn drop(&mut self) {
        if let Some(set) = self.set.take() {
            VISITED_POOL.with(|pool| {
                let mut pool = pool.borrow_mut();
                if pool.len() < POOL_LIMIT {
                    pool.push(set);
                }
            });
        }
    }
}
