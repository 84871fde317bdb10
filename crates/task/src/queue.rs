//! Randomised work queue

use rand::seq::SliceRandom;
use rand::Rng;
use stackscore_core::RefId;

/// Pending references, taken from the back.
///
/// Shuffling on construction means no reference is starved across runs
/// when the global deadline cuts a run short.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkQueue {
    items: Vec<RefId>,
}

impl WorkQueue {
    /// Queue that pops `items` from last to first.
    pub fn new(items: Vec<RefId>) -> Self {
        Self { items }
    }

    /// Uniformly shuffled queue.
    pub fn shuffled<R: Rng + ?Sized>(mut items: Vec<RefId>, rng: &mut R) -> Self {
        items.shuffle(rng);
        Self { items }
    }

    pub fn pop(&mut self) -> Option<RefId> {
        self.items.pop()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl FromIterator<RefId> for WorkQueue {
    fn from_iter<I: IntoIterator<Item = RefId>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
