use std::cell::RefCell;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use thread_local::ThreadLocal;

/// Picks how many layers a new node participates in.
///
/// Every thread draws from its own generator, seeded from the OS on first use.
pub(crate) struct LevelGenerator {
    fanout: u32,
    max_layer: usize,
    rngs: ThreadLocal<RefCell<SmallRng>>,
}

impl LevelGenerator {
    pub(crate) fn new(fanout: usize, max_layer: usize) -> Self {
        LevelGenerator {
            fanout: u32::try_from(fanout).unwrap_or(u32::MAX),
            max_layer,
            rngs: ThreadLocal::new(),
        }
    }

    /// A layer index in `0..max_layer`: one more layer per successful
    /// `1 / fanout` coin flip, stopping at the first failure.
    pub(crate) fn top_layer(&self) -> usize {
        let rng = self.rngs.get_or(|| RefCell::new(SmallRng::from_os_rng()));
        let mut rng = rng.borrow_mut();

        let mut layer = 0;
        while layer + 1 < self.max_layer && rng.random_range(0..self.fanout) == 0 {
            layer += 1;
        }
        layer
    }
}
