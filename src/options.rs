use crate::error::Error;

/// Hard cap on the number of layers. Predecessor and successor arrays are
/// sized by it, and `top_layer` must fit in a `u8`.
pub const MAX_LAYER: usize = 64;

/// Leveling parameters of a [`SkipList`](crate::SkipList).
///
/// Fixed at construction; there is no way to change them once threads share the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    fanout: usize,
    max_layer: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

impl Options {
    pub const fn new() -> Self {
        Options {
            fanout: 4,
            max_layer: 12,
        }
    }

    /// A node reaches layer `n + 1` with probability `1 / fanout` once it reached layer `n`.
    pub const fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout;
        self
    }

    /// Number of layers, sentinels included. Generated levels fall in `0..max_layer`.
    pub const fn with_max_layer(mut self, max_layer: usize) -> Self {
        self.max_layer = max_layer;
        self
    }

    pub const fn fanout(&self) -> usize {
        self.fanout
    }

    pub const fn max_layer(&self) -> usize {
        self.max_layer
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.fanout < 2 {
            return Err(Error::InvalidOptions("fanout must be at least 2"));
        }
        if self.max_layer == 0 {
            return Err(Error::InvalidOptions("max_layer must be at least 1"));
        }
        if self.max_layer > MAX_LAYER {
            return Err(Error::InvalidOptions("max_layer exceeds MAX_LAYER"));
        }
        Ok(())
    }
}
