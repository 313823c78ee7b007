// ============================================================================
// prop-cells - Scheduler Configuration
// ============================================================================

/// Default upper bound on drain rounds in a single flush.
pub const DEFAULT_MAX_FLUSH_DEPTH: usize = 1000;

/// When a [`Sequencer`](crate::Sequencer) drains its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Drain as soon as the outermost batch ends. Every mutation runs inside
    /// a batch, so callers always observe a settled graph.
    #[default]
    Automatic,

    /// Drain only on an explicit [`Sequencer::flush`](crate::Sequencer::flush).
    Manual,
}

/// Configuration for a [`Sequencer`](crate::Sequencer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencerConfig {
    pub mode: FlushMode,

    /// A flush needing more drain rounds than this is treated as a runaway
    /// listener loop and panics. A round runs everything queued when it
    /// starts; tasks enqueued by those tasks form the next round. The number
    /// of tasks in one round is unbounded.
    pub max_flush_depth: usize,
}

impl SequencerConfig {
    /// Configuration for a manually flushed sequencer.
    pub fn manual() -> Self {
        Self {
            mode: FlushMode::Manual,
            ..Self::default()
        }
    }

    pub fn with_max_flush_depth(mut self, max: usize) -> Self {
        self.max_flush_depth = max;
        self
    }
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            mode: FlushMode::Automatic,
            max_flush_depth: DEFAULT_MAX_FLUSH_DEPTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_automatic() {
        let config = SequencerConfig::default();
        assert_eq!(config.mode, FlushMode::Automatic);
        assert_eq!(config.max_flush_depth, DEFAULT_MAX_FLUSH_DEPTH);
    }

    #[test]
    fn manual_keeps_default_limit() {
        let config = SequencerConfig::manual().with_max_flush_depth(5);
        assert_eq!(config.mode, FlushMode::Manual);
        assert_eq!(config.max_flush_depth, 5);
    }
}
