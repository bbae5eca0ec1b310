use std::sync::atomic::{AtomicU8, Ordering};

/// Pool lifecycle states.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PoolState {
    /// No workers, no configuration. The initial and final state.
    Stopped,
    /// `start` is validating options and spawning the initial workers.
    Starting,
    /// Accepting submissions.
    Started,
    /// `stop` is draining workers and discarding leftover work.
    Stopping,
}

impl PoolState {
    fn from_u8(value: u8) -> PoolState {
        match value {
            0 => PoolState::Stopped,
            1 => PoolState::Starting,
            2 => PoolState::Started,
            3 => PoolState::Stopping,
            _ => unreachable!("corrupt pool state"),
        }
    }
}

/// Atomic cell holding the lifecycle state.
///
/// All transitions between states go through `transition` so that exactly one
/// of start/stop can win a lifecycle race; the post-warmup and post-drain
/// assignments use `store` because the winner already owns the transition.
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> StateCell {
        StateCell(AtomicU8::new(PoolState::Stopped as u8))
    }

    pub fn load(&self) -> PoolState {
        PoolState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn store(&self, state: PoolState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Compare-and-swap; true iff the state was `current` and is now `new`.
    pub fn transition(&self, current: PoolState, new: PoolState) -> bool {
        self.0
            .compare_exchange(
                current as u8,
                new as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }
}
