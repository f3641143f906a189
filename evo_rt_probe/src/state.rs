//! Shared worker state cell.
//!
//! One writer per phase: the controller resets the cell before spawning, the
//! worker advances it afterwards. The controller polls it during the
//! handshake. Stores use `Release` and loads use `Acquire`, so every state
//! the controller observes is at least as new as the worker's prior writes.

use evo_rt_common::consts::STATE_HISTORY_LEN;
use evo_rt_common::state::{TransitionError, WorkerState};
use heapless::Vec as HVec;
use static_assertions::assert_impl_all;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// Lock-free holder of the current [`WorkerState`] and its history.
#[derive(Debug)]
pub struct WorkerStateCell {
    state: AtomicU8,
    history: [AtomicU8; STATE_HISTORY_LEN],
    history_len: AtomicUsize,
}

assert_impl_all!(WorkerStateCell: Send, Sync);

impl WorkerStateCell {
    /// Cell in `Undefined`.
    pub fn new() -> Self {
        let cell = Self {
            state: AtomicU8::new(WorkerState::Undefined.as_u8()),
            history: std::array::from_fn(|_| AtomicU8::new(0)),
            history_len: AtomicUsize::new(0),
        };
        cell.push_history(WorkerState::Undefined);
        cell
    }

    /// Current state.
    #[inline]
    pub fn load(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Move forward to `next`, returning the previous state.
    ///
    /// Rejects anything [`WorkerState::can_transition_to`] does not allow;
    /// the cell is left untouched in that case.
    pub fn advance(&self, next: WorkerState) -> Result<WorkerState, TransitionError> {
        let mut current = self.load();
        loop {
            current.transition(next)?;
            match self.state.compare_exchange(
                current.as_u8(),
                next.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(raw) => current = WorkerState::from_u8(raw).unwrap_or_default(),
            }
        }
        self.push_history(next);
        Ok(current)
    }

    /// Put the cell back to `Undefined` and clear the history.
    ///
    /// Only valid while no worker thread is alive.
    pub fn reset(&self) {
        self.state
            .store(WorkerState::Undefined.as_u8(), Ordering::Release);
        self.history_len.store(0, Ordering::Release);
        self.push_history(WorkerState::Undefined);
    }

    /// Every state the cell has held since the last reset, in order.
    pub fn history(&self) -> HVec<WorkerState, STATE_HISTORY_LEN> {
        let len = self.history_len.load(Ordering::Acquire);
        self.history[..len]
            .iter()
            .filter_map(|slot| WorkerState::from_u8(slot.load(Ordering::Acquire)))
            .collect()
    }

    fn push_history(&self, state: WorkerState) {
        let idx = self.history_len.load(Ordering::Acquire);
        if let Some(slot) = self.history.get(idx) {
            slot.store(state.as_u8(), Ordering::Release);
            self.history_len.store(idx + 1, Ordering::Release);
        }
    }
}

impl Default for WorkerStateCell {
    fn default() -> Self {
        Self::new()
    }
}
