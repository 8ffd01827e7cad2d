// Copyright © 2026 The Ready Group Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A reusable gate. Waiters block while the gate is closed; opening it
/// releases every waiter at once. Closing it again re-arms the gate for the
/// next run of the owning group.
///
/// Every `open()` starts a new epoch. A waiter is released as soon as the
/// epoch moves past the one it entered with, even if the gate was closed
/// again before the waiter could observe it open.
#[derive(Debug, Default)]
pub(crate) struct Gate {
    state: Mutex<GateState>,
    /// Used to notify waiting threads.
    cv: Condvar,
}

#[derive(Debug, Default)]
struct GateState {
    /// True if the gate is open, false otherwise.
    open: bool,
    /// Number of times the gate has been opened.
    epoch: u64,
}

impl GateState {
    fn released(&self, entry_epoch: u64) -> bool {
        self.open || self.epoch != entry_epoch
    }
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait at the gate. Only blocks if the gate is not opened.
    pub fn wait(&self) {
        let mut state = self.state.lock().unwrap();
        let entry_epoch = state.epoch;
        while !state.released(entry_epoch) {
            state = self.cv.wait(state).unwrap();
        }
    }

    /// Wait at most `timeout` for the gate to open. Returns whether it was
    /// opened.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let state = self.state.lock().unwrap();
        let entry_epoch = state.epoch;
        let (state, _) = self
            .cv
            .wait_timeout_while(state, timeout, |state| !state.released(entry_epoch))
            .unwrap();
        state.released(entry_epoch)
    }

    /// Open the gate, releasing all waiting threads.
    pub fn open(&self) {
        let mut state = self.state.lock().unwrap();
        state.open = true;
        state.epoch = state.epoch.wrapping_add(1);
        self.cv.notify_all();
    }

    pub fn close(&self) {
        self.state.lock().unwrap().open = false;
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }
}
