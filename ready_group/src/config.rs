// Copyright © 2026 The Ready Group Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::participants::Participants;
use crate::ReadyGroup;

/// Number of actions which may be queued before producers are throttled.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_NAME: &str = "ready-group";

/// Invoked with the group on update, completion or timeout.
pub type Callback = Arc<dyn Fn(&ReadyGroup) + Send + Sync>;

/// Decides whether the group is complete. It runs while the participant lock
/// is held for reading, so it must not block nor call back into the group.
pub type Validator = Arc<dyn Fn(&Participants) -> bool + Send + Sync>;

/// What `ready()` and `discard()` do when the action queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Backpressure {
    /// Block the caller until the worker frees a slot.
    #[default]
    Block,
    /// Return `Error::QueueFull` immediately.
    FailFast,
}

/// Configuration of a [`ReadyGroup`].
///
/// Every handler is optional, a missing handler behaves as a no-op and a
/// missing validator requires every registered participant to be ready.
#[derive(Clone)]
pub struct ReadyGroupConfig {
    pub(crate) name: String,
    pub(crate) timeout: Duration,
    pub(crate) queue_capacity: usize,
    pub(crate) backpressure: Backpressure,
    pub(crate) validator: Option<Validator>,
    pub(crate) on_timeout: Option<Callback>,
    pub(crate) on_updated: Option<Callback>,
    pub(crate) on_completed: Option<Callback>,
}

impl Default for ReadyGroupConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            timeout: Duration::ZERO,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            backpressure: Backpressure::default(),
            validator: None,
            on_timeout: None,
            on_updated: None,
            on_completed: None,
        }
    }
}

impl ReadyGroupConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix used for thread names and log lines.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Deadline armed on every `start()`. `Duration::ZERO` disables it.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn on_timeout<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ReadyGroup) + Send + Sync + 'static,
    {
        self.on_timeout = Some(Arc::new(callback));
        self
    }

    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Participants) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn on_updated<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ReadyGroup) + Send + Sync + 'static,
    {
        self.on_updated = Some(Arc::new(callback));
        self
    }

    pub fn on_completed<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ReadyGroup) + Send + Sync + 'static,
    {
        self.on_completed = Some(Arc::new(callback));
        self
    }

    /// Bound of the action queue, at least one slot is always kept.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn backpressure(mut self, backpressure: Backpressure) -> Self {
        self.backpressure = backpressure;
        self
    }

    /// Evaluate the configured validator, or the default "everybody is
    /// ready" rule.
    pub(crate) fn validate(&self, participants: &Participants) -> bool {
        match &self.validator {
            Some(validator) => validator(participants),
            None => participants.all_ready(),
        }
    }
}

impl fmt::Debug for ReadyGroupConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ReadyGroupConfig")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("queue_capacity", &self.queue_capacity)
            .field("backpressure", &self.backpressure)
            .field("validator", &self.validator.is_some())
            .field("on_timeout", &self.on_timeout.is_some())
            .field("on_updated", &self.on_updated.is_some())
            .field("on_completed", &self.on_completed.is_some())
            .finish()
    }
}
