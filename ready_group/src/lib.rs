// Copyright © 2026 The Ready Group Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Coordinate a set of participants until a group-wide readiness condition
//! holds.
//!
//! Participants are registered with [`ReadyGroup::add`] and then flip their
//! readiness through [`ReadyGroup::ready`] and [`ReadyGroup::discard`]. Those
//! requests are queued and applied one at a time by a single worker thread,
//! which evaluates the validator after each of them. The first time the
//! validator passes, or [`ReadyGroup::done`] is called directly, the group
//! completes: the pending deadline is cancelled, the completion callback is
//! dispatched and waiters are released. Completion happens at most once per
//! run.

#[macro_use]
extern crate log;

mod config;
mod gate;
mod participants;
mod thread_helper;
pub mod timeout;

use std::collections::HashMap;
use std::io;
use std::panic::AssertUnwindSafe;
use std::result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread;
use std::time::Duration;

use thiserror::Error;

pub use crate::config::{
    Backpressure, Callback, ReadyGroupConfig, Validator, DEFAULT_NAME, DEFAULT_QUEUE_CAPACITY,
};
use crate::gate::Gate;
pub use crate::participants::{ParticipantId, Participants};
use crate::thread_helper::{join_thread, spawn_thread};
use crate::timeout::TimeoutTask;

/// Errors associated with a ready group.
#[derive(Debug, Error)]
pub enum Error {
    /// The group has not been started, or has been stopped.
    #[error("Ready group is not running")]
    NotRunning,

    /// The action worker went away.
    #[error("Ready group action queue is closed")]
    QueueClosed,

    /// The action queue is at capacity and backpressure is fail-fast.
    #[error("Ready group action queue is full")]
    QueueFull,

    /// Handlers can only be replaced while the group is idle.
    #[error("Cannot reconfigure a running ready group")]
    Running,

    /// Cannot create the action worker thread.
    #[error("Error spawning ready-group worker: {0}")]
    ThreadSpawn(#[source] io::Error),

    /// Cannot arm the deadline.
    #[error("Error arming ready-group timeout: {0}")]
    Timeout(#[source] timeout::Error),
}

pub type Result<T> = result::Result<T, Error>;

/// Lifecycle of a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Constructed or stopped, no worker.
    Idle,
    /// Started and not completed yet.
    Running,
    /// Completed during the current run. Late actions are still applied.
    Completed,
}

#[derive(Clone, Copy, Debug)]
struct Action {
    participant: ParticipantId,
    ready: bool,
}

/// A callback waiting for the dispatcher thread.
type Dispatch = (&'static str, Callback);

struct Run {
    action_tx: flume::Sender<Action>,
    backpressure: Backpressure,
    worker: Option<thread::JoinHandle<()>>,
    timeout: Option<TimeoutTask>,
}

impl Run {
    fn shutdown(mut self) {
        if let Some(timeout) = self.timeout.take() {
            timeout.detach();
        }

        // The worker drains what was queued, then sees the channel closed.
        drop(self.action_tx);
        if let Some(worker) = self.worker.take() {
            join_thread(worker);
        }
    }
}

struct ReadyGroupInner {
    name: String,
    participants: RwLock<Participants>,
    completed: AtomicBool,
    config: Mutex<ReadyGroupConfig>,
    run: Mutex<Option<Run>>,
    // Serializes start() and stop().
    lifecycle: Mutex<()>,
    gate: Gate,
    // Feeds the callback dispatcher of the latest run.
    callbacks: Mutex<Option<flume::Sender<Dispatch>>>,
}

impl Drop for ReadyGroupInner {
    fn drop(&mut self) {
        if let Some(run) = self.run.get_mut().unwrap().take() {
            run.shutdown();
        }
    }
}

/// Handle to a ready group. Clones share the same group.
#[derive(Clone)]
pub struct ReadyGroup {
    inner: Arc<ReadyGroupInner>,
}

impl Default for ReadyGroup {
    fn default() -> Self {
        Self::new(ReadyGroupConfig::default())
    }
}

impl ReadyGroup {
    pub fn new(config: ReadyGroupConfig) -> Self {
        Self {
            inner: Arc::new(ReadyGroupInner {
                name: config.name.clone(),
                participants: RwLock::new(Participants::new()),
                completed: AtomicBool::new(false),
                config: Mutex::new(config),
                run: Mutex::new(None),
                lifecycle: Mutex::new(()),
                gate: Gate::new(),
                callbacks: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Register `id` with the given readiness, overwriting any previous
    /// state. This bypasses the action queue.
    pub fn add(&self, id: ParticipantId, ready: bool) {
        self.inner.participants.write().unwrap().insert(id, ready);
    }

    /// Forget every participant.
    pub fn reset_participants(&self) {
        self.inner.participants.write().unwrap().clear();
    }

    /// Independent copy of the current participant states.
    pub fn participant_states(&self) -> HashMap<ParticipantId, bool> {
        self.inner.participants.read().unwrap().to_map()
    }

    pub fn participant_count(&self) -> usize {
        self.inner.participants.read().unwrap().len()
    }

    pub fn is_ready(&self, id: ParticipantId) -> Option<bool> {
        self.inner.participants.read().unwrap().is_ready(id)
    }

    pub fn timeout(&self) -> Duration {
        self.inner.config.lock().unwrap().timeout
    }

    fn reconfigure<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut ReadyGroupConfig),
    {
        let run = self.inner.run.lock().unwrap();
        if run.is_some() {
            return Err(Error::Running);
        }

        f(&mut *self.inner.config.lock().unwrap());
        Ok(())
    }

    /// Change the deadline used by the next `start()`.
    pub fn set_timeout(&self, timeout: Duration) -> Result<()> {
        self.reconfigure(|config| config.timeout = timeout)
    }

    pub fn set_validator<F>(&self, validator: F) -> Result<()>
    where
        F: Fn(&Participants) -> bool + Send + Sync + 'static,
    {
        self.reconfigure(|config| config.validator = Some(Arc::new(validator)))
    }

    pub fn set_on_timeout<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&ReadyGroup) + Send + Sync + 'static,
    {
        self.reconfigure(|config| config.on_timeout = Some(Arc::new(callback)))
    }

    pub fn set_on_updated<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&ReadyGroup) + Send + Sync + 'static,
    {
        self.reconfigure(|config| config.on_updated = Some(Arc::new(callback)))
    }

    pub fn set_on_completed<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&ReadyGroup) + Send + Sync + 'static,
    {
        self.reconfigure(|config| config.on_completed = Some(Arc::new(callback)))
    }

    /// Start a new run, stopping the current one first if any.
    ///
    /// The completion flag is cleared, a fresh action queue and worker are
    /// created and the deadline is armed if one is configured.
    pub fn start(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().unwrap();
        self.shutdown();

        // Callbacks still queued for the previous run are delivered by the
        // previous dispatcher, which exits once drained.
        let dispatcher = spawn_dispatcher(&self.inner).map_err(Error::ThreadSpawn)?;
        *self.inner.callbacks.lock().unwrap() = Some(dispatcher);

        let config = self.inner.config.lock().unwrap().clone();
        self.inner.completed.store(false, Ordering::SeqCst);
        self.inner.gate.close();

        let (action_tx, action_rx) = flume::bounded(config.queue_capacity);
        let worker = {
            let group = Arc::downgrade(&self.inner);
            let config = config.clone();
            match spawn_thread(&format!("{}-worker", self.inner.name), move || {
                run_worker(group, config, action_rx)
            }) {
                Ok(worker) => worker,
                Err(e) => {
                    self.inner.gate.open();
                    return Err(Error::ThreadSpawn(e));
                }
            }
        };

        *self.inner.run.lock().unwrap() = Some(Run {
            action_tx,
            backpressure: config.backpressure,
            worker: Some(worker),
            timeout: None,
        });

        if !config.timeout.is_zero() {
            let timeout = match self.arm_timeout(&config) {
                Ok(timeout) => timeout,
                Err(e) => {
                    let run = self.inner.run.lock().unwrap().take();
                    if let Some(run) = run {
                        run.shutdown();
                    }
                    self.inner.gate.open();
                    return Err(e);
                }
            };

            let mut run = self.inner.run.lock().unwrap();
            // done() may have run before the task could be published.
            if self.inner.completed.load(Ordering::SeqCst) {
                timeout.cancel();
            }
            match run.as_mut() {
                Some(run) => run.timeout = Some(timeout),
                None => timeout.detach(),
            }
        }

        info!(
            "{}: started with {} participants, timeout {:?}",
            self.inner.name,
            self.participant_count(),
            config.timeout
        );

        Ok(())
    }

    fn arm_timeout(&self, config: &ReadyGroupConfig) -> Result<TimeoutTask> {
        let group = Arc::downgrade(&self.inner);
        let on_timeout = config.on_timeout.clone();
        let duration = config.timeout;

        TimeoutTask::schedule(
            &format!("{}-timeout", self.inner.name),
            duration,
            move || {
                let Some(inner) = group.upgrade() else {
                    return;
                };
                let group = ReadyGroup { inner };

                if group.is_completed() {
                    debug!("{}: deadline reached after completion", group.name());
                    return;
                }

                info!("{}: deadline of {:?} expired", group.name(), duration);
                if let Some(on_timeout) = on_timeout {
                    group.invoke("timeout", &on_timeout);
                }
            },
        )
        .map_err(Error::Timeout)
    }

    /// Stop the current run: close the action queue, let the worker drain it,
    /// cancel the deadline, clear the completion flag and release waiters.
    /// Stopping an idle group only clears the completion flag.
    pub fn stop(&self) {
        let _lifecycle = self.inner.lifecycle.lock().unwrap();
        self.shutdown();
    }

    fn shutdown(&self) {
        let run = self.inner.run.lock().unwrap().take();
        let stopped = run.is_some();
        if let Some(run) = run {
            run.shutdown();
        }

        self.inner.completed.store(false, Ordering::SeqCst);

        // Waiters registered before the first start() keep waiting.
        if stopped {
            self.inner.gate.open();
            info!("{}: stopped", self.inner.name);
        }
    }

    /// Queue an action marking `id` as ready.
    pub fn ready(&self, id: ParticipantId) -> Result<()> {
        self.submit(Action {
            participant: id,
            ready: true,
        })
    }

    /// Queue an action marking `id` as not ready.
    pub fn discard(&self, id: ParticipantId) -> Result<()> {
        self.submit(Action {
            participant: id,
            ready: false,
        })
    }

    fn submit(&self, action: Action) -> Result<()> {
        // Never block on the queue while holding the run lock.
        let (action_tx, backpressure) = {
            let run = self.inner.run.lock().unwrap();
            let run = run.as_ref().ok_or(Error::NotRunning)?;
            (run.action_tx.clone(), run.backpressure)
        };

        match backpressure {
            Backpressure::Block => action_tx.send(action).map_err(|_| Error::QueueClosed),
            Backpressure::FailFast => action_tx.try_send(action).map_err(|e| match e {
                flume::TrySendError::Full(_) => Error::QueueFull,
                flume::TrySendError::Disconnected(_) => Error::QueueClosed,
            }),
        }
    }

    /// Mark the group as completed. Only the first call of a run has any
    /// effect: it cancels the deadline, dispatches the completion callback
    /// and releases waiters. Returns whether this call completed the group.
    pub fn done(&self) -> bool {
        if self
            .inner
            .completed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        if let Some(run) = self.inner.run.lock().unwrap().as_ref() {
            if let Some(timeout) = run.timeout.as_ref() {
                timeout.cancel();
            }
        }

        info!("{}: completed", self.inner.name);

        let on_completed = self.inner.config.lock().unwrap().on_completed.clone();
        if let Some(on_completed) = on_completed {
            self.dispatch("completed", on_completed);
        }

        self.inner.gate.open();

        true
    }

    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.inner.run.lock().unwrap().is_some()
    }

    pub fn state(&self) -> State {
        if !self.is_running() {
            State::Idle
        } else if self.is_completed() {
            State::Completed
        } else {
            State::Running
        }
    }

    /// Block until the group completes or is stopped.
    pub fn wait(&self) {
        self.inner.gate.wait()
    }

    /// Like `wait()`, giving up after `timeout`. Returns whether the group
    /// completed or was stopped in time.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.inner.gate.wait_timeout(timeout)
    }

    fn apply(&self, config: &ReadyGroupConfig, action: Action) {
        let applied = self
            .inner
            .participants
            .write()
            .unwrap()
            .update(action.participant, action.ready);

        if applied {
            debug!(
                "{}: participant {} ready={}",
                self.inner.name, action.participant, action.ready
            );
        } else {
            debug!(
                "{}: ignoring action for unknown participant {}",
                self.inner.name, action.participant
            );
        }

        let passed = {
            let participants = self.inner.participants.read().unwrap();
            std::panic::catch_unwind(AssertUnwindSafe(|| config.validate(&participants)))
        };
        let passed = passed.unwrap_or_else(|_| {
            error!(
                "{}: validator panicked after action for participant {}",
                self.inner.name, action.participant
            );
            false
        });
        if passed {
            self.done();
        }

        if let Some(on_updated) = config.on_updated.as_ref() {
            self.dispatch("updated", on_updated.clone());
        }
    }

    /// Hand `callback` to the dispatcher thread so the caller never waits on
    /// it. Callbacks are invoked one at a time, in dispatch order.
    fn dispatch(&self, what: &'static str, callback: Callback) {
        let mut callbacks = self.inner.callbacks.lock().unwrap();
        if callbacks.is_none() {
            // Nothing started yet, done() was called on an idle group.
            match spawn_dispatcher(&self.inner) {
                Ok(dispatcher) => *callbacks = Some(dispatcher),
                Err(e) => {
                    error!(
                        "{}: dropping {} callback, no dispatcher: {}",
                        self.inner.name, what, e
                    );
                    return;
                }
            }
        }

        if let Some(dispatcher) = callbacks.as_ref() {
            if dispatcher.send((what, callback)).is_err() {
                error!(
                    "{}: dropping {} callback, dispatcher is gone",
                    self.inner.name, what
                );
                *callbacks = None;
            }
        }
    }

    fn invoke(&self, what: &str, callback: &Callback) {
        if std::panic::catch_unwind(AssertUnwindSafe(|| callback(self))).is_err() {
            error!("{}: {} callback panicked", self.inner.name, what);
        }
    }
}

fn run_worker(
    group: Weak<ReadyGroupInner>,
    config: ReadyGroupConfig,
    action_rx: flume::Receiver<Action>,
) {
    for action in action_rx.iter() {
        let Some(inner) = group.upgrade() else {
            break;
        };
        let group = ReadyGroup { inner };

        // A failing action must not take the following ones down with it.
        if std::panic::catch_unwind(AssertUnwindSafe(|| group.apply(&config, action))).is_err() {
            error!(
                "{}: panic while applying action for participant {}",
                config.name, action.participant
            );
        }
    }

    debug!("{}: action queue closed, worker exiting", config.name);
}

/// Spawn a detached thread invoking queued callbacks. It exits once every
/// sender is gone and the queue is drained.
fn spawn_dispatcher(inner: &Arc<ReadyGroupInner>) -> io::Result<flume::Sender<Dispatch>> {
    let (dispatch_tx, dispatch_rx) = flume::unbounded();
    let group = Arc::downgrade(inner);
    let name = inner.name.clone();

    let _detached = spawn_thread(&format!("{}-callbacks", inner.name), move || {
        run_dispatcher(group, name, dispatch_rx)
    })?;

    Ok(dispatch_tx)
}

fn run_dispatcher(
    group: Weak<ReadyGroupInner>,
    name: String,
    dispatch_rx: flume::Receiver<Dispatch>,
) {
    for (what, callback) in dispatch_rx.iter() {
        let Some(inner) = group.upgrade() else {
            debug!("{}: group dropped, skipping {} callback", name, what);
            continue;
        };
        ReadyGroup { inner }.invoke(what, &callback);
    }

    debug!("{}: callback queue closed, dispatcher exiting", name);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use super::*;

    const PARTICIPANTS: u64 = 10;
    const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);
    const QUIET_PERIOD: Duration = Duration::from_millis(300);

    fn new_group(config: ReadyGroupConfig) -> ReadyGroup {
        let group = ReadyGroup::new(config);
        for id in 0..PARTICIPANTS {
            group.add(id, false);
        }
        group
    }

    #[test]
    fn test_ready_group_completes_once() {
        let (completed_tx, completed_rx) = flume::unbounded();
        let (updated_tx, updated_rx) = flume::unbounded();
        let group = new_group(
            ReadyGroupConfig::new()
                .on_completed(move |_| completed_tx.send(()).unwrap())
                .on_updated(move |_| updated_tx.send(()).unwrap()),
        );
        group.start().unwrap();
        assert_eq!(group.state(), State::Running);

        for id in 0..PARTICIPANTS - 1 {
            group.ready(id).unwrap();
        }
        for _ in 0..PARTICIPANTS - 1 {
            updated_rx.recv_timeout(CALLBACK_TIMEOUT).unwrap();
        }
        // Nine out of ten is not enough
        assert!(!group.is_completed());
        assert!(completed_rx.try_recv().is_err());

        group.ready(PARTICIPANTS - 1).unwrap();
        completed_rx.recv_timeout(CALLBACK_TIMEOUT).unwrap();
        assert!(group.wait_timeout(CALLBACK_TIMEOUT));
        assert_eq!(group.state(), State::Completed);

        // Late actions are applied but never complete the group again
        group.discard(3).unwrap();
        group.ready(3).unwrap();
        for _ in 0..3 {
            updated_rx.recv_timeout(CALLBACK_TIMEOUT).unwrap();
        }
        assert!(completed_rx.recv_timeout(QUIET_PERIOD).is_err());

        group.stop();
    }

    #[test]
    fn test_ready_group_update_callback_per_action() {
        let updates = Arc::new(AtomicUsize::new(0));
        let (updated_tx, updated_rx) = flume::unbounded();
        let group = {
            let updates = updates.clone();
            new_group(ReadyGroupConfig::new().on_updated(move |_| {
                updates.fetch_add(1, Ordering::SeqCst);
                updated_tx.send(()).unwrap();
            }))
        };
        group.start().unwrap();

        let producer = {
            let group = group.clone();
            thread::spawn(move || {
                for id in 0..PARTICIPANTS {
                    group.ready(id).unwrap();
                }
            })
        };
        producer.join().unwrap();

        for _ in 0..PARTICIPANTS {
            updated_rx.recv_timeout(CALLBACK_TIMEOUT).unwrap();
        }
        assert_eq!(updates.load(Ordering::SeqCst), PARTICIPANTS as usize);

        group.stop();
    }

    #[test]
    fn test_ready_group_unknown_participant_ignored() {
        let (updated_tx, updated_rx) = flume::unbounded();
        let group = new_group(ReadyGroupConfig::new().on_updated(move |_| {
            updated_tx.send(()).unwrap();
        }));
        group.start().unwrap();

        group.ready(42).unwrap();
        // The update callback fires even when nothing was applied
        updated_rx.recv_timeout(CALLBACK_TIMEOUT).unwrap();
        assert_eq!(group.is_ready(42), None);
        assert_eq!(group.participant_count(), PARTICIPANTS as usize);

        group.stop();
    }

    #[test]
    fn test_ready_group_timeout_forces_completion() {
        let timeouts = Arc::new(AtomicUsize::new(0));
        let (completed_tx, completed_rx) = flume::unbounded();
        let start = Instant::now();
        let group = {
            let timeouts = timeouts.clone();
            new_group(
                ReadyGroupConfig::new()
                    .timeout(Duration::from_millis(200))
                    .on_timeout(move |group| {
                        timeouts.fetch_add(1, Ordering::SeqCst);
                        for id in group.participant_states().keys() {
                            group.ready(*id).unwrap();
                        }
                    })
                    .on_completed(move |_| completed_tx.send(Instant::now()).unwrap()),
            )
        };
        group.start().unwrap();

        let completed_at = completed_rx.recv_timeout(CALLBACK_TIMEOUT).unwrap();
        assert!(completed_at.duration_since(start) >= Duration::from_millis(200));
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
        assert!(group.participant_states().values().all(|ready| *ready));

        assert!(completed_rx.recv_timeout(QUIET_PERIOD).is_err());
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);

        group.stop();
    }

    #[test]
    fn test_ready_group_timeout_only_notifies() {
        let (timeout_tx, timeout_rx) = flume::unbounded();
        let (completed_tx, completed_rx) = flume::unbounded::<()>();
        let group = new_group(
            ReadyGroupConfig::new()
                .timeout(Duration::from_millis(100))
                .on_timeout(move |_| timeout_tx.send(()).unwrap())
                .on_completed(move |_| completed_tx.send(()).unwrap()),
        );
        group.start().unwrap();

        timeout_rx.recv_timeout(CALLBACK_TIMEOUT).unwrap();
        assert!(!group.wait_timeout(QUIET_PERIOD));
        assert!(completed_rx.try_recv().is_err());
        assert_eq!(group.state(), State::Running);

        // The run can still complete through regular actions
        for id in 0..PARTICIPANTS {
            group.ready(id).unwrap();
        }
        completed_rx.recv_timeout(CALLBACK_TIMEOUT).unwrap();
        assert!(timeout_rx.recv_timeout(QUIET_PERIOD).is_err());

        group.stop();
    }

    #[test]
    fn test_ready_group_completion_cancels_timeout() {
        let (timeout_tx, timeout_rx) = flume::unbounded::<()>();
        let (completed_tx, completed_rx) = flume::unbounded();
        let group = new_group(
            ReadyGroupConfig::new()
                .timeout(Duration::from_millis(200))
                .on_timeout(move |_| timeout_tx.send(()).unwrap())
                .on_completed(move |_| completed_tx.send(()).unwrap()),
        );
        group.start().unwrap();

        for id in 0..PARTICIPANTS {
            group.ready(id).unwrap();
        }
        completed_rx.recv_timeout(CALLBACK_TIMEOUT).unwrap();

        thread::sleep(Duration::from_millis(400));
        assert!(timeout_rx.try_recv().is_err());

        group.stop();
    }

    #[test]
    fn test_ready_group_restart() {
        let completions = Arc::new(AtomicUsize::new(0));
        let (completed_tx, completed_rx) = flume::unbounded();
        let group = {
            let completions = completions.clone();
            new_group(ReadyGroupConfig::new().on_completed(move |_| {
                completions.fetch_add(1, Ordering::SeqCst);
                completed_tx.send(()).unwrap();
            }))
        };

        group.start().unwrap();
        for id in 0..PARTICIPANTS {
            group.ready(id).unwrap();
        }
        completed_rx.recv_timeout(CALLBACK_TIMEOUT).unwrap();
        assert!(group.is_completed());

        group.stop();
        assert!(!group.is_completed());
        assert_eq!(group.state(), State::Idle);

        group.start().unwrap();
        group.discard(0).unwrap();
        group.ready(0).unwrap();
        completed_rx.recv_timeout(CALLBACK_TIMEOUT).unwrap();
        assert_eq!(completions.load(Ordering::SeqCst), 2);

        // Starting a running group restarts it
        group.start().unwrap();
        assert_eq!(group.state(), State::Running);
        group.ready(0).unwrap();
        completed_rx.recv_timeout(CALLBACK_TIMEOUT).unwrap();
        assert_eq!(completions.load(Ordering::SeqCst), 3);

        group.stop();
        group.stop();
    }

    #[test]
    fn test_ready_group_reset_participants() {
        let group = new_group(ReadyGroupConfig::new());
        assert_eq!(group.participant_count(), PARTICIPANTS as usize);

        for id in 0..PARTICIPANTS {
            group.add(id, true);
        }
        assert_eq!(group.participant_count(), PARTICIPANTS as usize);

        group.reset_participants();
        assert_eq!(group.participant_count(), 0);
        group.add(1, false);
        assert_eq!(group.is_ready(1), Some(false));
    }

    #[test]
    fn test_ready_group_not_running() {
        let group = new_group(ReadyGroupConfig::new());
        assert!(matches!(group.ready(0), Err(Error::NotRunning)));

        group.start().unwrap();
        group.ready(0).unwrap();

        group.stop();
        assert!(matches!(group.discard(0), Err(Error::NotRunning)));
    }

    #[test]
    fn test_ready_group_done_idempotent() {
        let completions = Arc::new(AtomicUsize::new(0));
        let group = {
            let completions = completions.clone();
            new_group(ReadyGroupConfig::new().on_completed(move |_| {
                completions.fetch_add(1, Ordering::SeqCst);
            }))
        };
        group.start().unwrap();

        let racers: Vec<_> = (0..8)
            .map(|_| {
                let group = group.clone();
                thread::spawn(move || group.done())
            })
            .collect();
        let winners = racers
            .into_iter()
            .map(|racer| racer.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);

        group.wait();
        thread::sleep(QUIET_PERIOD);
        assert_eq!(completions.load(Ordering::SeqCst), 1);

        group.stop();
    }

    #[test]
    fn test_ready_group_custom_validator() {
        let (completed_tx, completed_rx) = flume::unbounded();
        let group = new_group(
            ReadyGroupConfig::new()
                .validator(|participants| participants.ready_count() >= 3)
                .on_completed(move |group| {
                    completed_tx.send(group.participant_states()).unwrap()
                }),
        );
        group.start().unwrap();

        for id in 0..3 {
            group.ready(id).unwrap();
        }
        let states = completed_rx.recv_timeout(CALLBACK_TIMEOUT).unwrap();
        assert!(states.values().filter(|ready| **ready).count() >= 3);

        group.stop();
    }

    #[test]
    fn test_ready_group_setters_rejected_while_running() {
        let group = new_group(ReadyGroupConfig::new());
        group.set_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(group.timeout(), Duration::from_secs(1));
        group.set_timeout(Duration::ZERO).unwrap();

        group.start().unwrap();
        assert!(matches!(
            group.set_timeout(Duration::from_secs(2)),
            Err(Error::Running)
        ));
        assert!(matches!(group.set_validator(|_| true), Err(Error::Running)));
        assert!(matches!(group.set_on_completed(|_| ()), Err(Error::Running)));

        group.stop();
        group.set_validator(|_| true).unwrap();
        assert_eq!(group.timeout(), Duration::ZERO);
    }

    #[test]
    fn test_ready_group_fail_fast_backpressure() {
        let group = new_group(
            ReadyGroupConfig::new()
                .queue_capacity(1)
                .backpressure(Backpressure::FailFast)
                .validator(|_| {
                    // Slow worker
                    thread::sleep(Duration::from_millis(50));
                    false
                }),
        );
        group.start().unwrap();

        let full = (0..PARTICIPANTS).any(|id| matches!(group.ready(id), Err(Error::QueueFull)));
        assert!(full);

        group.stop();
    }

    #[test]
    fn test_ready_group_wait_before_start() {
        let group = new_group(ReadyGroupConfig::new());
        let waiter = {
            let group = group.clone();
            thread::spawn(move || group.wait_timeout(CALLBACK_TIMEOUT))
        };

        group.start().unwrap();
        for id in 0..PARTICIPANTS {
            group.ready(id).unwrap();
        }
        assert!(waiter.join().unwrap());
        assert!(group.is_completed());

        group.stop();
    }

    #[test]
    fn test_ready_group_stop_releases_waiters() {
        let group = new_group(ReadyGroupConfig::new());
        group.start().unwrap();

        let waiter = {
            let group = group.clone();
            thread::spawn(move || group.wait())
        };

        thread::sleep(Duration::from_millis(50));
        group.stop();
        waiter.join().unwrap();
        assert!(!group.is_completed());
    }

    #[test]
    fn test_ready_group_stop_from_callback() {
        let (stopped_tx, stopped_rx) = flume::unbounded();
        let group = new_group(
            ReadyGroupConfig::new()
                .timeout(Duration::from_millis(50))
                .on_timeout(move |group| {
                    group.stop();
                    stopped_tx.send(group.state()).unwrap();
                }),
        );
        group.start().unwrap();

        assert_eq!(
            stopped_rx.recv_timeout(CALLBACK_TIMEOUT).unwrap(),
            State::Idle
        );
    }

    #[test]
    fn test_ready_group_callback_panic_contained() {
        let (updated_tx, updated_rx) = flume::unbounded();
        let group = new_group(
            ReadyGroupConfig::new()
                .on_completed(|_| panic!("completion callback failure"))
                .on_updated(move |_| updated_tx.send(()).unwrap()),
        );
        group.start().unwrap();

        for id in 0..PARTICIPANTS {
            group.ready(id).unwrap();
        }
        for _ in 0..PARTICIPANTS {
            updated_rx.recv_timeout(CALLBACK_TIMEOUT).unwrap();
        }
        assert!(group.is_completed());

        // The worker survived
        group.discard(0).unwrap();
        updated_rx.recv_timeout(CALLBACK_TIMEOUT).unwrap();
        assert_eq!(group.is_ready(0), Some(false));

        group.stop();
    }

    #[test]
    fn test_ready_group_validator_panic_contained() {
        let (updated_tx, updated_rx) = flume::unbounded();
        let (completed_tx, completed_rx) = flume::unbounded();
        let group = new_group(
            ReadyGroupConfig::new()
                .validator(|participants| {
                    if participants.ready_count() == 1 {
                        panic!("validator failure");
                    }
                    participants.ready_count() == 2
                })
                .on_updated(move |_| updated_tx.send(()).unwrap())
                .on_completed(move |_| completed_tx.send(()).unwrap()),
        );
        group.start().unwrap();

        group.ready(1).unwrap();
        // The failing evaluation counts as not passed
        updated_rx.recv_timeout(CALLBACK_TIMEOUT).unwrap();
        assert!(!group.is_completed());
        assert_eq!(group.is_ready(1), Some(true));

        // The worker keeps applying actions
        group.ready(2).unwrap();
        completed_rx.recv_timeout(CALLBACK_TIMEOUT).unwrap();
        assert!(group.wait_timeout(CALLBACK_TIMEOUT));
        assert_eq!(group.state(), State::Completed);

        group.stop();
    }

    #[test]
    fn test_ready_group_block_backpressure() {
        let group = new_group(
            ReadyGroupConfig::new()
                .queue_capacity(1)
                .validator(|_| {
                    // Slow worker
                    thread::sleep(Duration::from_millis(100));
                    false
                }),
        );
        group.start().unwrap();

        let finished = Arc::new(AtomicBool::new(false));
        let producer = {
            let group = group.clone();
            let finished = finished.clone();
            thread::spawn(move || {
                let start = Instant::now();
                // One action in the worker, one queued, the third one waits
                for id in 0..3 {
                    group.ready(id).unwrap();
                }
                finished.store(true, Ordering::SeqCst);
                start.elapsed()
            })
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!finished.load(Ordering::SeqCst));

        let elapsed = producer.join().unwrap();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(finished.load(Ordering::SeqCst));

        group.stop();
        // Every queued action was drained by stop()
        for id in 0..3 {
            assert_eq!(group.is_ready(id), Some(true));
        }
    }

    #[test]
    fn test_ready_group_restart_arms_single_timeout() {
        let timeouts = Arc::new(AtomicUsize::new(0));
        let group = {
            let timeouts = timeouts.clone();
            new_group(
                ReadyGroupConfig::new()
                    .timeout(Duration::from_millis(100))
                    .on_timeout(move |_| {
                        timeouts.fetch_add(1, Ordering::SeqCst);
                    }),
            )
        };

        group.start().unwrap();
        group.start().unwrap();
        assert_eq!(group.state(), State::Running);

        thread::sleep(Duration::from_millis(400));
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);

        group.stop();
    }

    #[test]
    fn test_ready_group_waiter_released_across_restart() {
        let group = new_group(ReadyGroupConfig::new());

        for _ in 0..20 {
            group.start().unwrap();
            let waiter = {
                let group = group.clone();
                thread::spawn(move || group.wait_timeout(CALLBACK_TIMEOUT))
            };
            thread::sleep(Duration::from_millis(20));

            // The next run closes the gate right after completion opened it
            assert!(group.done());
            group.start().unwrap();

            assert!(waiter.join().unwrap());
        }

        group.stop();
    }

    #[test]
    fn test_ready_group_callbacks_share_dispatcher() {
        let (updated_tx, updated_rx) = flume::unbounded();
        let group = new_group(ReadyGroupConfig::new().on_updated(move |_| {
            updated_tx
                .send(thread::current().name().map(str::to_string))
                .unwrap()
        }));
        group.start().unwrap();

        for id in 0..PARTICIPANTS {
            group.ready(id).unwrap();
        }
        let names: Vec<_> = (0..PARTICIPANTS)
            .map(|_| updated_rx.recv_timeout(CALLBACK_TIMEOUT).unwrap())
            .collect();
        let dispatcher = Some(format!("{}-callbacks", DEFAULT_NAME));
        assert!(names.iter().all(|name| *name == dispatcher));

        group.stop();
    }
}
