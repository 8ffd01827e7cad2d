// Copyright © 2026 The Ready Group Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! One-shot, cancellable deadline backed by a timerfd.
//!
//! Each [`TimeoutTask`] owns a thread blocked in epoll on two descriptors:
//! the armed timerfd and a cancellation EventFd. Whichever side wins the
//! transition out of the pending state decides whether the job runs, so a
//! cancelled task never runs its job even if the timer expired concurrently.

use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::result;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use vmm_sys_util::eventfd::EventFd;
use vmm_sys_util::timerfd::TimerFd;

use crate::thread_helper::{join_thread, spawn_thread};

/// Errors associated with arming a timeout task.
#[derive(Debug, Error)]
pub enum Error {
    /// Cannot create thread
    #[error("Error spawning timeout thread: {0}")]
    ThreadSpawn(#[source] io::Error),

    /// Cannot create epoll context.
    #[error("Error creating epoll context: {0}")]
    Epoll(#[source] io::Error),

    /// Cannot create EventFd.
    #[error("Error creating EventFd: {0}")]
    EventFd(#[source] io::Error),

    /// Cannot create or arm the TimerFd.
    #[error("Error arming TimerFd: {0}")]
    TimerFd(#[source] vmm_sys_util::errno::Error),
}

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
enum EpollDispatch {
    Cancel = 1,
    Expired = 2,
    Unknown,
}

impl From<u64> for EpollDispatch {
    fn from(v: u64) -> Self {
        use EpollDispatch::*;
        match v {
            1 => Cancel,
            2 => Expired,
            _ => Unknown,
        }
    }
}

/// A job scheduled to run once after a delay unless cancelled first.
pub(crate) struct TimeoutTask {
    state: Arc<AtomicU8>,
    cancel_evt: EventFd,
    thread: Option<thread::JoinHandle<()>>,
}

impl TimeoutTask {
    /// Arm a timer for `duration` and run `job` on a dedicated thread named
    /// `name` when it expires.
    pub fn schedule<F>(name: &str, duration: Duration, job: F) -> result::Result<Self, Error>
    where
        F: FnOnce(),
        F: Send + 'static,
    {
        let mut timer = TimerFd::new().map_err(Error::TimerFd)?;
        let cancel_evt = EventFd::new(libc::EFD_NONBLOCK).map_err(Error::EventFd)?;
        // The worker keeps its own handle so the registered fd outlives the task.
        let thread_cancel_evt = cancel_evt.try_clone().map_err(Error::EventFd)?;

        let epoll_fd = epoll::create(true).map_err(Error::Epoll)?;
        // Use 'File' to enforce closing on 'epoll_fd'
        // SAFETY: epoll_fd is valid
        let epoll_file = unsafe { File::from_raw_fd(epoll_fd) };

        epoll::ctl(
            epoll_fd,
            epoll::ControlOptions::EPOLL_CTL_ADD,
            cancel_evt.as_raw_fd(),
            epoll::Event::new(epoll::Events::EPOLLIN, EpollDispatch::Cancel as u64),
        )
        .map_err(Error::Epoll)?;

        epoll::ctl(
            epoll_fd,
            epoll::ControlOptions::EPOLL_CTL_ADD,
            timer.as_raw_fd(),
            epoll::Event::new(epoll::Events::EPOLLIN, EpollDispatch::Expired as u64),
        )
        .map_err(Error::Epoll)?;

        timer.reset(duration, None).map_err(Error::TimerFd)?;

        let state = Arc::new(AtomicU8::new(PENDING));
        let thread_state = state.clone();
        let mut job = Some(job);

        let thread = spawn_thread(name, move || {
            let _cancel_evt = thread_cancel_evt;
            let epoll_fd = epoll_file.as_raw_fd();

            const EPOLL_EVENTS_LEN: usize = 2;
            let mut events = [epoll::Event::new(epoll::Events::empty(), 0); EPOLL_EVENTS_LEN];

            loop {
                let num_events = match epoll::wait(epoll_fd, -1, &mut events[..]) {
                    Ok(res) => res,
                    Err(e) => {
                        if e.kind() == io::ErrorKind::Interrupted {
                            continue;
                        }
                        error!("Error waiting on timeout epoll: {}", e);
                        return;
                    }
                };

                for event in events.iter().take(num_events) {
                    let dispatch_event: EpollDispatch = event.data.into();
                    match dispatch_event {
                        EpollDispatch::Unknown => {
                            let event = event.data;
                            warn!("Unknown timeout loop event: {}", event);
                        }
                        EpollDispatch::Cancel => {
                            debug!("Timeout cancelled before expiring");
                            return;
                        }
                        EpollDispatch::Expired => {
                            if let Err(e) = timer.wait() {
                                warn!("Error reading expired TimerFd: {}", e);
                            }
                            if thread_state
                                .compare_exchange(
                                    PENDING,
                                    FIRED,
                                    Ordering::AcqRel,
                                    Ordering::Acquire,
                                )
                                .is_ok()
                            {
                                if let Some(job) = job.take() {
                                    job();
                                }
                            }
                            return;
                        }
                    }
                }
            }
        })
        .map_err(Error::ThreadSpawn)?;

        Ok(Self {
            state,
            cancel_evt,
            thread: Some(thread),
        })
    }

    /// Cancel the task. Returns true if this call prevented the job from
    /// running, false if it already fired or was already cancelled.
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if let Err(e) = self.cancel_evt.write(1) {
            warn!("Error signalling timeout cancellation: {}", e);
        }

        cancelled
    }

    /// Cancel the task without waiting for its thread. Used where the caller
    /// may be running on that very thread, or may be waited on by it.
    pub fn detach(mut self) {
        self.cancel();
        self.thread.take();
    }

    #[cfg(test)]
    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }

    #[cfg(test)]
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }
}

impl Drop for TimeoutTask {
    fn drop(&mut self) {
        self.cancel();

        if let Some(t) = self.thread.take() {
            join_thread(t);
        }
    }
}
