// Copyright © 2026 The Ready Group Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::io;
use std::thread::{self, JoinHandle};

pub(crate) fn spawn_thread<F>(name: &str, f: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce(),
    F: Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|e| {
            error!("Failed to spawn thread for {}: {}", name, e);
            e
        })
}

/// Join `handle` unless it refers to the calling thread, in which case the
/// handle is dropped and the thread detached. Stopping a group from one of
/// its own threads must not deadlock.
pub(crate) fn join_thread(handle: JoinHandle<()>) {
    if handle.thread().id() == thread::current().id() {
        return;
    }

    let name = handle.thread().name().unwrap_or("<unnamed>").to_string();
    if let Err(e) = handle.join() {
        error!("Error joining thread {}: {:?}", name, e);
    }
}
