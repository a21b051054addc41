//! Background task registry for a chat screen.
//!
//! Every task the controller spawns is tracked here so teardown can cancel
//! all of them at once. The handle lock is never held across an `.await`.

use std::future::Future;
use std::sync::Mutex;

use log::debug;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub struct TaskRegistry {
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn `fut`, dropping it at its next suspension point once shutdown starts
    pub fn spawn_cancellable<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Checked under the lock `shutdown` drains, so every spawned handle is
        // either aborted by it or never created
        let Ok(mut handles) = self.handles.lock() else {
            return;
        };
        if self.is_shut_down() {
            debug!("Task registry is shut down, not spawning");
            return;
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = fut => {}
            }
        });

        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Number of tasks that have not finished yet
    pub fn active(&self) -> usize {
        match self.handles.lock() {
            Ok(handles) => handles.iter().filter(|h| !h.is_finished()).count(),
            Err(_) => 0,
        }
    }

    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        if let Ok(mut handles) = self.handles.lock() {
            for handle in handles.drain(..) {
                handle.abort();
            }
        }
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
