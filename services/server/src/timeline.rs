//! The single cooperative task queue.
//!
//! Exactly one worker drains the queue, running each task to completion
//! before the next; there is no preemption and no parallel execution.  All
//! model mutations, journal appends, and relay ticks run as timeline tasks,
//! which is why the model needs no lock.  A task that blocks on its own
//! socket stalls the server — the accepted cost of the design.
//!
//! Runs on a current-thread runtime inside a `LocalSet`; tasks are local
//! futures and need not be `Send`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

type Task = Pin<Box<dyn Future<Output = ()>>>;

/// Handle for enqueueing tasks.  Cheap to clone; the worker stops once every
/// handle is dropped and the queue drains.
#[derive(Clone)]
pub struct Timeline {
    tx: mpsc::UnboundedSender<Task>,
}

/// The draining end; run it on the timeline thread.
pub struct TimelineWorker {
    rx: mpsc::UnboundedReceiver<Task>,
}

impl Timeline {
    pub fn new() -> (Timeline, TimelineWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Timeline { tx }, TimelineWorker { rx })
    }

    /// Enqueue a task to run as soon as the worker reaches it.
    pub fn schedule_now<F>(&self, task: F)
    where
        F: Future<Output = ()> + 'static,
    {
        if self.tx.send(Box::pin(task)).is_err() {
            debug!("timeline stopped, dropping task");
        }
    }

    /// Enqueue a task after at least `delay`.
    ///
    /// Must be called from within the timeline's `LocalSet`.
    pub fn schedule_in<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + 'static,
    {
        let tx = self.tx.clone();
        tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            if tx.send(Box::pin(task)).is_err() {
                debug!("timeline stopped, dropping delayed task");
            }
        });
    }
}

impl TimelineWorker {
    /// Drain the queue, one task at a time, until every `Timeline` handle is
    /// gone.
    pub async fn run(mut self) {
        while let Some(task) = self.rx.recv().await {
            task.await;
        }
    }
}
