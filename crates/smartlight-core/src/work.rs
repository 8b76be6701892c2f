// ── Deferred work queue ──
//
// Driver calls (link start/stop, transport stop, config commits) may block
// and must never run on the context that delivers hardware events. They
// are queued here and executed one at a time, in submission order, on the
// blocking thread pool.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Work {
    Job { label: &'static str, job: Job },
    Barrier(oneshot::Sender<()>),
}

/// Submission side of the queue. Cheap to clone.
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<Work>,
}

/// Execution side; drive it with [`WorkQueueWorker::run`].
pub struct WorkQueueWorker {
    rx: mpsc::UnboundedReceiver<Work>,
}

impl WorkQueue {
    pub fn new() -> (Self, WorkQueueWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, WorkQueueWorker { rx })
    }

    /// Queue `job` behind everything already submitted.
    pub fn defer(&self, label: &'static str, job: impl FnOnce() + Send + 'static) {
        let work = Work::Job {
            label,
            job: Box::new(job),
        };
        if self.tx.send(work).is_err() {
            warn!(label, "work queue closed, dropping job");
        }
    }

    /// Wait until every job submitted before this call has finished.
    pub async fn drain(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Work::Barrier(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

impl WorkQueueWorker {
    /// Execute jobs until cancelled. Jobs already queued at cancellation
    /// still run before this returns.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                work = self.rx.recv() => match work {
                    Some(work) => execute(work).await,
                    None => return,
                },
            }
        }

        self.rx.close();
        while let Some(work) = self.rx.recv().await {
            execute(work).await;
        }
        debug!("work queue stopped");
    }
}

async fn execute(work: Work) {
    match work {
        Work::Job { label, job } => {
            debug!(label, "running deferred job");
            if let Err(e) = tokio::task::spawn_blocking(job).await {
                error!(label, error = %e, "deferred job panicked");
            }
        }
        Work::Barrier(done) => {
            let _ = done.send(());
        }
    }
}
