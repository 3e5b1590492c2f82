//! Serialized command queue.
//!
//! A single dedicated worker thread owns the queue's state `S` and runs
//! submitted tasks one at a time, strictly in submission order. Callers
//! never block: [`CommandQueue::submit`] enqueues and hands back a
//! [`Pending`] future that resolves when the worker has finished the task.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::thread;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::BridgeError;

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

struct Envelope<S> {
    seq: u64,
    name: &'static str,
    job: Job<S>,
}

/// Handle to the serialized worker.
pub struct CommandQueue<S> {
    tx: Mutex<Option<mpsc::UnboundedSender<Envelope<S>>>>,
    closed: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
    next_seq: Mutex<u64>,
    exited: Mutex<Option<oneshot::Receiver<()>>>,
}

impl<S: Send + 'static> CommandQueue<S> {
    /// Move `state` onto a new worker thread and start draining.
    pub fn spawn(state: S) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let closed = Arc::new(AtomicBool::new(false));
        let pending = Arc::new(AtomicUsize::new(0));

        let worker_closed = closed.clone();
        let worker_pending = pending.clone();
        thread::Builder::new()
            .name("llama-bridge-worker".to_string())
            .spawn(move || {
                Self::worker_loop(state, rx, worker_closed, worker_pending);
                let _ = exit_tx.send(());
            })?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            closed,
            pending,
            next_seq: Mutex::new(0),
            exited: Mutex::new(Some(exit_rx)),
        })
    }

    /// Enqueue a task. Returns immediately; the task runs on the worker
    /// after every previously submitted task has completed.
    pub fn submit<T, F>(&self, name: &'static str, task: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut S) -> Result<T, BridgeError> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let job: Job<S> = Box::new(move |state: &mut S| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(state)))
                .unwrap_or_else(|payload| Err(BridgeError::TaskPanicked(panic_message(&*payload))));
            let _ = reply_tx.send(outcome);
        });

        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            debug!(task = name, "Rejected submission to closed queue");
            return Pending::failed(BridgeError::QueueClosed);
        };

        // Sequence numbers are assigned under the sender lock so they match
        // channel order.
        let seq = {
            let mut next = self.next_seq.lock().unwrap_or_else(PoisonError::into_inner);
            let seq = *next;
            *next += 1;
            seq
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        if tx.send(Envelope { seq, name, job }).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Pending::failed(BridgeError::QueueClosed);
        }
        debug!(task = name, seq, "Submitted task");

        Pending::waiting(reply_rx)
    }

    /// Stop accepting work. The in-flight task finishes; queued tasks are
    /// discarded and their callers see [`BridgeError::QueueClosed`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        info!("Command queue closed");
    }

    /// Submitted tasks that have not finished yet (including the in-flight one).
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Close the queue and wait until the worker has exited and dropped its state.
    pub async fn shutdown(&self) {
        self.close();
        let exited = self.exited.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(exited) = exited {
            let _ = exited.await;
            info!("Command queue worker exited");
        }
    }

    fn worker_loop(
        mut state: S,
        mut rx: mpsc::UnboundedReceiver<Envelope<S>>,
        closed: Arc<AtomicBool>,
        pending: Arc<AtomicUsize>,
    ) {
        debug!("Worker started");
        let mut discarded = 0usize;

        while let Some(Envelope { seq, name, job }) = rx.blocking_recv() {
            if closed.load(Ordering::SeqCst) {
                // Dropping the job drops its reply sender.
                drop(job);
                discarded += 1;
                pending.fetch_sub(1, Ordering::SeqCst);
                continue;
            }

            debug!(task = name, seq, "Running task");
            job(&mut state);
            pending.fetch_sub(1, Ordering::SeqCst);
        }

        if discarded > 0 {
            warn!(discarded, "Discarded queued tasks on close");
        }
        debug!("Worker draining complete, releasing state");
        drop(state);
    }
}

impl<S> Drop for CommandQueue<S> {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Outcome of a submitted task, resolved asynchronously.
#[must_use = "a Pending does nothing unless awaited"]
pub struct Pending<T> {
    inner: PendingInner<T>,
}

enum PendingInner<T> {
    Waiting(oneshot::Receiver<Result<T, BridgeError>>),
    Failed(Option<BridgeError>),
}

impl<T> Pending<T> {
    fn waiting(rx: oneshot::Receiver<Result<T, BridgeError>>) -> Self {
        Self {
            inner: PendingInner::Waiting(rx),
        }
    }

    /// A call that was rejected before reaching the queue.
    pub fn failed(err: BridgeError) -> Self {
        Self {
            inner: PendingInner::Failed(Some(err)),
        }
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T, BridgeError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            PendingInner::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
                // Sender dropped without replying: the task was discarded.
                Poll::Ready(Err(_)) => Poll::Ready(Err(BridgeError::QueueClosed)),
                Poll::Pending => Poll::Pending,
            },
            PendingInner::Failed(err) => {
                Poll::Ready(Err(err.take().unwrap_or(BridgeError::QueueClosed)))
            }
        }
    }
}
