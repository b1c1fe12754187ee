/*!
 * Channel-level tasks.
 *
 * An [`IoTask`] tracks one submitted request through
 * `New -> Running -> {Finished | Cancelled}`. Every transition is a single
 * compare-and-swap, so whichever of the worker or a concurrent `cancel()` wins
 * is the only one that reaches the handler.
 */
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

use crate::channel::IoHandler;
use crate::error::{ChannelError, Result};
use crate::payload::Payload;
use crate::request::IoRequest;

/// Lifecycle state of an [`IoTask`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Queued, not yet dispatched
    New = 0,
    /// Handed to the transport
    Running = 1,
    /// Completed or failed after dispatch
    Finished = 2,
    /// Cancelled before dispatch
    Cancelled = 3,
}

impl TaskState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TaskState::New,
            1 => TaskState::Running,
            2 => TaskState::Finished,
            _ => TaskState::Cancelled,
        }
    }

    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Cancelled)
    }
}

/// Handle for one request submitted to a channel
pub struct IoTask {
    request: IoRequest,
    handler: Arc<dyn IoHandler>,
    state: AtomicU8,
}

impl IoTask {
    pub(crate) fn new(request: IoRequest, handler: Arc<dyn IoHandler>) -> Arc<Self> {
        Arc::new(Self {
            request,
            handler,
            state: AtomicU8::new(TaskState::New as u8),
        })
    }

    /// The submitted request
    pub fn request(&self) -> &IoRequest {
        &self.request
    }

    /// Current state
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the task has reached a terminal state
    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    /// Cancel the task if it has not been dispatched yet.
    ///
    /// Returns `true` when this call cancelled the task; the handler then
    /// receives [`ChannelError::Cancelled`]. Once dispatched this is a no-op.
    pub fn cancel(&self) -> bool {
        if !self.transition(TaskState::New, TaskState::Cancelled) {
            return false;
        }
        trace!(request = %self.request.id(), "request cancelled");
        self.handler.error(&self.request, ChannelError::Cancelled);
        true
    }

    pub(crate) fn begin(&self) -> bool {
        self.transition(TaskState::New, TaskState::Running)
    }

    pub(crate) fn complete(&self, payload: Option<Payload>) -> bool {
        if !self.transition(TaskState::Running, TaskState::Finished) {
            return false;
        }
        self.handler.complete(&self.request, payload);
        true
    }

    pub(crate) fn fail(&self, error: ChannelError) -> bool {
        if !self.transition(TaskState::Running, TaskState::Finished) {
            return false;
        }
        self.handler.error(&self.request, error);
        true
    }

    fn transition(&self, from: TaskState, to: TaskState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Debug for IoTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoTask")
            .field("request", self.request.id())
            .field("state", &self.state())
            .finish()
    }
}

/// Bridges handler callbacks into a oneshot channel
pub(crate) struct OneshotHandler {
    tx: Mutex<Option<oneshot::Sender<Result<Option<Payload>>>>>,
}

impl OneshotHandler {
    pub(crate) fn new() -> (Self, oneshot::Receiver<Result<Option<Payload>>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Mutex::new(Some(tx)) }, rx)
    }

    fn send(&self, result: Result<Option<Payload>>) {
        if let Some(tx) = self.tx.lock().take() {
            // Receiver gone means the caller stopped waiting.
            let _ = tx.send(result);
        }
    }
}

impl IoHandler for OneshotHandler {
    fn complete(&self, _request: &IoRequest, payload: Option<Payload>) {
        self.send(Ok(payload));
    }

    fn error(&self, _request: &IoRequest, error: ChannelError) {
        self.send(Err(error));
    }
}

/// A channel task whose outcome is awaited as a future
///
/// Dropping the future does not cancel the request; call
/// [`IoTask::cancel`] through [`ResponseFuture::task`] for that.
#[derive(Debug)]
pub struct ResponseFuture {
    task: Arc<IoTask>,
    rx: oneshot::Receiver<Result<Option<Payload>>>,
}

impl ResponseFuture {
    pub(crate) fn new(task: Arc<IoTask>, rx: oneshot::Receiver<Result<Option<Payload>>>) -> Self {
        Self { task, rx }
    }

    /// The underlying channel task
    pub fn task(&self) -> &Arc<IoTask> {
        &self.task
    }
}

impl Future for ResponseFuture {
    type Output = Result<Option<Payload>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ChannelError::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}
