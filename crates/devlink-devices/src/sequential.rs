/*!
 * Sequential channel implementation.
 *
 * One worker per channel pulls requests from an unbounded FIFO and hands them
 * to the transport one at a time. Closing the channel interrupts the worker
 * and cancels everything still queued.
 */
use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn, Instrument};

use devlink_core::config::ChannelConfig;
use devlink_core::logging::component_span;
use devlink_core::types::Id;
use devlink_core::utils::{current_handle, with_timeout};

use crate::channel::{AsyncIoHandler, Channel, IoHandler};
use crate::error::{ChannelError, Result, TransportError};
use crate::payload::Payload;
use crate::request::IoRequest;
use crate::task::IoTask;
use crate::transport::Transport;

struct ChannelShared {
    id: Id,
    queue: Mutex<VecDeque<Arc<IoTask>>>,
    wakeup: Notify,
    stopped: AtomicBool,
    shutdown: CancellationToken,
    async_handler: OnceLock<Arc<dyn AsyncIoHandler>>,
    request_timeout: Option<Duration>,
}

impl ChannelShared {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn close(&self) -> bool {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.shutdown.cancel();
        let queued: Vec<_> = self.queue.lock().drain(..).collect();
        info!(channel = %self.id, cancelled = queued.len(), "channel closed");

        // Handlers run outside the queue lock so they may call back into the channel.
        for task in queued {
            task.cancel();
        }
        true
    }

    fn push(&self, payload: Payload) -> bool {
        if self.is_stopped() {
            trace!(channel = %self.id, "push dropped, channel closed");
            return false;
        }
        match self.async_handler.get() {
            Some(handler) => {
                handler.on_message(payload);
                true
            }
            None => {
                debug!(channel = %self.id, "push dropped, no async handler registered");
                false
            }
        }
    }
}

/// Sink a transport uses to deliver unsolicited messages
///
/// Holds only a weak reference, so a transport keeping its sink does not keep
/// the channel alive.
#[derive(Clone)]
pub struct PushSink {
    shared: Weak<ChannelShared>,
}

impl PushSink {
    /// Forward a message to the channel's async handler.
    ///
    /// Returns `false` when the message was dropped (channel closed or gone,
    /// or no handler registered).
    pub fn push(&self, payload: Payload) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.push(payload),
            None => false,
        }
    }
}

impl fmt::Debug for PushSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushSink")
            .field("attached", &(self.shared.strong_count() > 0))
            .finish()
    }
}

/// A channel that runs every request on one dedicated worker, in FIFO order
pub struct SequentialChannel {
    shared: Arc<ChannelShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SequentialChannel {
    /// Start a channel on the current tokio runtime
    pub fn start<I: Into<Id>>(
        id: I,
        transport: Arc<dyn Transport>,
        config: &ChannelConfig,
    ) -> Result<Self> {
        let handle = current_handle()?;
        Ok(Self::start_on(&handle, id, transport, config))
    }

    /// Start a channel whose worker runs on `handle`
    pub fn start_on<I: Into<Id>>(
        handle: &Handle,
        id: I,
        transport: Arc<dyn Transport>,
        config: &ChannelConfig,
    ) -> Self {
        let id = id.into();
        let shared = Arc::new(ChannelShared {
            id: id.clone(),
            queue: Mutex::new(VecDeque::new()),
            wakeup: Notify::new(),
            stopped: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            async_handler: OnceLock::new(),
            request_timeout: config.request_timeout(),
        });

        transport.attach(PushSink {
            shared: Arc::downgrade(&shared),
        });

        let span = component_span("channel", Some(id.as_str()));
        info!(channel = %id, transport = transport.name(), "starting channel");
        let worker = handle.spawn(run_worker(shared.clone(), transport).instrument(span));

        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// A sink for delivering unsolicited messages into this channel
    pub fn push_sink(&self) -> PushSink {
        PushSink {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Number of queued requests not yet dispatched
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Wait for the worker to exit. Only meaningful after [`Channel::close`].
    pub async fn join(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(channel = %self.shared.id, "channel worker ended abnormally: {}", e);
            }
        }
    }
}

impl Channel for SequentialChannel {
    fn id(&self) -> &Id {
        &self.shared.id
    }

    fn submit(&self, request: IoRequest, handler: Arc<dyn IoHandler>) -> Result<Arc<IoTask>> {
        let task = IoTask::new(request, handler);
        {
            let mut queue = self.shared.queue.lock();
            if self.shared.is_stopped() {
                return Err(ChannelError::Closed);
            }
            queue.push_back(task.clone());
        }
        trace!(channel = %self.shared.id, request = %task.request().id(), "request queued");
        self.shared.wakeup.notify_one();
        Ok(task)
    }

    fn set_async_io_handler(&self, handler: Arc<dyn AsyncIoHandler>) -> Result<()> {
        self.shared
            .async_handler
            .set(handler)
            .map_err(|_| ChannelError::AsyncHandlerAlreadySet)
    }

    fn close(&self) -> bool {
        self.shared.close()
    }

    fn is_closed(&self) -> bool {
        self.shared.is_stopped()
    }
}

impl Drop for SequentialChannel {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl fmt::Debug for SequentialChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequentialChannel")
            .field("id", &self.shared.id)
            .field("closed", &self.shared.is_stopped())
            .field("pending", &self.pending())
            .finish()
    }
}

async fn run_worker(shared: Arc<ChannelShared>, transport: Arc<dyn Transport>) {
    loop {
        let next = shared.queue.lock().pop_front();
        let task = match next {
            Some(task) => task,
            None => {
                if shared.is_stopped() {
                    break;
                }
                tokio::select! {
                    _ = shared.shutdown.cancelled() => break,
                    _ = shared.wakeup.notified() => continue,
                }
            }
        };

        if shared.is_stopped() {
            task.cancel();
            continue;
        }
        if !task.begin() {
            trace!(request = %task.request().id(), "skipping cancelled request");
            continue;
        }

        let outcome = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => Err(ChannelError::Interrupted),
            result = dispatch(transport.as_ref(), task.request(), shared.request_timeout) => result,
        };

        match outcome {
            Ok(payload) => {
                task.complete(payload);
            }
            Err(ChannelError::Interrupted) => {
                if !shared.is_stopped() {
                    warn!(request = %task.request().id(), "transport interrupted, closing channel");
                }
                task.fail(ChannelError::Interrupted);
                shared.close();
                break;
            }
            Err(error) => {
                debug!(request = %task.request().id(), "request failed: {}", error);
                task.fail(error);
            }
        }
    }

    transport.on_close().await;
    debug!("channel worker stopped");
}

async fn dispatch(
    transport: &dyn Transport,
    request: &IoRequest,
    timeout: Option<Duration>,
) -> Result<Option<Payload>> {
    let call = AssertUnwindSafe(transport.handle_request(request)).catch_unwind();
    match with_timeout(timeout, call).await {
        Err(e) => Err(ChannelError::Timeout(format!("{}: {}", request.id(), e))),
        Ok(Err(_)) => Err(ChannelError::Transport(TransportError::protocol(format!(
            "{} panicked while handling {}",
            transport.name(),
            request.id()
        )))),
        Ok(Ok(result)) => result.map_err(ChannelError::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tokio::sync::{mpsc, watch};

    use crate::channel::ChannelExt;

    /// Transport that holds every request until the gate opens
    #[derive(Debug)]
    struct GatedTransport {
        gate: watch::Receiver<bool>,
        seen: Mutex<Vec<String>>,
        sink: Mutex<Option<PushSink>>,
    }

    impl GatedTransport {
        fn new(open: bool) -> (Arc<Self>, watch::Sender<bool>) {
            let (tx, rx) = watch::channel(open);
            let transport = Arc::new(Self {
                gate: rx,
                seen: Mutex::new(Vec::new()),
                sink: Mutex::new(None),
            });
            (transport, tx)
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for GatedTransport {
        fn name(&self) -> &str {
            "gated"
        }

        fn attach(&self, sink: PushSink) {
            *self.sink.lock() = Some(sink);
        }

        async fn handle_request(&self, request: &IoRequest) -> std::result::Result<Option<Payload>, TransportError> {
            let mut gate = self.gate.clone();
            while !*gate.borrow_and_update() {
                if gate.changed().await.is_err() {
                    return Err(TransportError::Interrupted);
                }
            }
            let id = request.id().to_string();
            self.seen.lock().push(id.clone());
            match id.as_str() {
                "fail" => Err(TransportError::protocol("bad frame")),
                "interrupt" => Err(TransportError::Interrupted),
                "panic" => panic!("transport bug"),
                _ => Ok(Some(Payload::from_string(format!("payload-{}", id)))),
            }
        }
    }

    #[derive(Debug)]
    enum Outcome {
        Complete(String, Option<String>),
        Error(String, String),
    }

    struct RecordingHandler {
        tx: mpsc::UnboundedSender<Outcome>,
    }

    impl IoHandler for RecordingHandler {
        fn complete(&self, request: &IoRequest, payload: Option<Payload>) {
            let text = payload.map(|p| p.as_str().unwrap_or_default().to_string());
            let _ = self.tx.send(Outcome::Complete(request.id().to_string(), text));
        }

        fn error(&self, request: &IoRequest, error: ChannelError) {
            let kind = match error {
                ChannelError::Cancelled => "cancelled".to_string(),
                ChannelError::Interrupted => "interrupted".to_string(),
                other => other.to_string(),
            };
            let _ = self.tx.send(Outcome::Error(request.id().to_string(), kind));
        }
    }

    fn recording() -> (Arc<RecordingHandler>, mpsc::UnboundedReceiver<Outcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(RecordingHandler { tx }), rx)
    }

    async fn collect(rx: &mut mpsc::UnboundedReceiver<Outcome>, n: usize) -> Vec<Outcome> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let outcome = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for outcome")
                .expect("handler dropped");
            out.push(outcome);
        }
        out
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (transport, _gate) = GatedTransport::new(true);
        let channel = SequentialChannel::start("fifo", transport.clone(), &ChannelConfig::default()).unwrap();
        let (handler, mut rx) = recording();

        let ids: Vec<String> = (0..20).map(|i| format!("r{}", i)).collect();
        for id in &ids {
            channel.submit(IoRequest::new(id.as_str()), handler.clone()).unwrap();
        }

        let outcomes = collect(&mut rx, ids.len()).await;
        let completed: Vec<String> = outcomes
            .into_iter()
            .map(|o| match o {
                Outcome::Complete(id, _) => id,
                Outcome::Error(id, e) => panic!("{} failed: {}", id, e),
            })
            .collect();
        assert_eq!(completed, ids);
        assert_eq!(transport.seen(), ids);
    }

    #[tokio::test]
    async fn test_cancel_sixth_of_ten() {
        let (transport, gate) = GatedTransport::new(false);
        let channel = SequentialChannel::start("scenario", transport.clone(), &ChannelConfig::default()).unwrap();
        let (handler, mut rx) = recording();

        let mut tasks = Vec::new();
        for i in 1..=10 {
            tasks.push(channel.submit(IoRequest::new(format!("q{}", i)), handler.clone()).unwrap());
        }

        assert!(tasks[5].cancel());
        gate.send(true).unwrap();

        let outcomes = collect(&mut rx, 10).await;
        let completions = outcomes.iter().filter(|o| matches!(o, Outcome::Complete(..))).count();
        let cancellations: Vec<_> = outcomes
            .iter()
            .filter_map(|o| match o {
                Outcome::Error(id, kind) if kind == "cancelled" => Some(id.clone()),
                _ => None,
            })
            .collect();

        assert_eq!(completions, 9);
        assert_eq!(cancellations, vec!["q6".to_string()]);
        assert!(!transport.seen().contains(&"q6".to_string()));
        assert!(outcomes.iter().all(|o| match o {
            Outcome::Complete(_, payload) => payload.as_deref() != Some("payload-q6"),
            _ => true,
        }));
    }

    #[tokio::test]
    async fn test_close_cancels_queued() {
        let (transport, _gate) = GatedTransport::new(false);
        let channel = SequentialChannel::start("closing", transport.clone(), &ChannelConfig::default()).unwrap();
        let (handler, mut rx) = recording();

        for i in 0..5 {
            channel.submit(IoRequest::new(format!("c{}", i)), handler.clone()).unwrap();
        }
        tokio::task::yield_now().await;

        assert!(channel.close());
        assert!(!channel.close());
        assert!(channel.is_closed());

        let outcomes = collect(&mut rx, 5).await;
        let cancelled = outcomes
            .iter()
            .filter(|o| matches!(o, Outcome::Error(_, kind) if kind == "cancelled"))
            .count();
        assert!(cancelled >= 4);
        assert!(outcomes.iter().all(|o| matches!(o, Outcome::Error(..))));
        assert!(transport.seen().is_empty());

        let err = channel.submit(IoRequest::new("late"), handler.clone()).unwrap_err();
        assert!(matches!(err, ChannelError::Closed));

        channel.join().await;
    }

    #[tokio::test]
    async fn test_transport_error_keeps_channel_open() {
        let (transport, _gate) = GatedTransport::new(true);
        let channel = SequentialChannel::start("errors", transport, &ChannelConfig::default()).unwrap();

        let err = channel.request(IoRequest::new("fail")).unwrap().await.unwrap_err();
        assert!(matches!(err, ChannelError::Transport(TransportError::Protocol(_))));

        let err = channel.request(IoRequest::new("panic")).unwrap().await.unwrap_err();
        assert!(matches!(err, ChannelError::Transport(_)));

        let payload = tokio_test::assert_ok!(channel.request(IoRequest::new("ok")).unwrap().await);
        assert_eq!(payload.unwrap().as_str().unwrap(), "payload-ok");
        assert!(!channel.is_closed());
    }

    #[test_log::test(tokio::test)]
    async fn test_interrupt_closes_channel_and_cancels_rest() {
        let (transport, gate) = GatedTransport::new(false);
        let channel = SequentialChannel::start("interrupt", transport, &ChannelConfig::default()).unwrap();
        let (handler, mut rx) = recording();

        channel.submit(IoRequest::new("interrupt"), handler.clone()).unwrap();
        channel.submit(IoRequest::new("after-1"), handler.clone()).unwrap();
        channel.submit(IoRequest::new("after-2"), handler.clone()).unwrap();
        gate.send(true).unwrap();

        let outcomes = collect(&mut rx, 3).await;
        assert!(matches!(&outcomes[0], Outcome::Error(id, kind) if id == "interrupt" && kind == "interrupted"));
        assert!(outcomes[1..]
            .iter()
            .all(|o| matches!(o, Outcome::Error(_, kind) if kind == "cancelled")));

        channel.join().await;
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let (transport, _gate) = GatedTransport::new(false);
        let config = ChannelConfig { request_timeout_ms: 20 };
        let channel = SequentialChannel::start("timeout", transport, &config).unwrap();

        let err = channel.request(IoRequest::new("slow")).unwrap().await.unwrap_err();
        assert!(matches!(err, ChannelError::Timeout(_)));
        assert!(!channel.is_closed());
    }

    #[derive(Default)]
    struct CountingAsync(AtomicUsize);

    impl AsyncIoHandler for CountingAsync {
        fn on_message(&self, _payload: Payload) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_async_handler_registration_and_push() {
        let (transport, _gate) = GatedTransport::new(true);
        let channel = SequentialChannel::start("push", transport.clone(), &ChannelConfig::default()).unwrap();
        let sink = transport.sink.lock().clone().unwrap();

        assert!(!sink.push(Payload::from_string("early")));

        let counter = Arc::new(CountingAsync::default());
        channel.set_async_io_handler(counter.clone()).unwrap();
        let err = channel.set_async_io_handler(Arc::new(CountingAsync::default())).unwrap_err();
        assert!(matches!(err, ChannelError::AsyncHandlerAlreadySet));

        assert!(sink.push(Payload::from_string("m1")));
        assert!(channel.push_sink().push(Payload::from_string("m2")));
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);

        channel.close();
        assert!(!sink.push(Payload::from_string("late")));
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }
}
