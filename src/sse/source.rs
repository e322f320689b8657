use std::collections::HashMap;
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::de::DeserializeOwned;

use super::backoff::{Backoff, ReconnectOptions};
use super::parser::{EventParser, SseEvent};
use super::transport::Connector;
use crate::error::{DebugFlowError, Result};
use crate::logging::Logger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closed,
}

/// An event whose payload was decoded from JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent<T> {
    pub event_type: String,
    pub data: T,
    pub last_event_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub message: String,
    /// Delay before the next connection attempt, `None` when the source gives up
    pub retry_in: Option<Duration>,
}

type RawHandler = Box<dyn FnMut(&SseEvent) + Send>;
type OpenHandler = Box<dyn FnMut() + Send>;
type ErrorHandler = Box<dyn FnMut(&ErrorEvent) + Send>;
type ShutdownHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Listeners {
    events: HashMap<String, Vec<RawHandler>>,
    open: Vec<OpenHandler>,
    error: Vec<ErrorHandler>,
}

/// State shared between a source handle and its worker thread.
struct Shared {
    logger: Logger,
    listeners: Mutex<Listeners>,
    state: Mutex<ReadyState>,
    closed: AtomicBool,
    worker: Mutex<Option<ThreadId>>,
    /// Tears down the connection the worker is currently reading
    shutdown: Mutex<Option<ShutdownHook>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn new(logger: Logger) -> Self {
        Self {
            logger,
            listeners: Mutex::new(Listeners::default()),
            state: Mutex::new(ReadyState::Connecting),
            closed: AtomicBool::new(false),
            worker: Mutex::new(None),
            shutdown: Mutex::new(None),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn state(&self) -> ReadyState {
        *lock(&self.state)
    }

    fn set_state(&self, state: ReadyState) {
        let mut current = lock(&self.state);
        // Closed is terminal
        if *current != ReadyState::Closed {
            *current = state;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        *lock(&self.state) = ReadyState::Closed;
        if let Some(shutdown) = lock(&self.shutdown).take() {
            shutdown();
        }

        // Wait for a callback in flight, unless we are inside one
        let on_worker = *lock(&self.worker) == Some(thread::current().id());
        if !on_worker {
            drop(lock(&self.listeners));
        }
    }

    /// Registers the teardown for a fresh connection. Runs it at once when
    /// the source closed in the meantime.
    fn set_shutdown(&self, shutdown: Option<ShutdownHook>) {
        let mut slot = lock(&self.shutdown);
        *slot = shutdown;
        if self.is_closed()
            && let Some(shutdown) = slot.take()
        {
            shutdown();
        }
    }

    fn emit_open(&self) {
        let mut listeners = lock(&self.listeners);
        if self.is_closed() {
            return;
        }
        for handler in listeners.open.iter_mut() {
            handler();
        }
    }

    fn emit_error(&self, event: &ErrorEvent) {
        let mut listeners = lock(&self.listeners);
        if self.is_closed() {
            return;
        }
        for handler in listeners.error.iter_mut() {
            handler(event);
        }
    }

    fn dispatch(&self, event: &SseEvent) {
        let mut listeners = lock(&self.listeners);
        if self.is_closed() {
            return;
        }
        match listeners.events.get_mut(&event.event_type) {
            Some(handlers) => {
                for handler in handlers.iter_mut() {
                    handler(event);
                }
            }
            None => log::trace!(
                target: self.logger.target(),
                "No handler for event type {:?}",
                event.event_type
            ),
        }
    }
}

/// Connection loop run on the worker thread.
struct Worker<C> {
    url: String,
    connector: C,
    shared: Arc<Shared>,
    close_rx: Receiver<()>,
    backoff: Option<Backoff>,
}

impl<C: Connector> Worker<C> {
    fn run(mut self) {
        *lock(&self.shared.worker) = Some(thread::current().id());
        let logger = self.shared.logger.clone();

        while !self.shared.is_closed() {
            self.shared.set_state(ReadyState::Connecting);
            let result = self.stream_once();
            self.shared.set_shutdown(None);
            let err = match result {
                Ok(()) => break,
                Err(err) => err,
            };
            if self.shared.is_closed() {
                break;
            }

            let Some(backoff) = self.backoff.as_mut() else {
                log::warn!(target: logger.target(), "Event stream {} failed: {err}", self.url);
                self.shared.set_state(ReadyState::Closed);
                self.shared.emit_error(&ErrorEvent {
                    message: err.to_string(),
                    retry_in: None,
                });
                break;
            };

            let delay = backoff.current();
            log::error!(
                target: logger.target(),
                "Connection lost ({err}). Scheduling reconnect in {} ms",
                delay.as_millis()
            );
            self.shared.emit_error(&ErrorEvent {
                message: err.to_string(),
                retry_in: Some(delay),
            });

            match self.close_rx.recv_timeout(delay) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
            if self.shared.is_closed() {
                break;
            }
            log::info!(target: logger.target(), "Reconnecting to {}", self.url);
            backoff.advance();
        }

        self.shared.set_state(ReadyState::Closed);
        log::debug!(target: logger.target(), "Event stream worker for {} stopped", self.url);
    }

    /// One physical connection. `Ok` only when the source was closed.
    fn stream_once(&mut self) -> Result<()> {
        let (mut reader, shutdown) = self.connector.connect(&self.url)?.into_parts();
        self.shared.set_shutdown(shutdown);
        if self.shared.is_closed() {
            return Ok(());
        }

        self.shared.set_state(ReadyState::Open);
        if let Some(backoff) = self.backoff.as_mut() {
            backoff.reset();
        }
        log::debug!(target: self.shared.logger.target(), "Connected to {}", self.url);
        self.shared.emit_open();

        let mut parser = EventParser::new();
        let mut buf = [0u8; 4096];
        loop {
            let read = reader.read(&mut buf);
            if self.shared.is_closed() {
                return Ok(());
            }
            let n = match read {
                Ok(0) => return Err(DebugFlowError::StreamEnded),
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            for event in parser.feed(&buf[..n]) {
                self.shared.dispatch(&event);
            }
        }
    }
}

/// Handle to a connection loop. The worker starts on [`Source::start`].
struct Source {
    url: String,
    shared: Arc<Shared>,
    close_tx: Sender<()>,
    pending: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Source {
    fn new<C: Connector>(url: String, connector: C, backoff: Option<Backoff>) -> Self {
        let shared = Arc::new(Shared::new(Logger::root().child("sse")));
        let (close_tx, close_rx) = crossbeam_channel::bounded(1);

        let worker = Worker {
            url: url.clone(),
            connector,
            shared: Arc::clone(&shared),
            close_rx,
            backoff,
        };
        let pending: Box<dyn FnOnce() + Send> = Box::new(move || worker.run());

        Self {
            url,
            shared,
            close_tx,
            pending: Mutex::new(Some(pending)),
        }
    }

    fn start(&self) {
        let Some(run) = lock(&self.pending).take() else {
            return;
        };
        if self.shared.is_closed() {
            return;
        }

        let spawned = thread::Builder::new()
            .name("debug-flow-sse".to_string())
            .spawn(run);
        if let Err(err) = spawned {
            log::error!(target: self.shared.logger.target(), "Failed to start event stream worker: {err}");
            self.shared.set_state(ReadyState::Closed);
            self.shared.emit_error(&ErrorEvent {
                message: err.to_string(),
                retry_in: None,
            });
        }
    }

    fn on_event(&self, event_type: &str, handler: RawHandler) {
        lock(&self.shared.listeners)
            .events
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
    }

    fn on_open(&self, handler: OpenHandler) {
        lock(&self.shared.listeners).open.push(handler);
    }

    fn on_error(&self, handler: ErrorHandler) {
        lock(&self.shared.listeners).error.push(handler);
    }

    fn close(&self) {
        if self.shared.is_closed() {
            return;
        }
        self.shared.close();
        let _ = self.close_tx.try_send(());
        log::debug!(target: self.shared.logger.target(), "Closed event stream {}", self.url);
    }

    fn ready_state(&self) -> ReadyState {
        self.shared.state()
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        self.close();
    }
}

/// Common interface of the plain and the reconnecting event source.
///
/// Handlers run on the source's worker thread, in arrival order. They must
/// not register further handlers on the same source.
pub trait EventStream {
    fn url(&self) -> &str;

    /// Spawn the worker. Register handlers before this to see every event.
    fn start(&self);

    /// Register a handler receiving the raw payload of `event_type`.
    fn on_raw<F>(&self, event_type: &str, handler: F)
    where
        F: FnMut(&SseEvent) + Send + 'static;

    fn on_open<F>(&self, handler: F)
    where
        F: FnMut() + Send + 'static;

    fn on_error<F>(&self, handler: F)
    where
        F: FnMut(&ErrorEvent) + Send + 'static;

    /// Stop the stream. No handler is invoked once this returns.
    fn close(&self);

    fn ready_state(&self) -> ReadyState;

    /// Register a handler for `event_type` whose payload is decoded as JSON.
    /// Payloads that fail to decode are logged and dropped.
    fn on<T, F>(&self, event_type: &str, mut handler: F)
    where
        T: DeserializeOwned + 'static,
        F: FnMut(MessageEvent<T>) + Send + 'static,
    {
        let logger = Logger::root().child("sse");
        self.on_raw(event_type, move |event| {
            match serde_json::from_str::<T>(&event.data) {
                Ok(data) => handler(MessageEvent {
                    event_type: event.event_type.clone(),
                    data,
                    last_event_id: event.id.clone(),
                }),
                Err(err) => log::warn!(
                    target: logger.target(),
                    "Failed to parse event {}: {err} ({:?})",
                    event.event_type,
                    event.data
                ),
            }
        });
    }

    fn is_connecting(&self) -> bool {
        self.ready_state() == ReadyState::Connecting
    }

    fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    fn is_closed(&self) -> bool {
        self.ready_state() == ReadyState::Closed
    }
}

macro_rules! delegate_event_stream {
    ($ty:ty) => {
        impl EventStream for $ty {
            fn url(&self) -> &str {
                &self.source.url
            }

            fn start(&self) {
                self.source.start();
            }

            fn on_raw<F>(&self, event_type: &str, handler: F)
            where
                F: FnMut(&SseEvent) + Send + 'static,
            {
                self.source.on_event(event_type, Box::new(handler));
            }

            fn on_open<F>(&self, handler: F)
            where
                F: FnMut() + Send + 'static,
            {
                self.source.on_open(Box::new(handler));
            }

            fn on_error<F>(&self, handler: F)
            where
                F: FnMut(&ErrorEvent) + Send + 'static,
            {
                self.source.on_error(Box::new(handler));
            }

            fn close(&self) {
                self.source.close();
            }

            fn ready_state(&self) -> ReadyState {
                self.source.ready_state()
            }
        }
    };
}

/// A single connection: the first failure or end of stream closes it.
pub struct TypedEventSource {
    source: Source,
}

impl TypedEventSource {
    /// Prepare a source without connecting yet.
    pub fn new<C: Connector>(url: impl Into<String>, connector: C) -> Self {
        Self {
            source: Source::new(url.into(), connector, None),
        }
    }

    pub fn connect<C: Connector>(url: impl Into<String>, connector: C) -> Self {
        let source = Self::new(url, connector);
        source.start();
        source
    }
}

delegate_event_stream!(TypedEventSource);

/// Reconnects with exponential backoff until closed.
///
/// Handlers are owned here and apply to every underlying connection. Nothing
/// is replayed after a reconnect.
pub struct ReconnectingTypedEventSource {
    source: Source,
    options: ReconnectOptions,
}

impl ReconnectingTypedEventSource {
    pub fn new<C: Connector>(
        url: impl Into<String>,
        options: ReconnectOptions,
        connector: C,
    ) -> Self {
        Self {
            source: Source::new(url.into(), connector, Some(Backoff::new(options))),
            options,
        }
    }

    pub fn connect<C: Connector>(
        url: impl Into<String>,
        options: ReconnectOptions,
        connector: C,
    ) -> Self {
        let source = Self::new(url, options, connector);
        source.start();
        source
    }

    pub fn options(&self) -> &ReconnectOptions {
        &self.options
    }
}

delegate_event_stream!(ReconnectingTypedEventSource);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::testing::{ScriptedConnector, Step};
    use serde::Deserialize;

    const URL: &str = "http://localhost/events";
    const TIMEOUT: Duration = Duration::from_secs(5);

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Status {
        online: bool,
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn should_deliver_typed_events_and_drop_bad_json() {
        // given
        let (stream_tx, stream_rx) = crossbeam_channel::unbounded();
        let (connector, _alive) = ScriptedConnector::new(vec![Step::Live(stream_rx)]);
        let source = TypedEventSource::new(URL, connector);
        let (got_tx, got_rx) = crossbeam_channel::unbounded();
        let (open_tx, open_rx) = crossbeam_channel::unbounded();
        source.on::<Status, _>("status", move |event| {
            let _ = got_tx.send(event.data);
        });
        source.on_open(move || {
            let _ = open_tx.send(());
        });
        assert!(source.is_connecting());

        // when
        source.start();
        open_rx.recv_timeout(TIMEOUT).unwrap();
        stream_tx
            .send("event: status\ndata: {\"online\":true}\n\n".to_string())
            .unwrap();
        stream_tx
            .send("event: status\ndata: not json\n\n".to_string())
            .unwrap();
        stream_tx
            .send("event: other\ndata: {}\n\nevent: status\ndata: {\"online\":false}\n\n".to_string())
            .unwrap();

        // then
        assert!(source.is_open());
        assert_eq!(got_rx.recv_timeout(TIMEOUT).unwrap(), Status { online: true });
        assert_eq!(got_rx.recv_timeout(TIMEOUT).unwrap(), Status { online: false });
    }

    #[test]
    fn should_close_single_source_on_first_error() {
        let (connector, alive) = ScriptedConnector::new(vec![Step::Fail("refused".into())]);
        let source = TypedEventSource::new(URL, connector);
        let (err_tx, err_rx) = crossbeam_channel::unbounded();
        source.on_error(move |event| {
            let _ = err_tx.send(event.clone());
        });

        source.start();
        let error = err_rx.recv_timeout(TIMEOUT).unwrap();

        assert!(error.message.contains("refused"));
        assert_eq!(error.retry_in, None);
        assert!(source.is_closed());
        // the worker exits without retrying
        assert_eq!(
            alive.recv_timeout(TIMEOUT),
            Err(RecvTimeoutError::Disconnected)
        );
    }

    #[test]
    fn should_back_off_exponentially_and_reset_after_open() {
        // given
        let options = ReconnectOptions {
            initial_delay: ms(1),
            max_delay: ms(8),
            backoff_factor: 2.0,
        };
        let mut steps: Vec<Step> = (0..5).map(|i| Step::Fail(format!("attempt {i}"))).collect();
        steps.push(Step::Body("event: ping\ndata: 1\n\n".into()));
        let (connector, _alive) = ScriptedConnector::new(steps);
        let source = ReconnectingTypedEventSource::new(URL, options, connector);

        let (delay_tx, delay_rx) = crossbeam_channel::unbounded();
        let (ping_tx, ping_rx) = crossbeam_channel::unbounded();
        let (open_tx, open_rx) = crossbeam_channel::unbounded();
        source.on_error(move |event| {
            let _ = delay_tx.send(event.retry_in);
        });
        source.on::<u32, _>("ping", move |event| {
            let _ = ping_tx.send(event.data);
        });
        source.on_open(move || {
            let _ = open_tx.send(());
        });

        // when
        source.start();
        let delays: Vec<Option<Duration>> = (0..7)
            .map(|_| delay_rx.recv_timeout(TIMEOUT).unwrap())
            .collect();
        source.close();

        // then
        assert_eq!(
            delays,
            vec![
                Some(ms(1)),
                Some(ms(2)),
                Some(ms(4)),
                Some(ms(8)),
                Some(ms(8)),
                // stream opened, delivered one event and ended
                Some(ms(1)),
                Some(ms(2)),
            ]
        );
        assert_eq!(open_rx.try_iter().count(), 1);
        assert_eq!(ping_rx.try_iter().collect::<Vec<_>>(), vec![1]);
        assert!(source.is_closed());
    }

    #[test]
    fn should_cancel_pending_reconnect_on_close() {
        // given
        let options = ReconnectOptions {
            initial_delay: Duration::from_secs(60),
            ..ReconnectOptions::default()
        };
        let (connector, alive) = ScriptedConnector::new(vec![Step::Fail("down".into())]);
        let source = ReconnectingTypedEventSource::new(URL, options, connector);
        let (err_tx, err_rx) = crossbeam_channel::unbounded();
        source.on_error(move |event| {
            let _ = err_tx.send(event.retry_in);
        });
        source.start();
        assert_eq!(
            err_rx.recv_timeout(TIMEOUT).unwrap(),
            Some(Duration::from_secs(60))
        );

        // when
        source.close();

        // then
        assert_eq!(
            alive.recv_timeout(TIMEOUT),
            Err(RecvTimeoutError::Disconnected)
        );
        assert!(source.is_closed());
        assert!(err_rx.try_recv().is_err());
    }

    #[test]
    fn should_not_invoke_handlers_after_close() {
        // given
        let (stream_tx, stream_rx) = crossbeam_channel::unbounded();
        let (connector, alive) = ScriptedConnector::new(vec![Step::Live(stream_rx)]);
        let source = ReconnectingTypedEventSource::new(URL, ReconnectOptions::default(), connector);
        let (got_tx, got_rx) = crossbeam_channel::unbounded();
        let (open_tx, open_rx) = crossbeam_channel::unbounded();
        source.on_raw("message", move |event| {
            let _ = got_tx.send(event.data.clone());
        });
        source.on_open(move || {
            let _ = open_tx.send(());
        });
        source.start();
        open_rx.recv_timeout(TIMEOUT).unwrap();

        // when
        source.close();
        stream_tx.send("data: late\n\n".to_string()).unwrap();

        // then the connection is shut down while the server still holds it open
        assert_eq!(
            alive.recv_timeout(TIMEOUT),
            Err(RecvTimeoutError::Disconnected)
        );
        assert!(got_rx.try_recv().is_err());
        drop(stream_tx);
    }

    #[test]
    fn should_keep_streaming_after_invalid_utf8() {
        // given
        let body = b"data: \xff\xfe\n\nevent: a\ndata: 7\n\n".to_vec();
        let (connector, _alive) = ScriptedConnector::new(vec![Step::Body(body)]);
        let source = TypedEventSource::new(URL, connector);
        let (got_tx, got_rx) = crossbeam_channel::unbounded();
        let (err_tx, err_rx) = crossbeam_channel::unbounded();
        source.on::<u32, _>("a", move |event| {
            let _ = got_tx.send(event.data);
        });
        source.on_error(move |event| {
            let _ = err_tx.send(event.message.clone());
        });

        // when
        source.start();

        // then
        assert_eq!(got_rx.recv_timeout(TIMEOUT).unwrap(), 7);
        // only the end of the body closes the source
        let message = err_rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(message, DebugFlowError::StreamEnded.to_string());
    }

    #[test]
    fn should_release_http_connection_on_close() {
        use crate::sse::transport::HttpConnector;
        use std::io::Write;
        use std::net::TcpListener;

        // given a server that sends one event and then goes quiet
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/events", listener.local_addr().unwrap());
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut head = Vec::new();
            let mut byte = [0u8; 1];
            while !head.ends_with(b"\r\n\r\n") {
                assert_eq!(socket.read(&mut byte).unwrap(), 1);
                head.push(byte[0]);
            }
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\n\
                      Content-Type: text/event-stream\r\n\
                      Transfer-Encoding: chunked\r\n\r\n\
                      9\r\ndata: 1\n\n\r\n",
                )
                .unwrap();
            socket.set_read_timeout(Some(TIMEOUT)).unwrap();
            socket.read(&mut byte)
        });

        let source = TypedEventSource::new(url, HttpConnector::new(TIMEOUT));
        let (got_tx, got_rx) = crossbeam_channel::unbounded();
        source.on::<u32, _>("message", move |event| {
            let _ = got_tx.send(event.data);
        });
        source.start();
        assert_eq!(got_rx.recv_timeout(TIMEOUT).unwrap(), 1);

        // when
        source.close();

        // then the server sees the client hang up instead of a timeout
        match server.join().unwrap() {
            Ok(read) => assert_eq!(read, 0),
            Err(err) => assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset),
        }
        assert!(source.is_closed());
    }

    #[test]
    fn should_close_when_dropped() {
        let (connector, alive) = ScriptedConnector::new(vec![Step::Fail("down".into())]);
        let source = ReconnectingTypedEventSource::connect(
            URL,
            ReconnectOptions {
                initial_delay: Duration::from_secs(60),
                ..ReconnectOptions::default()
            },
            connector,
        );
        drop(source);

        assert_eq!(
            alive.recv_timeout(TIMEOUT),
            Err(RecvTimeoutError::Disconnected)
        );
    }

    #[test]
    fn should_not_start_after_close() {
        let (connector, alive) = ScriptedConnector::new(Vec::new());
        let source = TypedEventSource::new(URL, connector);

        source.close();
        source.start();

        assert!(source.is_closed());
        assert_eq!(source.url(), URL);
        // the unstarted worker still owns the connector
        assert!(matches!(alive.try_recv(), Err(crossbeam_channel::TryRecvError::Empty)));
    }
}
