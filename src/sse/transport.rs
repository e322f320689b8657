//! Opening the byte stream behind an event source.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ureq::unversioned::resolver::DefaultResolver;
use ureq::unversioned::transport::{
    self as http_transport, Buffers, ConnectionDetails, LazyBuffers, NextTimeout,
    RustlsConnector, Transport,
};
use ureq::{Agent, Timeout};

use crate::error::{DebugFlowError, Result};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type ShutdownHook = Box<dyn FnOnce() + Send>;

/// One open stream plus a way to tear it down from another thread.
pub struct Connection {
    reader: Box<dyn Read + Send>,
    shutdown: Option<ShutdownHook>,
}

impl Connection {
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            shutdown: None,
        }
    }

    /// `shutdown` must make a blocked read on the reader return.
    pub fn with_shutdown(mut self, shutdown: impl FnOnce() + Send + 'static) -> Self {
        self.shutdown = Some(Box::new(shutdown));
        self
    }

    pub(crate) fn into_parts(self) -> (Box<dyn Read + Send>, Option<ShutdownHook>) {
        (self.reader, self.shutdown)
    }
}

/// Opens one physical connection to an event stream.
///
/// Called again for every reconnect attempt.
pub trait Connector: Send + 'static {
    fn connect(&mut self, url: &str) -> Result<Connection>;
}

/// The socket of the connection currently being opened.
type SocketSlot = Arc<Mutex<Option<TcpStream>>>;

/// HTTP(S) transport. Only the connect phase is bounded by a timeout, the
/// body is read for as long as the server keeps it open.
///
/// Connections are opened directly (no proxy) and never pooled, so each
/// stream owns its socket and can be shut down on close.
pub struct HttpConnector {
    agent: Agent,
    socket: SocketSlot,
}

impl HttpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        let config = Agent::config_builder()
            .timeout_connect(Some(connect_timeout))
            .max_idle_connections(0)
            .proxy(None)
            .build();
        let socket = SocketSlot::default();
        let connector = http_transport::Connector::chain(
            SocketConnector {
                connect_timeout,
                socket: Arc::clone(&socket),
            },
            RustlsConnector::default(),
        );

        Self {
            agent: Agent::with_parts(config, connector, DefaultResolver::default()),
            socket,
        }
    }
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl Connector for HttpConnector {
    fn connect(&mut self, url: &str) -> Result<Connection> {
        take_socket(&self.socket);
        let response = self
            .agent
            .get(url)
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .call()?;

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !is_event_stream(content_type) {
            return Err(DebugFlowError::Http(format!(
                "Unexpected content type {content_type:?} from {url}"
            )));
        }

        let connection = Connection::new(response.into_body().into_reader());
        Ok(match take_socket(&self.socket) {
            Some(socket) => connection.with_shutdown(move || {
                if let Err(err) = socket.shutdown(Shutdown::Both) {
                    log::debug!("Failed to shut down event stream socket: {err}");
                }
            }),
            None => connection,
        })
    }
}

fn take_socket(slot: &SocketSlot) -> Option<TcpStream> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Plain TCP connect that keeps a handle on the socket for [`HttpConnector`].
#[derive(Debug)]
struct SocketConnector {
    connect_timeout: Duration,
    socket: SocketSlot,
}

impl http_transport::Connector<()> for SocketConnector {
    type Out = SocketTransport;

    fn connect(
        &self,
        details: &ConnectionDetails,
        _chained: Option<()>,
    ) -> std::result::Result<Option<SocketTransport>, ureq::Error> {
        let mut last_err = None;
        for addr in &details.addrs {
            let attempt = if self.connect_timeout.is_zero() {
                TcpStream::connect(addr)
            } else {
                TcpStream::connect_timeout(addr, self.connect_timeout)
            };
            let stream = match attempt {
                Ok(stream) => stream,
                Err(err) => {
                    log::debug!("Connecting to {addr} failed: {err}");
                    last_err = Some(err);
                    continue;
                }
            };

            stream.set_nodelay(details.config.no_delay())?;
            let handle = stream.try_clone()?;
            *self.socket.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

            let buffers = LazyBuffers::new(
                details.config.input_buffer_size(),
                details.config.output_buffer_size(),
            );
            return Ok(Some(SocketTransport {
                stream,
                buffers,
                read_timeout: None,
                write_timeout: None,
            }));
        }

        Err(ureq::Error::Io(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "no address to connect to")
        })))
    }
}

#[derive(Debug)]
struct SocketTransport {
    stream: TcpStream,
    buffers: LazyBuffers,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

/// Applies `timeout` to the socket only when it differs from the last one set.
fn update_timeout(
    timeout: &NextTimeout,
    current: &mut Option<Duration>,
    apply: impl FnOnce(Option<Duration>) -> io::Result<()>,
) -> io::Result<()> {
    let next = timeout.not_zero().map(|after| *after);
    if next != *current {
        apply(next)?;
        *current = next;
    }
    Ok(())
}

fn map_timeout(err: io::Error, reason: Timeout) -> ureq::Error {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ureq::Error::Timeout(reason),
        _ => ureq::Error::Io(err),
    }
}

impl Transport for SocketTransport {
    fn buffers(&mut self) -> &mut dyn Buffers {
        &mut self.buffers
    }

    fn transmit_output(
        &mut self,
        amount: usize,
        timeout: NextTimeout,
    ) -> std::result::Result<(), ureq::Error> {
        let stream = &self.stream;
        update_timeout(&timeout, &mut self.write_timeout, |t| {
            stream.set_write_timeout(t)
        })?;
        let output = &self.buffers.output()[..amount];
        (&self.stream)
            .write_all(output)
            .map_err(|err| map_timeout(err, timeout.reason))
    }

    fn await_input(&mut self, timeout: NextTimeout) -> std::result::Result<bool, ureq::Error> {
        let stream = &self.stream;
        update_timeout(&timeout, &mut self.read_timeout, |t| {
            stream.set_read_timeout(t)
        })?;
        let input = self.buffers.input_append_buf();
        let amount = (&self.stream)
            .read(input)
            .map_err(|err| map_timeout(err, timeout.reason))?;
        self.buffers.input_appended(amount);
        Ok(amount > 0)
    }

    fn is_open(&mut self) -> bool {
        // Only consulted by the connection pool, which is disabled.
        self.stream.peer_addr().is_ok()
    }
}

fn is_event_stream(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("text/event-stream"))
}
