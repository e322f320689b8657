//! In-memory connectors for exercising event sources without a network.

use std::collections::VecDeque;
use std::io::{self, Cursor, Read};

use crossbeam_channel::{Receiver, Sender};

use super::transport::{Connection, Connector};
use crate::error::{DebugFlowError, Result};

pub enum Step {
    /// The connection attempt fails
    Fail(String),
    /// The server sends these bytes and closes the stream
    Body(Vec<u8>),
    /// The server streams whatever arrives on the channel until it is
    /// dropped or the connection is shut down
    Live(Receiver<String>),
}

/// Plays back one [`Step`] per connection attempt, then keeps failing.
pub struct ScriptedConnector {
    steps: VecDeque<Step>,
    _alive: Sender<()>,
}

impl ScriptedConnector {
    /// The receiver disconnects once the connector (and so the worker owning
    /// it) is gone.
    pub fn new(steps: Vec<Step>) -> (Self, Receiver<()>) {
        let (alive_tx, alive_rx) = crossbeam_channel::bounded(0);
        (
            Self {
                steps: steps.into(),
                _alive: alive_tx,
            },
            alive_rx,
        )
    }
}

impl Connector for ScriptedConnector {
    fn connect(&mut self, _url: &str) -> Result<Connection> {
        match self.steps.pop_front() {
            Some(Step::Fail(message)) => Err(DebugFlowError::Http(message)),
            Some(Step::Body(body)) => Ok(Connection::new(Cursor::new(body))),
            Some(Step::Live(chunks)) => {
                let (abort_tx, abort_rx) = crossbeam_channel::bounded(1);
                let reader = ChannelReader {
                    chunks,
                    abort: abort_rx,
                    current: Cursor::new(Vec::new()),
                };
                Ok(Connection::new(reader).with_shutdown(move || {
                    let _ = abort_tx.try_send(());
                }))
            }
            None => Err(DebugFlowError::Http("no more scripted connections".into())),
        }
    }
}

struct ChannelReader {
    chunks: Receiver<String>,
    abort: Receiver<()>,
    current: Cursor<Vec<u8>>,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.current.read(buf)?;
            if n > 0 || buf.is_empty() {
                return Ok(n);
            }
            crossbeam_channel::select! {
                recv(self.abort) -> _ => return Ok(0),
                recv(self.chunks) -> chunk => match chunk {
                    Ok(chunk) => self.current = Cursor::new(chunk.into_bytes()),
                    Err(_) => return Ok(0),
                },
            }
        }
    }
}
