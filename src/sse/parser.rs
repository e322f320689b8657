use std::borrow::Cow;
use std::time::Duration;

pub const DEFAULT_EVENT_TYPE: &str = "message";

/// A dispatched server-sent event with its raw (unparsed) payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event_type: String,
    pub data: String,
    /// Last event id seen on the stream at dispatch time
    pub id: Option<String>,
}

/// Incremental `text/event-stream` parser.
///
/// Feed it whole lines with [`EventParser::feed_line`] or raw bytes with
/// [`EventParser::feed`]; an event is produced on every blank line that
/// follows at least one `data` field. Lines end in `\n`, `\r\n` or a bare
/// `\r`. Invalid UTF-8 is replaced rather than rejected.
#[derive(Debug, Default)]
pub struct EventParser {
    pending: Vec<u8>,
    /// The previous chunk ended in `\r`, so a leading `\n` belongs to it
    after_cr: bool,
    event_type: String,
    data: String,
    last_event_id: Option<String>,
    retry: Option<Duration>,
}

impl EventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconnection time most recently announced by the server.
    pub fn retry(&self) -> Option<Duration> {
        self.retry
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Consume a chunk of the byte stream that may end in the middle of a
    /// line.
    pub fn feed(&mut self, chunk: impl AsRef<[u8]>) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for &byte in chunk.as_ref() {
            if std::mem::take(&mut self.after_cr) && byte == b'\n' {
                continue;
            }
            if byte != b'\n' && byte != b'\r' {
                self.pending.push(byte);
                continue;
            }

            self.after_cr = byte == b'\r';
            let raw = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&raw);
            if let Cow::Owned(_) = line {
                log::warn!("Replaced invalid UTF-8 in event stream line");
            }
            if let Some(event) = self.feed_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Consume one line, with or without its `\n`, `\r\n` or `\r` terminator.
    pub fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = line
            .strip_suffix("\r\n")
            .or_else(|| line.strip_suffix('\n'))
            .or_else(|| line.strip_suffix('\r'))
            .unwrap_or(line);

        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event_type = value.to_string(),
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            "id" => {
                if !value.contains('\0') {
                    self.last_event_id = (!value.is_empty()).then(|| value.to_string());
                }
            }
            "retry" => {
                if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                    self.retry = value.parse().ok().map(Duration::from_millis);
                }
            }
            other => log::trace!("Ignoring unknown event stream field {other:?}"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event_type = std::mem::take(&mut self.event_type);
        let mut data = std::mem::take(&mut self.data);
        if data.is_empty() {
            return None;
        }
        if data.ends_with('\n') {
            data.pop();
        }

        Some(SseEvent {
            event_type: if event_type.is_empty() {
                DEFAULT_EVENT_TYPE.to_string()
            } else {
                event_type
            },
            data,
            id: self.last_event_id.clone(),
        })
    }
}
