//! Incremental `text/event-stream` decoder.
//!
//! Follows the event-stream interpretation rules of the
//! [HTML Living Standard](https://html.spec.whatwg.org/multipage/server-sent-events.html#event-stream-interpretation):
//! `data`, `event`, `id` and `retry` fields, `:` comments, a leading BOM, and
//! CR, LF or CRLF line endings (which may be split across chunks).

use std::time::Duration;

use super::error::SseError;

const LF: u8 = b'\n';
const CR: u8 = b'\r';
const BOM: &[u8] = "\u{feff}".as_bytes();
const DEFAULT_EVENT: &str = "message";

/// Longest field line the decoder buffers before giving up on it.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// A fully decoded server event.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The `event:` name, `"message"` when the server did not send one
    pub event: String,
    /// `data:` lines joined with `\n`
    pub data: String,
    /// Last event id in effect when this event was dispatched
    pub id: Option<String>,
    /// Reconnection time advertised by the server with this event
    pub retry: Option<Duration>,
}

impl Frame {
    /// The event name, unless it is the default `message`.
    #[must_use]
    pub fn custom_event(&self) -> Option<&str> {
        (self.event != DEFAULT_EVENT).then_some(self.event.as_str())
    }
}

/// Stateful decoder fed with raw body chunks.
#[derive(Debug)]
pub struct EventDecoder {
    buffer: Vec<u8>,
    line_limit: usize,
    /// Discarding the rest of an oversized line
    skipping: bool,
    bom_checked: bool,
    event: Option<String>,
    data: Option<String>,
    retry: Option<Duration>,
    last_id: Option<String>,
    poisoned: bool,
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::with_line_limit(MAX_LINE_LENGTH)
    }
}

impl EventDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that rejects field lines longer than `line_limit` bytes.
    #[must_use]
    pub fn with_line_limit(line_limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            line_limit,
            skipping: false,
            bom_checked: false,
            event: None,
            data: None,
            retry: None,
            last_id: None,
            poisoned: false,
        }
    }

    /// The last event id seen on the stream; persists across events.
    #[must_use]
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    /// Decode every event completed by `chunk`.
    ///
    /// A line that is not valid UTF-8 or longer than the line limit yields an
    /// `Err` item and drops the event it belongs to; decoding continues with the
    /// next event.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<Frame, SseError>> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();

        if !self.bom_checked {
            if self.buffer.len() < BOM.len() && BOM.starts_with(&self.buffer) {
                return out;
            }
            if self.buffer.starts_with(BOM) {
                self.buffer.drain(..BOM.len());
            }
            self.bom_checked = true;
        }

        if self.skipping {
            match find_eol(&self.buffer) {
                Some((_, next)) => {
                    self.buffer.drain(..next);
                    self.skipping = false;
                }
                None => {
                    self.buffer.clear();
                    return out;
                }
            }
        }

        let mut consumed = 0;
        while let Some((line_end, next)) = find_eol(&self.buffer[consumed..]) {
            let line = self.buffer[consumed..consumed + line_end].to_vec();
            consumed += next;

            match self.process_line(&line) {
                Ok(Some(frame)) => out.push(Ok(frame)),
                Ok(None) => {}
                Err(e) => out.push(Err(e)),
            }
        }
        self.buffer.drain(..consumed);

        if self.buffer.len() > self.line_limit {
            self.buffer.clear();
            self.skipping = true;
            self.poisoned = true;
            out.push(Err(SseError::LineTooLong {
                limit: self.line_limit,
            }));
        }

        out
    }

    fn process_line(&mut self, line: &[u8]) -> Result<Option<Frame>, SseError> {
        if line.is_empty() {
            return Ok(self.dispatch());
        }
        if line.first() == Some(&b':') || self.poisoned {
            return Ok(None);
        }

        let (name, value) = match line.iter().position(|b| *b == b':') {
            Some(colon) => {
                let value = &line[colon + 1..];
                (&line[..colon], value.strip_prefix(b" ").unwrap_or(value))
            }
            None => (line, &[][..]),
        };

        let value = match std::str::from_utf8(value) {
            Ok(value) => value,
            Err(e) => {
                self.poisoned = true;
                return Err(SseError::Decode(e));
            }
        };

        match name {
            b"event" => self.event = Some(value.to_owned()),
            b"data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_owned()),
            },
            b"id" if !value.contains('\0') => {
                self.last_id = (!value.is_empty()).then(|| value.to_owned());
            }
            b"retry" if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
                if let Ok(millis) = value.parse() {
                    self.retry = Some(Duration::from_millis(millis));
                }
            }
            _ => {}
        }

        Ok(None)
    }

    fn dispatch(&mut self) -> Option<Frame> {
        let event = self.event.take();
        let data = self.data.take();
        let retry = self.retry.take();

        if std::mem::take(&mut self.poisoned) {
            return None;
        }

        Some(Frame {
            event: event
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT.to_owned()),
            data: data?,
            id: self.last_id.clone(),
            retry,
        })
    }
}

/// Returns `(line_end, next_line_start)` for the first line terminator in `bytes`,
/// or `None` when more data is needed (including a trailing CR that may be half of
/// a CRLF pair).
fn find_eol(bytes: &[u8]) -> Option<(usize, usize)> {
    let pos = bytes.iter().position(|b| *b == CR || *b == LF)?;
    if bytes[pos] == LF {
        return Some((pos, pos + 1));
    }

    match bytes.get(pos + 1) {
        None => None,
        Some(&LF) => Some((pos, pos + 2)),
        Some(_) => Some((pos, pos + 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(decoder: &mut EventDecoder, input: &[u8]) -> Vec<Frame> {
        decoder
            .feed(input)
            .into_iter()
            .map(|frame| frame.unwrap())
            .collect()
    }

    #[test]
    fn single_event_defaults_to_message() {
        let mut decoder = EventDecoder::new();
        let out = frames(&mut decoder, b"data: {\"a\":1}\n\n");

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].event, "message");
        assert_eq!(out[0].data, "{\"a\":1}");
        assert_eq!(out[0].custom_event(), None);
        assert_eq!(out[0].id, None);
    }

    #[test]
    fn multi_line_data_is_joined() {
        let mut decoder = EventDecoder::new();
        let out = frames(&mut decoder, b"data: first\ndata:second\ndata\n\n");

        assert_eq!(out[0].data, "first\nsecond\n");
    }

    #[test]
    fn custom_event_id_and_retry() {
        let mut decoder = EventDecoder::new();
        let out = frames(
            &mut decoder,
            b"event: close\nid: 7\nretry: 1500\ndata: bye\n\ndata: next\n\n",
        );

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].custom_event(), Some("close"));
        assert_eq!(out[0].id.as_deref(), Some("7"));
        assert_eq!(out[0].retry, Some(Duration::from_millis(1500)));
        // id persists, event name and retry do not
        assert_eq!(out[1].event, "message");
        assert_eq!(out[1].id.as_deref(), Some("7"));
        assert_eq!(out[1].retry, None);
        assert_eq!(decoder.last_event_id(), Some("7"));
    }

    #[test]
    fn comments_and_empty_events_are_skipped() {
        let mut decoder = EventDecoder::new();
        let out = frames(&mut decoder, b": keep-alive\n\nevent: ping\n\nunknown: x\ndata: ok\n\n");

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data, "ok");
    }

    #[test]
    fn line_endings_split_across_chunks() {
        let mut decoder = EventDecoder::new();
        assert!(frames(&mut decoder, b"data: a\r").is_empty());
        assert!(frames(&mut decoder, b"\ndata: b\r").is_empty());
        let out = frames(&mut decoder, b"\r\n");

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data, "a\nb");
    }

    #[test]
    fn bare_cr_terminates_lines() {
        let mut decoder = EventDecoder::new();
        let out = frames(&mut decoder, b"data: x\r\rdata: y\r\r\n");

        let data: Vec<_> = out.iter().map(|f| f.data.as_str()).collect();
        assert_eq!(data, ["x", "y"]);
    }

    #[test]
    fn leading_bom_is_stripped_even_when_split() {
        let mut decoder = EventDecoder::new();
        assert!(frames(&mut decoder, &BOM[..2]).is_empty());
        let mut rest = BOM[2..].to_vec();
        rest.extend_from_slice(b"data: hi\n\n");
        let out = frames(&mut decoder, &rest);

        assert_eq!(out[0].data, "hi");
    }

    #[test]
    fn invalid_utf8_drops_only_that_event() {
        let mut decoder = EventDecoder::new();
        let out = decoder.feed(b"data: \xff\xfe\n\ndata: fine\n\n");

        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Err(SseError::Decode(_))));
        assert_eq!(out[1].as_ref().unwrap().data, "fine");
    }

    #[test]
    fn id_with_null_is_ignored_and_empty_id_resets() {
        let mut decoder = EventDecoder::new();
        frames(&mut decoder, b"id: 1\ndata: a\n\n");
        frames(&mut decoder, b"id: 2\0\ndata: b\n\n");
        assert_eq!(decoder.last_event_id(), Some("1"));

        let out = frames(&mut decoder, b"id\ndata: c\n\n");
        assert_eq!(out[0].id, None);
    }

    #[test]
    fn non_numeric_retry_is_ignored() {
        let mut decoder = EventDecoder::new();
        let out = frames(&mut decoder, b"retry: soon\ndata: a\n\n");

        assert_eq!(out[0].retry, None);
    }

    #[test]
    fn oversized_line_is_rejected_and_event_dropped() {
        let mut decoder = EventDecoder::with_line_limit(16);

        let out = decoder.feed(b"event: big\ndata: 0123456789abcdefghij");
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Err(SseError::LineTooLong { limit: 16 })));

        assert!(decoder.feed(b"klmnop and more").is_empty());

        let out = frames(&mut decoder, b"\n\ndata: next\n\n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data, "next");
        assert_eq!(out[0].event, "message");
    }

    #[test]
    fn long_line_under_the_limit_is_kept() {
        let mut decoder = EventDecoder::with_line_limit(16);

        assert!(decoder.feed(b"data: 0123").is_empty());
        let out = frames(&mut decoder, b"4567\n\n");
        assert_eq!(out[0].data, "01234567");
    }
}
