use std::time::Duration;

/// One dispatched server-sent event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, or "message" when absent.
    pub name: String,
    /// Concatenated `data:` lines, newline-joined.
    pub data: String,
    pub id: Option<String>,
}

/// Incremental decoder for a `text/event-stream` body.
///
/// Feed raw chunks as they arrive; completed events come back in order.
/// Partial lines and events split across chunk boundaries are buffered
/// until their terminator shows up. Lines may end in LF, CR, or CRLF.
#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// A chunk ended exactly on a CR; a leading LF in the next chunk
    /// belongs to that terminator.
    pending_cr: bool,
    event_name: String,
    data: String,
    id: Option<String>,
    retry: Option<Duration>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent `retry:` reconnection directive, if the server sent
    /// one since the last call.
    pub fn take_retry(&mut self) -> Option<Duration> {
        self.retry.take()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();

        for &byte in chunk {
            if self.pending_cr {
                self.pending_cr = false;
                if byte == b'\n' {
                    continue; // the LF of a CRLF pair
                }
            }
            match byte {
                b'\n' => self.line(&mut events),
                b'\r' => {
                    self.pending_cr = true;
                    self.line(&mut events);
                }
                _ => self.buffer.push(byte),
            }
        }

        events
    }

    fn line(&mut self, events: &mut Vec<SseEvent>) {
        let line = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();

        if line.is_empty() {
            self.dispatch(events);
            return;
        }
        if line.starts_with(':') {
            return; // comment / keep-alive
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_str(), ""),
        };

        match field {
            "event" => self.event_name = value.to_string(),
            "data" => {
                if !self.data.is_empty() {
                    self.data.push('\n');
                }
                self.data.push_str(value);
            }
            "id" => self.id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(Duration::from_millis(ms));
                }
            }
            _ => {} // unknown fields are ignored
        }
    }

    /// A blank line dispatches the accumulated event. Events with no data
    /// are dropped, per the event-stream processing model.
    fn dispatch(&mut self, events: &mut Vec<SseEvent>) {
        let name = std::mem::take(&mut self.event_name);
        let data = std::mem::take(&mut self.data);
        if data.is_empty() {
            return;
        }
        events.push(SseEvent {
            name: if name.is_empty() {
                "message".to_string()
            } else {
                name
            },
            data,
            id: self.id.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(chunks: &[&str]) -> (Vec<SseEvent>, SseDecoder) {
        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(decoder.decode(chunk.as_bytes()));
        }
        (events, decoder)
    }

    #[test]
    fn parses_a_simple_event() {
        let (events, _) = decode_all(&["event: put\ndata: {\"a\":1}\n\n"]);
        assert_eq!(
            events,
            vec![SseEvent {
                name: "put".into(),
                data: "{\"a\":1}".into(),
                id: None,
            }]
        );
    }

    #[test]
    fn defaults_the_event_name_to_message() {
        let (events, _) = decode_all(&["data: hello\n\n"]);
        assert_eq!(events[0].name, "message");
    }

    #[test]
    fn events_split_across_chunks_reassemble() {
        let (events, _) = decode_all(&["event: pa", "tch\nda", "ta: {\"path\":", "\"/flags/f\"}\n", "\n"]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "patch");
        assert_eq!(events[0].data, "{\"path\":\"/flags/f\"}");
    }

    #[test]
    fn multi_line_data_joins_with_newlines() {
        let (events, _) = decode_all(&["data: line one\ndata: line two\n\n"]);
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn handles_cr_crlf_and_lf_terminators() {
        let (events, _) = decode_all(&["event: put\r\ndata: x\r\r\n"]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "put");
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn crlf_split_between_chunks_is_one_terminator() {
        let (events, _) = decode_all(&["data: x\r", "\n\n"]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn comments_and_unknown_fields_are_ignored() {
        let (events, _) = decode_all(&[": keep-alive\nwhatever: 1\ndata: x\n\n"]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn events_without_data_are_dropped() {
        let (events, _) = decode_all(&["event: ping\n\n", "data: real\n\n"]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "real");
    }

    #[test]
    fn value_may_omit_the_space_after_the_colon() {
        let (events, _) = decode_all(&["data:tight\n\n"]);
        assert_eq!(events[0].data, "tight");
    }

    #[test]
    fn retry_directive_is_surfaced() {
        let (_, mut decoder) = decode_all(&["retry: 2500\ndata: x\n\n"]);
        assert_eq!(decoder.take_retry(), Some(Duration::from_millis(2500)));
        assert_eq!(decoder.take_retry(), None);

        // Malformed retry values are ignored.
        let (_, mut decoder) = decode_all(&["retry: soon\ndata: x\n\n"]);
        assert_eq!(decoder.take_retry(), None);
    }

    #[test]
    fn id_field_is_carried_on_events() {
        let (events, _) = decode_all(&["id: 42\ndata: x\n\n"]);
        assert_eq!(events[0].id.as_deref(), Some("42"));
    }
}
