use bytes::Bytes;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn data_only(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }

    /// Serialize back to the wire frame, trailing blank line included.
    pub fn encode(&self) -> Bytes {
        let mut out = String::with_capacity(self.data.len() + 32);
        if let Some(event) = &self.event {
            out.push_str("event: ");
            out.push_str(event);
            out.push('\n');
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        Bytes::from(out)
    }
}

/// Incremental SSE frame parser. Feed raw chunks; complete events come out
/// as soon as their terminating blank line arrives.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        match std::str::from_utf8(chunk) {
            Ok(text) => self.push_str(text),
            Err(_) => Vec::new(),
        }
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let mut line = self.buffer[..pos].to_string();
            self.buffer.drain(..=pos);

            if line.ends_with('\r') {
                line.pop();
            }

            if line.is_empty() {
                self.finish_event(&mut events);
                continue;
            }

            if line.starts_with(':') {
                continue;
            }

            if let Some(value) = line.strip_prefix("event:") {
                let value = value.trim_start();
                self.event = (!value.is_empty()).then(|| value.to_string());
                continue;
            }

            if let Some(value) = line.strip_prefix("data:") {
                self.data_lines.push(value.trim_start().to_string());
            } else if line == "data" {
                self.data_lines.push(String::new());
            }
        }

        events
    }

    /// Flush whatever is buffered at end of stream.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            let line = line.trim_end_matches('\r');
            if let Some(value) = line.strip_prefix("event:") {
                let value = value.trim_start();
                self.event = (!value.is_empty()).then(|| value.to_string());
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data_lines.push(value.trim_start().to_string());
            }
        }
        self.finish_event(&mut events);
        events
    }

    fn finish_event(&mut self, events: &mut Vec<SseEvent>) {
        if self.event.is_none() && self.data_lines.is_empty() {
            return;
        }
        events.push(SseEvent {
            event: self.event.take(),
            data: self.data_lines.join("\n"),
        });
        self.data_lines.clear();
    }
}

/// Incremental parser for Gemini's streaming shape: a JSON array of
/// response objects delivered chunk by chunk (`[{...},\n{...}]`).
#[derive(Debug, Default)]
pub struct JsonArrayStreamParser {
    buffer: String,
    depth: i32,
    in_string: bool,
    escaped: bool,
    object_start: Option<usize>,
}

impl JsonArrayStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<String> {
        match std::str::from_utf8(chunk) {
            Ok(text) => self.push_str(text),
            Err(_) => Vec::new(),
        }
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut objects = Vec::new();
        let bytes: Vec<char> = self.buffer.chars().collect();
        let mut consumed = 0usize;

        let mut i = 0usize;
        while i < bytes.len() {
            let ch = bytes[i];
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if ch == '\\' {
                    self.escaped = true;
                } else if ch == '"' {
                    self.in_string = false;
                }
            } else {
                match ch {
                    '"' => self.in_string = true,
                    '{' => {
                        if self.depth == 0 {
                            self.object_start = Some(i);
                        }
                        self.depth += 1;
                    }
                    '}' => {
                        self.depth -= 1;
                        if self.depth == 0
                            && let Some(start) = self.object_start.take()
                        {
                            objects.push(bytes[start..=i].iter().collect());
                            consumed = i + 1;
                        }
                    }
                    _ => {}
                }
            }
            i += 1;
        }

        if consumed > 0 {
            self.buffer = bytes[consumed..].iter().collect();
            if let Some(start) = self.object_start.as_mut() {
                *start -= consumed;
            }
        }
        objects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_named_event_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("event: message_start\nda").is_empty());
        let events = parser.push_str("ta: {\"a\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message_start"));
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[test]
    fn comments_and_heartbeats_skipped() {
        let mut parser = SseParser::new();
        let events = parser.push_str(": keep-alive\n\ndata: x\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn encode_round_trips() {
        let event = SseEvent::named("content_block_delta", "{\"d\":1}");
        let wire = event.encode();
        let mut parser = SseParser::new();
        let parsed = parser.push_bytes(&wire);
        assert_eq!(parsed, vec![event]);
    }

    #[test]
    fn json_array_stream_frames() {
        let mut parser = JsonArrayStreamParser::new();
        let mut frames = parser.push_str("[{\"x\": \"a}b\"},\n");
        frames.extend(parser.push_str("{\"y\":2}]"));
        assert_eq!(frames, vec!["{\"x\": \"a}b\"}".to_string(), "{\"y\":2}".to_string()]);
    }
}
