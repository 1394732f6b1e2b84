//! Streaming chat-completion parser
//!
//! Providers stream newline-delimited `data: {json}` lines terminated by
//! `data: [DONE]`. Chunks from the network may split a line, or a UTF-8
//! sequence, anywhere, so bytes are buffered until a full line is present.

use super::types::ChatCompletionChunk;

/// Parsed streaming event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Text to append to the reply
    Delta(String),
    /// End-of-stream marker
    Done,
}

/// Incremental line parser for streamed completions
#[derive(Debug, Default)]
pub struct SseLineParser {
    buffer: Vec<u8>,
    done: bool,
}

impl SseLineParser {
    /// Create an empty parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `data: [DONE]` has been seen
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed a chunk of bytes, returning the events it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a final unterminated line
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.buffer);
        self.process_line(&line).into_iter().collect()
    }

    fn process_line(&mut self, raw: &[u8]) -> Option<StreamEvent> {
        if self.done {
            return None;
        }
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();

        // Blank separators, comments and non-data fields carry no text.
        let data = line.strip_prefix("data:")?.trim();
        if data == "[DONE]" {
            self.done = true;
            return Some(StreamEvent::Done);
        }

        match serde_json::from_str::<ChatCompletionChunk>(data) {
            Ok(chunk) => chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .filter(|c| !c.is_empty())
                .map(StreamEvent::Delta),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unparsable stream line");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(text: &str) -> String {
        format!(
            "data: {{\"choices\":[{{\"delta\":{{\"content\":\"{}\"}}}}]}}\n",
            text
        )
    }

    #[test]
    fn test_parses_deltas_and_done() {
        let mut parser = SseLineParser::new();
        let body = format!("{}\n{}\ndata: [DONE]\n", delta("Hel"), delta("lo"));
        let events = parser.push(body.as_bytes());
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("Hel".to_string()),
                StreamEvent::Delta("lo".to_string()),
                StreamEvent::Done,
            ]
        );
        assert!(parser.is_done());
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut parser = SseLineParser::new();
        let line = delta("split");
        let (a, b) = line.as_bytes().split_at(10);
        assert!(parser.push(a).is_empty());
        assert_eq!(
            parser.push(b),
            vec![StreamEvent::Delta("split".to_string())]
        );
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let mut parser = SseLineParser::new();
        let line = delta("你好");
        let bytes = line.as_bytes();
        let cut = line.find('你').unwrap() + 1;
        assert!(parser.push(&bytes[..cut]).is_empty());
        assert_eq!(
            parser.push(&bytes[cut..]),
            vec![StreamEvent::Delta("你好".to_string())]
        );
    }

    #[test]
    fn test_ignores_noise() {
        let mut parser = SseLineParser::new();
        let body = ": keep-alive\nevent: message\ndata: not json\n\ndata: {\"choices\":[{\"delta\":{}}]}\n";
        assert!(parser.push(body.as_bytes()).is_empty());
    }

    #[test]
    fn test_nothing_after_done() {
        let mut parser = SseLineParser::new();
        let body = format!("data: [DONE]\n{}", delta("late"));
        assert_eq!(parser.push(body.as_bytes()), vec![StreamEvent::Done]);
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut parser = SseLineParser::new();
        assert!(parser.push(b"data: [DONE]").is_empty());
        assert_eq!(parser.finish(), vec![StreamEvent::Done]);
        assert!(parser.finish().is_empty());
    }
}
