//! # Worker Output Mirroring
//!
//! While a worker runs, every chunk it writes is also handed to an
//! [`OutputSink`] for live observability. The sink is injected into the
//! supervisor, so a deployment can send it to the log, drop it, or (in tests)
//! record it.

#[cfg(test)]
use std::sync::Mutex;

/// Which pipe a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// Receives worker output as it is drained.
///
/// Called from the drain tasks, so implementations must not block for long.
pub trait OutputSink: Send + Sync {
    fn forward(&self, stream: OutputStream, chunk: &str);
}

/// Mirrors worker output into the `worker` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn forward(&self, stream: OutputStream, chunk: &str) {
        for line in chunk.lines().filter(|line| !line.trim().is_empty()) {
            match stream {
                OutputStream::Stdout => tracing::info!(target: "worker", stream = stream.as_str(), "{}", line),
                OutputStream::Stderr => tracing::warn!(target: "worker", stream = stream.as_str(), "{}", line),
            }
        }
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn forward(&self, _stream: OutputStream, _chunk: &str) {}
}

/// A line with no newline yet is flushed anyway once it grows past this.
const MAX_PENDING_LINE: usize = 64 * 1024;

/// Reassembles raw pipe reads into whole lines before they reach a sink.
///
/// Reads can end in the middle of a line or of a multi-byte character; only
/// complete lines are released, so the mirrored log never shows split or
/// garbled text.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chunk and return every line it completed, newlines included.
    pub fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(bytes);

        // '\n' never occurs inside a multi-byte UTF-8 sequence.
        let cut = match self.pending.iter().rposition(|&b| b == b'\n') {
            Some(newline) => newline + 1,
            None if self.pending.len() > MAX_PENDING_LINE => {
                match std::str::from_utf8(&self.pending) {
                    Ok(_) => self.pending.len(),
                    Err(e) => e.valid_up_to(),
                }
            }
            None => return None,
        };
        if cut == 0 {
            return None;
        }

        let ready: Vec<u8> = self.pending.drain(..cut).collect();
        Some(String::from_utf8_lossy(&ready).into_owned())
    }

    /// Release whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Keeps every chunk in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSink {
    chunks: Mutex<Vec<(OutputStream, String)>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenated output seen on one stream.
    pub fn collected(&self, stream: OutputStream) -> String {
        let chunks = self.chunks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        chunks
            .iter()
            .filter(|(s, _)| *s == stream)
            .map(|(_, chunk)| chunk.as_str())
            .collect()
    }

    /// Each forwarded chunk on one stream, in order.
    pub fn lines(&self, stream: OutputStream) -> Vec<String> {
        let chunks = self.chunks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        chunks
            .iter()
            .filter(|(s, _)| *s == stream)
            .map(|(_, chunk)| chunk.clone())
            .collect()
    }
}

#[cfg(test)]
impl OutputSink for RecordingSink {
    fn forward(&self, stream: OutputStream, chunk: &str) {
        let mut chunks = self.chunks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        chunks.push((stream, chunk.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_separates_streams() {
        let sink = RecordingSink::new();
        sink.forward(OutputStream::Stdout, "hello ");
        sink.forward(OutputStream::Stderr, "warning");
        sink.forward(OutputStream::Stdout, "world");

        assert_eq!(sink.collected(OutputStream::Stdout), "hello world");
        assert_eq!(sink.collected(OutputStream::Stderr), "warning");
    }

    #[test]
    fn test_line_buffer_joins_lines_split_across_reads() {
        let mut buffer = LineBuffer::new();
        assert_eq!(buffer.push(b"Detected lang"), None);
        assert_eq!(buffer.push(b"uage: en\n[00:00"), Some("Detected language: en\n".to_string()));
        assert_eq!(buffer.push(b".000 --> 00:02.000] hi\n"), Some("[00:00.000 --> 00:02.000] hi\n".to_string()));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_line_buffer_keeps_multibyte_characters_whole() {
        let text = "[00:00.000] Grüße, 世界\n";
        let bytes = text.as_bytes();
        // Split inside the three-byte encoding of '世'.
        let split = text.find('世').unwrap() + 1;

        let mut buffer = LineBuffer::new();
        assert_eq!(buffer.push(&bytes[..split]), None);
        assert_eq!(buffer.push(&bytes[split..]), Some(text.to_string()));
    }

    #[test]
    fn test_line_buffer_flushes_unterminated_tail() {
        let mut buffer = LineBuffer::new();
        assert_eq!(buffer.push(b"100%|"), None);
        assert_eq!(buffer.finish(), Some("100%|".to_string()));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_line_buffer_bounds_long_lines() {
        let mut buffer = LineBuffer::new();
        let mut long = vec![b'a'; MAX_PENDING_LINE];
        long.extend_from_slice("é".as_bytes());
        // Drop the last byte so the chunk ends mid-character.
        long.pop();

        let flushed = buffer.push(&long).unwrap();
        assert_eq!(flushed.len(), MAX_PENDING_LINE);
        assert!(!flushed.contains('\u{FFFD}'));
        assert_eq!(buffer.push(&"é".as_bytes()[1..]), None);
        assert_eq!(buffer.finish(), Some("é".to_string()));
    }

    #[test]
    fn test_stream_names() {
        assert_eq!(OutputStream::Stdout.as_str(), "stdout");
        assert_eq!(OutputStream::Stderr.as_str(), "stderr");
    }
}
