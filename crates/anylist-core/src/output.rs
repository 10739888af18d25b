//! Bounded buffer over the supervised server's captured output. The pump
//! tasks push every line here, tagged with the pipe it arrived on, so recent
//! child output stays inspectable even after the process exits.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which of the child's pipes a line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputLine {
    pub seq: u64,
    pub stream: OutputStream,
    pub at: DateTime<Utc>,
    pub text: String,
}

#[derive(Debug)]
pub struct OutputRingBuffer {
    max_lines: usize,
    seq: AtomicU64,
    dropped_total: AtomicU64,
    lines: RwLock<VecDeque<OutputLine>>,
}

impl OutputRingBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            max_lines,
            seq: AtomicU64::new(0),
            dropped_total: AtomicU64::new(0),
            lines: RwLock::new(VecDeque::new()),
        }
    }

    /// Lines evicted to stay within the capacity.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    pub fn push(&self, stream: OutputStream, text: String) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let line = OutputLine {
            seq,
            stream,
            at: Utc::now(),
            text,
        };
        let mut guard = self.lines.write().unwrap();
        guard.push_back(line);
        while guard.len() > self.max_lines {
            guard.pop_front();
            self.dropped_total.fetch_add(1, Ordering::Relaxed);
        }
        seq
    }

    /// The most recent `last_n` lines, oldest first.
    pub fn snapshot(&self, last_n: usize) -> Vec<OutputLine> {
        let guard = self.lines.read().unwrap();
        let start = guard.len().saturating_sub(last_n);
        guard.iter().skip(start).cloned().collect()
    }

    /// The most recent `last_n` lines flattened for a crash report, with
    /// stderr lines tagged so interleaved pipes stay distinguishable.
    pub fn tail(&self, last_n: usize) -> String {
        self.snapshot(last_n)
            .into_iter()
            .map(|line| match line.stream {
                OutputStream::Stdout => line.text,
                OutputStream::Stderr => format!("[stderr] {}", line.text),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_and_counts_drops() {
        let buf = OutputRingBuffer::new(2);
        buf.push(OutputStream::Stdout, "starting".into());
        buf.push(OutputStream::Stdout, "listening".into());
        buf.push(OutputStream::Stderr, "warning: slow disk".into());

        let snap = buf.snapshot(10);
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].text, "listening");
        assert_eq!(snap[1].stream, OutputStream::Stderr);
        assert_eq!(buf.dropped_total(), 1);
    }

    #[test]
    fn tail_tags_stderr_lines() {
        let buf = OutputRingBuffer::new(10);
        buf.push(OutputStream::Stdout, "listening on 28597".into());
        buf.push(OutputStream::Stderr, "login failed".into());

        assert_eq!(buf.tail(10), "listening on 28597\n[stderr] login failed");
    }

    #[test]
    fn snapshot_limits_to_requested_count() {
        let buf = OutputRingBuffer::new(10);
        for i in 0..5 {
            buf.push(OutputStream::Stdout, format!("line {i}"));
        }
        let snap = buf.snapshot(2);
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].text, "line 3");
        assert_eq!(snap[1].seq, 5);
    }
}
