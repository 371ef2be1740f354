//! Report sinks: where step messages and run events go.

#![allow(missing_docs)]

use crate::logger::events::ProbeEvent;
use crate::logger::jsonl::{EventType, JsonlWriter, LogEntry, Severity};

/// Destination for step narration and structured run events.
pub trait ReportSink {
    /// Announce the start of a named step.
    fn step(&mut self, message: &str);

    /// Record a structured event.
    fn record(&mut self, event: &ProbeEvent);
}

impl ReportSink for JsonlWriter {
    fn step(&mut self, message: &str) {
        let mut entry = LogEntry::new(EventType::Step, Severity::Info);
        entry.details = Some(message.to_string());
        self.write_entry(&entry);
    }

    fn record(&mut self, event: &ProbeEvent) {
        self.write_entry(&event.to_log_entry());
    }
}

/// Keeps everything in memory. Used by tests and by the CLI summary.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub steps: Vec<String>,
    pub events: Vec<ProbeEvent>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReportSink for MemorySink {
    fn step(&mut self, message: &str) {
        self.steps.push(message.to_string());
    }

    fn record(&mut self, event: &ProbeEvent) {
        self.events.push(event.clone());
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ReportSink for NullSink {
    fn step(&mut self, _message: &str) {}

    fn record(&mut self, _event: &ProbeEvent) {}
}

/// Fans out to several sinks in order.
#[derive(Default)]
pub struct TeeSink<'a> {
    sinks: Vec<&'a mut dyn ReportSink>,
}

impl<'a> TeeSink<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    #[must_use]
    pub fn with(mut self, sink: &'a mut dyn ReportSink) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ReportSink for TeeSink<'_> {
    fn step(&mut self, message: &str) {
        for sink in &mut self.sinks {
            sink.step(message);
        }
    }

    fn record(&mut self, event: &ProbeEvent) {
        for sink in &mut self.sinks {
            sink.record(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::jsonl::JsonlConfig;
    use std::path::PathBuf;

    fn sample_event() -> ProbeEvent {
        ProbeEvent::ProbeStarted {
            path: PathBuf::from("/mnt/dfuse/file.txt"),
            chunk_size: 131_072,
        }
    }

    #[test]
    fn tee_forwards_to_every_sink() {
        let mut a = MemorySink::new();
        let mut b = MemorySink::new();
        {
            let mut tee = TeeSink::new().with(&mut a).with(&mut b);
            tee.step("Starting dfuse");
            tee.record(&sample_event());
        }
        for sink in [&a, &b] {
            assert_eq!(sink.steps, vec!["Starting dfuse".to_string()]);
            assert_eq!(sink.events, vec![sample_event()]);
        }
    }

    #[test]
    fn jsonl_sink_writes_steps_and_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        let mut writer = JsonlWriter::open(JsonlConfig {
            path: path.clone(),
            fallback_path: None,
            max_size_bytes: 1024 * 1024,
            max_rotated_files: 2,
        });

        writer.step("Write to file until an error occurs");
        writer.record(&sample_event());

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "step");
        assert_eq!(lines[0]["details"], "Write to file until an error occurs");
        assert_eq!(lines[1]["event"], "probe_start");
        assert_eq!(lines[1]["chunk_size"], 131_072);
    }
}
