//! Explicit reporting context handed to the probe and the verifier.

use crate::logger::events::ProbeEvent;
use crate::logger::sink::ReportSink;

/// Step narration plus event sink. Nothing else is reachable from the probe.
pub struct ProbeContext<'a> {
    sink: &'a mut dyn ReportSink,
}

impl<'a> ProbeContext<'a> {
    /// Wrap a sink.
    pub fn new(sink: &'a mut dyn ReportSink) -> Self {
        Self { sink }
    }

    /// Announce a named step of the run.
    pub fn log_step(&mut self, message: &str) {
        self.sink.step(message);
    }

    /// Record a structured event.
    pub fn report(&mut self, event: &ProbeEvent) {
        self.sink.record(event);
    }
}
