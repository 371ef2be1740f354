//! Run logging: typed events, report sinks, and the JSONL activity log.

pub mod events;
pub mod jsonl;
pub mod sink;
