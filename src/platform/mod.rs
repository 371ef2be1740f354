//! Platform abstraction: the filesystem interface the probe runs against.

pub mod fs;
