#![forbid(unsafe_code)]

//! ENOSPC probe: checks that a POSIX mount over a storage container reports
//! "no space left on device" cleanly.
//!
//! Two checks make up a run:
//! 1. **Space-exhaustion probe** writes fixed-size chunks until the store
//!    refuses one, and asserts the file size never moves on a refused write
//! 2. **Cleanup verifier** removes the exhausted file once and compares the
//!    outcome with the store's metadata reservation policy
//!
//! # Library usage
//!
//! ```rust,no_run
//! use enospace_probe::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use enospace_probe::core::config::Config;
//! use enospace_probe::fixture::sim::SimProvisioner;
//! ```

pub mod prelude;

pub mod core;
pub mod fixture;
pub mod logger;
pub mod platform;
pub mod probe;
