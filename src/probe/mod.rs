//! The probe, the cleanup verifier and the scenario that strings them together.

pub mod cleanup;
pub mod context;
pub mod exhaust;
pub mod scenario;
