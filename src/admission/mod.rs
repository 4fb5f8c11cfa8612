//! Admission orchestration.
//!
//! [`AdmissionController`] ties the subsystems together: cache lookup
//! first, then quota, then a coalesced backend invocation. See the crate
//! docs for the request state machine.

mod builder;
mod controller;
mod inflight;

pub use builder::{Garmr, GarmrBuilder};
pub use controller::AdmissionController;
