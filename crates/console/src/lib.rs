//! Cobra collection console: coordination service.
//!
//! Ties the pure core to the HTTP gateway. A process-wide
//! [`state::CoordinationHub`] holds the instance locks and the admission
//! queue; every operator session owns a [`session::SessionContext`] that the
//! [`workflow::JobWorkflow`] advances one bounded step at a time, driven by
//! [`driver::run_session`].

pub mod config;
pub mod driver;
pub mod error;
pub mod manifest;
pub mod session;
pub mod state;
pub mod sweeper;
pub mod workflow;
