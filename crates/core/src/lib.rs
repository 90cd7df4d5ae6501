//! Admission and progress-coordination core of the Cobra collection console.
//!
//! Pure domain logic with no I/O of its own: phone normalization, batch
//! limits, the instance lock table, the admission queue, the resumable
//! number validator and the job ticket with its poller. External services
//! are reached only through the traits in [`dispatch`] and [`validation`].

pub mod admission;
pub mod batch;
pub mod clock;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod locks;
pub mod phone;
pub mod poller;
pub mod types;
pub mod validation;
