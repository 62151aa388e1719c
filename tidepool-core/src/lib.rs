//! # tidepool-core
//!
//! Runtime substrate for the tidepool cluster messaging stack.
//!
//! The cluster layers interact with the outside world through a small set of
//! seams defined here, so the networking code never touches tokio primitives
//! directly where a trait boundary is more useful:
//!
//! | Piece | Purpose |
//! |-------|---------|
//! | [`SchedulerPool`] | Fixed pool of single-threaded worker schedulers |
//! | [`NetworkProvider`] | TCP connect/bind seam (production: [`TokioNetworkProvider`]) |
//! | [`MessageCodec`] | Pluggable payload serialization (default: [`JsonCodec`]) |
//! | [`Signal`] | One-shot, idempotent latch ("pulse") |
//!
//! ## Scheduling model
//!
//! A [`SchedulerPool`] runs one OS thread per scheduler. Each thread drives a
//! current-thread tokio runtime inside a `LocalSet`, so tasks on one scheduler
//! are cooperative and interleave only at await points, while tasks on
//! different schedulers run in genuine parallel. Work is handed to a scheduler
//! as an ordered stream of jobs; a job may spawn local (non-`Send`) async
//! tasks that keep running after the job returns.

#![deny(missing_docs)]

mod codec;
mod network;
mod scheduler;
mod signal;

pub use codec::{CodecError, JsonCodec, MessageCodec};
pub use network::{NetworkProvider, TcpListenerTrait, TokioNetworkProvider, TokioTcpListener};
pub use scheduler::{current_scheduler, SchedulerHandle, SchedulerPool};
pub use signal::Signal;
