//! Core library for the ManMan fleet manager.
//!
//! The control plane (`manman-server`) and the host manager (`manman-host`)
//! share this crate: the domain model and its state machines, the Postgres
//! catalog store, the RabbitMQ command/status protocol, the pure
//! configuration renderer, and the retry/backoff envelope used for every
//! external connection.

pub mod bus;
pub mod catalog;
pub mod error;
pub mod model;
pub mod render;
pub mod retry;

pub use error::{Error, ErrorKind, Result};
