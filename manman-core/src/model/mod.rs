//! Domain model: the four-level descriptor chain (game, game config,
//! deployment, session) plus parameters, configuration strategies, operator
//! actions, workshop content and log/backup records.
//!
//! Identifiers are opaque `i64`s assigned by the catalog. Status enums
//! carry their transition rules here so the control plane consumers and
//! the host supervisor agree on what a legal move is.

mod action;
mod game;
mod logs;
mod params;
mod server;
mod session;
mod strategy;
mod workshop;

pub use action::*;
pub use game::*;
pub use logs::*;
pub use params::*;
pub use server::*;
pub use session::*;
pub use strategy::*;
pub use workshop::*;
