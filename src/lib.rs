//! A headless terminal audio player.
//!
//! Queries are resolved to tracks through [`provider`]s, queued in a
//! [`session::Orchestrator`] and played one at a time by an external media
//! player process. A small daemon exposes the session over a Unix socket
//! through [`remote`].
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod player;
pub mod provider;
pub mod queue;
pub mod remote;
pub mod session;
pub mod shell;
pub mod signal;
pub mod track;
pub mod util;
