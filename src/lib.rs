//! Turnwise is the turn execution core of a terminal chat agent.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the turn controller, the event processor that turns agent
//!   events into transcript widgets, the approval and question gates, and the
//!   traits that connect it to an agent backend and a front end.
//! - [`commands`] implements the slash-command registry consulted on submit.
//! - [`cli`] parses arguments and runs a line-oriented front end over the
//!   scripted demo backend.
//! - [`utils`] carries logging setup and test helpers.
//!
//! The binary (`src/main.rs`) routes through [`crate::cli::main`].

pub mod cli;
pub mod commands;
pub mod core;
pub mod utils;
