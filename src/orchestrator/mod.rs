//! Application-level orchestration.
//!
//! Owns the run lifecycle for interactive sessions: UI layers send commands
//! in, run events come back out. Keeping this out of the TUI keeps
//! responsibilities separated.

mod controller;

pub(crate) use controller::{run_controller, UiCommand};
