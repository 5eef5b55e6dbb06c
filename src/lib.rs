//! photoflow: an in-memory photo upload workflow.
//!
//! Uploaded items move UPLOADED → PROCESSING → DONE | FAILED, driven by a
//! periodic [`engine::TransitionEngine`] sweep over a concurrent
//! [`store::Store`], with [`access::AccessLayer`] as the only way in.

pub mod access;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod session;
pub mod state_machine;
pub mod store;
pub mod ui;
