//! # lirc-core
//!
//! Core types for the lircd socket protocol.
//!
//! This crate provides the types shared by every part of the client:
//! - Broadcast events (IR button presses)
//! - Command replies
//! - Protocol marker tokens
//! - Error type

pub mod error;
pub mod event;
pub mod markers;
pub mod reply;

pub use error::{LircError, Result};
pub use event::Event;
pub use reply::Reply;
