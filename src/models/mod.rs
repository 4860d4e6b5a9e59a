//! Data models for calendar queries

mod event;

pub use event::*;
