//! Core data models for the ephemeral object service.
//!
//! `object` describes what the backing store holds; `retention` describes how
//! long it is allowed to hold it.

pub mod object;
pub mod retention;
