//! Core node infrastructure.
//!
//! - [`config`] - Configuration parsing and validation
//! - [`error`] - Error taxonomy shared by stages and interceptors
//! - [`node`] - Component wiring and the public cache API

pub mod config;
pub mod error;
pub mod node;
