//! Core messaging logic for atrium.
//!
//! Stores, rules and broadcasting sit here. Transports (HTTP, SSE, Redis)
//! plug in through [`EventPublisher`].

pub mod services;

pub use services::*;
