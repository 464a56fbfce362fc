//! Leasehold Core
//!
//! Domain types, port traits, error handling, the hardware fingerprint and the
//! license payload codec. Every other Leasehold crate builds on this vocabulary.

pub mod activity;
pub mod clock;
pub mod codec;
pub mod error;
pub mod fingerprint;
pub mod ids;
pub mod license;
pub mod patch;
pub mod ports;
pub mod server;
pub mod validation;

pub use error::{Error, Result};
pub use ids::*;
