//! Request handlers organized by resource.

pub mod exchange;
pub mod health;
pub mod licenses;
pub mod patches;
pub mod public;
pub mod servers;
