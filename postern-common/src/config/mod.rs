//! Configuration shared across protocols.

pub mod timeouts;

pub use timeouts::ServerTimeouts;
