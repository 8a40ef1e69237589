// Concrete implementations of the domain ports.

pub mod http;
pub mod memory;

#[cfg(feature = "lambda")]
pub mod aws;
