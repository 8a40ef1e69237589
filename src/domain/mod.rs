// Domain layer: event shapes, settings and the ports every managed service sits behind.

pub mod model;
pub mod ports;
pub mod settings;
