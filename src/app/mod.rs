pub mod dispatcher;

pub use dispatcher::{Components, Dispatcher, PatternKind};
