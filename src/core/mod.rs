pub mod batch;
pub mod claim_check;
pub mod ledger;
pub mod order;
pub mod person;
pub mod saga;
pub mod travel;
pub mod webhook;

pub use crate::domain::ports::{ConfigProvider, EventPublisher, FunctionInvoker, ItemStore, Storage};
pub use crate::utils::error::Result;
