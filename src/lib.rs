pub mod analytics;
pub mod anchor;
pub mod audit;
pub mod crypto;
pub mod error;
pub mod export;
pub mod settings;
pub mod store;

pub use error::LogError;
pub use store::{LogRange, LogStore, TailCursor};
