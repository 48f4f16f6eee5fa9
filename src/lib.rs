pub mod bluetooth;
pub mod config;
mod utils;

pub use bluetooth as bt;

// Reexports
pub use bluer;
pub use chrono;
pub use tokio;
