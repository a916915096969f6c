pub mod aggregation;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod snapshot;
pub mod storage;
pub mod versioning;

pub use error::{DbErr, Result};
