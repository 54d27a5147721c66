pub mod capture;
pub mod config;
pub mod dataset;
pub mod error;
pub mod logging;
pub mod preview;

pub use error::{DatasetError, DatasetResult, ProcessFailure};
