pub mod digest;
pub mod error;
pub mod manifest;
pub mod notify;
pub mod pipeline;
pub mod scan;
pub mod sync;

pub use error::{Error, Result};
