//! Types shared by the graph-mirror crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
