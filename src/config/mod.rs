//! Configuration
//!
//! `AppConfig` is loaded once at startup from an optional JSON file and
//! then overridden by command line flags. It is immutable afterwards.

mod schema;
mod store;

pub use schema::*;
pub use store::{load_config, validate};
