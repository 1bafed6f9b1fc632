//! Config namespace: compiled-in limits plus environment overrides for the
//! KV store connection.

mod settings;

pub use settings::{Period, Settings};
