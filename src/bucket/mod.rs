//! Token bucket engine.

mod engine;
mod state;

pub use engine::{Bucket, Decision};
pub use state::BucketState;
