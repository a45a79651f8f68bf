pub mod agent;
pub mod engine;
pub mod error;
pub mod preview;
#[cfg(test)]
pub(crate) mod test_utils;

pub use engine::StoryEngine;
pub use error::{EngineError, EngineResult};
pub use storyfork_config::{config, persistence, types};
