pub mod api;
pub use storyfork_config::{config, persistence, types};
pub use storyfork_core::{engine, preview, StoryEngine};
