pub mod mock;
#[cfg(feature = "ollama")]
pub mod ollama;

pub use mock::MockProvider;
#[cfg(feature = "ollama")]
pub use ollama::OllamaProvider;
