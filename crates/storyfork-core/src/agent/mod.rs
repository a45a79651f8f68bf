pub mod factory;
pub mod model;
pub mod providers;

pub use factory::{create_provider, generation_config};
pub use model::{
    GenerationConfig, ModelProvider, ModelResponse, ProviderKind, ProviderMetadata,
    TextStream,
};
