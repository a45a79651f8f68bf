pub mod config;
pub mod persistence;
pub mod types;

pub use config::AppConfig;
pub use persistence::Persistence;
