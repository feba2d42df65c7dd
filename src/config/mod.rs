// Configuration module
// Public interface for configuration loading

pub mod constants;
mod loader;
mod settings;

pub use loader::{default_config_path, load_config};
pub use settings::{
    Config, EmbeddingBackend, EmbeddingConfig, GenerationConfig, RerankConfig, SelectorConfig,
    StorageConfig, WorkflowConfig,
};
