pub mod config;
pub mod error;
pub mod handle_alloc;

pub use config::{default_config_path, OutputConfig, PrimerConfig, VkprimeConfig};
pub use error::CoreError;
pub use handle_alloc::HandleAllocator;
