pub mod handle;
pub mod messages;
pub mod vulkan_commands;
pub mod wire;
pub mod error;

pub use handle::{ReplayHandle, ResourceType};
pub use messages::{StreamRecord, STREAM_FORMAT_VERSION};
pub use error::ProtocolError;
pub use wire::{StreamReader, StreamWriter, WireError};
