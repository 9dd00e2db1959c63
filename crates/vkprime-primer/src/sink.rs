use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use vkprime_protocol::vulkan_commands::VulkanCommand;
use vkprime_protocol::{StreamWriter, WireError};

/// Destination of the replay commands a [`StateBuilder`](crate::StateBuilder) emits.
pub trait CommandSink: Send {
    fn write(&mut self, command: VulkanCommand) -> Result<(), WireError>;

    /// Annotate the stream. Sinks without markers ignore it.
    fn marker(&mut self, _label: &str) -> Result<(), WireError> {
        Ok(())
    }
}

/// Keeps every command in memory. Clones share the same buffer, so a caller
/// can hand one clone to the builder and inspect the other afterwards.
#[derive(Clone, Default)]
pub struct RecordingSink {
    commands: Arc<Mutex<Vec<VulkanCommand>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the commands written so far.
    pub fn commands(&self) -> Vec<VulkanCommand> {
        self.commands.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.commands.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.lock().is_empty()
    }
}

impl CommandSink for RecordingSink {
    fn write(&mut self, command: VulkanCommand) -> Result<(), WireError> {
        self.commands.lock().push(command);
        Ok(())
    }
}

impl<W: Write + Send> CommandSink for StreamWriter<W> {
    fn write(&mut self, command: VulkanCommand) -> Result<(), WireError> {
        self.write_command(command)
    }

    fn marker(&mut self, label: &str) -> Result<(), WireError> {
        self.write_marker(label)
    }
}
