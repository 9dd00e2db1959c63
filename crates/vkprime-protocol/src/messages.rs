use serde::{Deserialize, Serialize};

use crate::vulkan_commands::VulkanCommand;

/// Version written into every stream header. Bumped whenever the
/// command vocabulary changes shape.
pub const STREAM_FORMAT_VERSION: u32 = 1;

/// Top-level record envelope of a replay command stream.
///
/// A stream is one `Header`, any number of `Command`/`Marker` records, and a
/// closing `End` that lets readers detect truncation.
#[derive(Debug, Clone, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub enum StreamRecord {
    Header {
        format_version: u32,
        /// Free-form name of the tool that wrote the stream
        producer: String,
    },
    Command {
        /// Position of the command in the stream, starting at 0
        seq: u64,
        command: VulkanCommand,
    },
    /// Annotation with no replay effect, e.g. which image is being primed.
    Marker {
        label: String,
    },
    End {
        command_count: u64,
    },
}

impl StreamRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Header { .. } => "header",
            Self::Command { .. } => "command",
            Self::Marker { .. } => "marker",
            Self::End { .. } => "end",
        }
    }
}
