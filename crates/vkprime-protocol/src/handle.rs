use std::fmt;

use serde::{Deserialize, Serialize};

/// A handle that identifies one object of the state being rebuilt during replay.
/// The producer of a command stream picks these values itself, so creation commands
/// carry their result handle and never need a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct ReplayHandle {
    /// Type tag for debugging and validation
    pub resource_type: ResourceType,
    /// Raw handle value as seen by the replayed application
    pub id: u64,
}

impl ReplayHandle {
    pub const fn new(resource_type: ResourceType, id: u64) -> Self {
        Self { resource_type, id }
    }

    /// Create a null/invalid handle.
    pub const fn null() -> Self {
        Self {
            resource_type: ResourceType::None,
            id: 0,
        }
    }

    pub fn is_null(&self) -> bool {
        self.resource_type == ResourceType::None && self.id == 0
    }
}

impl Default for ReplayHandle {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for ReplayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({:#x})", self.resource_type, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub enum ResourceType {
    None,
    VkPhysicalDevice,
    VkDevice,
    VkQueue,
    VkCommandPool,
    VkCommandBuffer,
    VkDeviceMemory,
    VkBuffer,
    VkImage,
    VkImageView,
    VkPipeline,
    VkPipelineLayout,
    VkDescriptorSetLayout,
    VkDescriptorPool,
    VkDescriptorSet,
    VkShaderModule,
    VkRenderPass,
    VkFramebuffer,
    VkFence,
}
