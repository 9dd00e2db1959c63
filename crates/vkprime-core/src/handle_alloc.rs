use std::sync::atomic::{AtomicU64, Ordering};

use vkprime_protocol::handle::{ReplayHandle, ResourceType};

use crate::error::CoreError;

/// Hands out handle values for objects created while rebuilding replay state.
///
/// Values come from a monotonically increasing counter; callers pass an
/// existence predicate so values already used by captured objects are skipped.
pub struct HandleAllocator {
    next_id: AtomicU64,
}

impl HandleAllocator {
    /// Start allocating at `first_id`. Zero is reserved for null handles.
    pub fn new(first_id: u64) -> Self {
        Self {
            next_id: AtomicU64::new(first_id.max(1)),
        }
    }

    /// Allocate a handle of `resource_type` whose value `exists` rejects.
    pub fn alloc_unused(
        &self,
        resource_type: ResourceType,
        exists: impl Fn(ReplayHandle) -> bool,
    ) -> Result<ReplayHandle, CoreError> {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id == u64::MAX {
                return Err(CoreError::HandlesExhausted(format!("{:?}", resource_type)));
            }
            let handle = ReplayHandle::new(resource_type, id);
            if !exists(handle) {
                return Ok(handle);
            }
            tracing::trace!(%handle, "handle value taken, skipping");
        }
    }
}

impl Default for HandleAllocator {
    fn default() -> Self {
        // Far from the small values capture tools tend to assign.
        Self::new(0x1_0000_0000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_skips_existing_values() {
        let alloc = HandleAllocator::new(5);
        let taken = [5u64, 6, 8];
        let first = alloc
            .alloc_unused(ResourceType::VkImage, |h| taken.contains(&h.id))
            .expect("alloc");
        assert_eq!(first, ReplayHandle::new(ResourceType::VkImage, 7));
        let second = alloc
            .alloc_unused(ResourceType::VkBuffer, |h| taken.contains(&h.id))
            .expect("alloc");
        assert_eq!(second.id, 9);
        assert_eq!(second.resource_type, ResourceType::VkBuffer);
    }

    #[test]
    fn test_zero_is_never_handed_out() {
        let alloc = HandleAllocator::new(0);
        let h = alloc.alloc_unused(ResourceType::VkFence, |_| false).expect("alloc");
        assert_eq!(h.id, 1);
        assert!(!h.is_null());
    }
}
