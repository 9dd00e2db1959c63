//! Image priming for Vulkan capture replay.
//!
//! Given the captured contents of an image (old state) and the freshly
//! recreated image (new state), an [`ImagePrimer`] picks a way to get the bytes
//! into the new image that its usage flags allow, then emits the replay
//! commands that do it through a [`StateBuilder`].

pub mod builder;
pub mod cmd;
pub mod copy;
pub mod error;
pub mod format;
pub mod layout;
pub mod primeable;
pub mod primer;
pub mod render;
pub mod shaders;
pub mod sink;
pub mod state;
pub mod store;
pub mod task;

pub use builder::{Cleanup, StateBuilder, SubRangeTransition};
pub use error::{PrimeError, PrimeResultExt, Result};
pub use layout::{FixedLayout, ImageLayouts, LayoutInfo};
pub use primeable::{PrimeableImageData, PrimingStrategy};
pub use primer::ImagePrimer;
pub use sink::{CommandSink, RecordingSink};
pub use state::{ImageAspect, ImageInfo, ImageObject, State};
pub use task::ScratchTask;
