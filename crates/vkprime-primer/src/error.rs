use ash::vk;
use vkprime_core::CoreError;
use vkprime_protocol::{ReplayHandle, ResourceType, WireError};

/// Errors raised while priming an image.
///
/// Everything except `DataConversion` is fatal for the image being primed.
/// Conversion errors are per subresource: callers log them and move on.
#[derive(Debug, thiserror::Error)]
pub enum PrimeError {
    #[error("image {image} is not supported: {reason}")]
    Unsupported { image: ReplayHandle, reason: String },

    #[error("no way to build primeable image data for image {0}")]
    NoViableStrategy(ReplayHandle),

    #[error("no queue supporting {capability} found for image {image}")]
    NoQueue { image: ReplayHandle, capability: String },

    #[error("no suitable memory type for {object}")]
    NoMemoryType { object: ReplayHandle },

    #[error("{kind:?} {handle} does not exist in the {which} state")]
    MissingObject {
        kind: ResourceType,
        handle: ReplayHandle,
        which: &'static str,
    },

    #[error("format {format:?} is not supported: {reason}")]
    UnsupportedFormat { format: vk::Format, reason: String },

    #[error("data conversion failed: {0}")]
    DataConversion(String),

    #[error("shader generation failed: {0}")]
    ShaderGeneration(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("command sink error: {0}")]
    Sink(#[from] WireError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<PrimeError>,
    },
}

pub type Result<T, E = PrimeError> = std::result::Result<T, E>;

/// Attach the purpose of a failed step to its error.
pub trait PrimeResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T> PrimeResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|source| PrimeError::Context {
            context: context.into(),
            source: Box::new(source),
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|source| PrimeError::Context {
            context: f(),
            source: Box::new(source),
        })
    }
}

impl PrimeError {
    /// Strip `Context` wrappers.
    pub fn root_cause(&self) -> &PrimeError {
        match self {
            PrimeError::Context { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub(crate) fn unsupported(image: ReplayHandle, reason: impl Into<String>) -> Self {
        PrimeError::Unsupported {
            image,
            reason: reason.into(),
        }
    }
}
