//! 错误类型 (Error types)

/// Errors raised by the bus, the nodes and the tracking engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("invalid topic name `{0}`")]
    InvalidTopicName(String),

    #[error("topic `{topic}` carries `{existing}`, cannot use it for `{requested}`")]
    TopicTypeMismatch {
        topic: String,
        existing: &'static str,
        requested: &'static str,
    },

    #[error("tracking engine failed: {0}")]
    Engine(String),

    #[error("unsupported image encoding `{0}`")]
    UnsupportedEncoding(String),

    #[error("image buffer too small: expected {expected} bytes, got {actual}")]
    ImageSize { expected: usize, actual: usize },

    #[error("unknown component `{0}`")]
    UnknownComponent(String),

    #[error("display closed")]
    DisplayClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;
