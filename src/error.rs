//! Error types for relay jobs.
//!
//! Every failure inside a job is one of the `RelayError` variants and is
//! recovered at the dispatch boundary. `CleanupError` is never returned from a
//! job; the media store logs it and moves on.

use std::path::PathBuf;
use thiserror::Error;

/// Boxed cause attached to an error variant.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Input is not a decodable image or video.
    #[error("decode failed: {context}")]
    Decode {
        context: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The detection backend faulted.
    #[error("model inference failed{}", frame_suffix(.frame_index))]
    ModelInference {
        frame_index: Option<u64>,
        #[source]
        source: BoxError,
    },

    /// Malformed frame or frame/detection pairing.
    #[error("render failed: {0}")]
    Render(String),

    /// Writing the annotated output failed.
    #[error("encode failed: {context}")]
    Encode {
        context: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Downloading an attachment or sending a reply failed.
    #[error("transport failed: {context}")]
    Transport {
        context: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn frame_suffix(frame_index: &Option<u64>) -> String {
    match frame_index {
        Some(index) => format!(" on frame {}", index),
        None => String::new(),
    }
}

impl RelayError {
    pub fn decode(context: impl Into<String>) -> Self {
        Self::Decode {
            context: context.into(),
            source: None,
        }
    }

    pub fn decode_with(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Decode {
            context: context.into(),
            source: Some(source.into()),
        }
    }

    pub fn inference(source: impl Into<BoxError>) -> Self {
        Self::ModelInference {
            frame_index: None,
            source: source.into(),
        }
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self::Render(message.into())
    }

    pub fn encode(context: impl Into<String>) -> Self {
        Self::Encode {
            context: context.into(),
            source: None,
        }
    }

    pub fn encode_with(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Encode {
            context: context.into(),
            source: Some(source.into()),
        }
    }

    pub fn transport(context: impl Into<String>) -> Self {
        Self::Transport {
            context: context.into(),
            source: None,
        }
    }

    pub fn transport_with(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Transport {
            context: context.into(),
            source: Some(source.into()),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Tag an inference failure with the frame it happened on.
    pub fn at_frame(self, index: u64) -> Self {
        match self {
            Self::ModelInference { source, .. } => Self::ModelInference {
                frame_index: Some(index),
                source,
            },
            other => other,
        }
    }

    /// Stable identifier for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode { .. } => "decode",
            Self::ModelInference { .. } => "model_inference",
            Self::Render(_) => "render",
            Self::Encode { .. } => "encode",
            Self::Transport { .. } => "transport",
            Self::Io { .. } => "io",
        }
    }
}

/// A temporary file could not be removed.
#[derive(Debug, Error)]
#[error("failed to remove temporary file {}: {source}", .path.display())]
pub struct CleanupError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inference_error_reports_frame_index() {
        let err = RelayError::inference(anyhow::anyhow!("tensor shape mismatch")).at_frame(5);
        assert_eq!(err.to_string(), "model inference failed on frame 5");
        assert_eq!(err.kind(), "model_inference");
        let source = std::error::Error::source(&err).expect("cause attached");
        assert_eq!(source.to_string(), "tensor shape mismatch");
    }

    #[test]
    fn at_frame_leaves_other_variants_alone() {
        let err = RelayError::render("zero-sized frame").at_frame(3);
        assert!(matches!(err, RelayError::Render(_)));
        assert_eq!(err.to_string(), "render failed: zero-sized frame");
    }
}
