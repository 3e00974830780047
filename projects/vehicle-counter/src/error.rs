use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = CountError> = std::result::Result<T, E>;

/// Failure kinds reported by the counting pipeline and its job runners.
#[derive(Debug, Error)]
pub enum CountError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("detector failure: {0}")]
    DetectorFailure(String),

    #[error("no encoder could be opened for {path:?} (tried {tried:?})")]
    EncoderUnavailable { path: PathBuf, tried: Vec<String> },

    #[error("output verification failed: {0}")]
    OutputVerificationFailed(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("video job {0} is already running")]
    JobInProgress(String),

    #[error("job cancelled after {frames} frames")]
    Cancelled { frames: usize },

    #[error("opencv: {0}")]
    OpenCv(#[from] opencv::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CountError {
    /// Stable name used in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            CountError::SourceUnavailable(_) => "source_unavailable",
            CountError::DetectorFailure(_) => "detector_failure",
            CountError::EncoderUnavailable { .. } => "encoder_unavailable",
            CountError::OutputVerificationFailed(_) => "output_verification_failed",
            CountError::InvalidConfiguration(_) => "invalid_configuration",
            CountError::JobInProgress(_) => "job_in_progress",
            CountError::Cancelled { .. } => "cancelled",
            CountError::OpenCv(_) => "opencv",
            CountError::Io(_) => "io",
            CountError::Other(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        let err = CountError::EncoderUnavailable {
            path: PathBuf::from("out.mp4"),
            tried: vec!["avc1".to_string(), "mp4v".to_string()],
        };
        assert_eq!(err.kind(), "encoder_unavailable");
        assert!(err.to_string().contains("avc1"));

        let err = CountError::InvalidConfiguration("confidence 1.5".to_string());
        assert_eq!(err.kind(), "invalid_configuration");
    }
}
