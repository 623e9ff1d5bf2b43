use std::path::PathBuf;
use std::time::Duration;

/// Result type for dispatcher operations
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Error types for the overlay dispatcher
#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Required tool `{tool}` is not available: {reason}")]
    MissingDependency { tool: String, reason: String },

    #[error("No eligible work units found in {}", .0.display())]
    NoEligibleUnits(PathBuf),

    #[error("Duration probe failed for {}: {reason}", .path.display())]
    Probe { path: PathBuf, reason: String },

    #[error("Failed to launch `{program}`: {source}")]
    JobLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transcode exited with {status}: {detail}")]
    JobRuntime { status: String, detail: String },

    #[error("{what} timed out after {:.0}s", .after.as_secs_f64())]
    Timeout { what: String, after: Duration },
}

impl DispatchError {
    /// Whether this error stops the whole batch rather than a single unit
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DispatchError::Config(_)
                | DispatchError::MissingDependency { .. }
                | DispatchError::NoEligibleUnits(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(DispatchError::NoEligibleUnits(PathBuf::from("/tmp/x")).is_fatal());
        assert!(DispatchError::MissingDependency {
            tool: "ffmpeg".to_string(),
            reason: "not found".to_string(),
        }
        .is_fatal());

        let probe = DispatchError::Probe {
            path: PathBuf::from("a.mp4"),
            reason: "bad".to_string(),
        };
        assert!(!probe.is_fatal());

        let runtime = DispatchError::JobRuntime {
            status: "exit status: 1".to_string(),
            detail: String::new(),
        };
        assert!(!runtime.is_fatal());
    }

    #[test]
    fn test_timeout_message() {
        let err = DispatchError::Timeout {
            what: "Transcode of 1-Alice".to_string(),
            after: Duration::from_secs(90),
        };
        assert_eq!(err.to_string(), "Transcode of 1-Alice timed out after 90s");
    }
}
