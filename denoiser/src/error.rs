use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DenoiseError {
    /// A flow record inconsistent with its declared cycle count. Fatal for the file only.
    #[error("{}:{line}: malformed flow record: {reason}", path.display())]
    MalformedInput {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("failed to load the lookup table {}: {reason}", path.display())]
    CalibrationLoadFailure { path: PathBuf, reason: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("could not run {threads} workers: {reason}")]
    WorkerSpawnFailure { threads: usize, reason: String },
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DenoiseError {
    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        DenoiseError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
    pub fn malformed(path: &std::path::Path, line: usize, reason: impl Into<String>) -> Self {
        DenoiseError::MalformedInput {
            path: path.to_path_buf(),
            line,
            reason: reason.into(),
        }
    }
    pub fn is_malformed(&self) -> bool {
        matches!(self, DenoiseError::MalformedInput { .. })
    }
}

impl From<DenoiseError> for std::io::Error {
    fn from(why: DenoiseError) -> Self {
        match why {
            DenoiseError::Io { source, .. } => source,
            DenoiseError::MalformedInput { .. } => {
                std::io::Error::new(std::io::ErrorKind::InvalidData, why.to_string())
            }
            _ => std::io::Error::new(std::io::ErrorKind::Other, why.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn message() {
        let why = DenoiseError::malformed(std::path::Path::new("a.flow"), 3, "too few values");
        assert!(why.is_malformed());
        assert_eq!(why.to_string(), "a.flow:3: malformed flow record: too few values");
        let io: std::io::Error = why.into();
        assert_eq!(io.kind(), std::io::ErrorKind::InvalidData);
        let why = DenoiseError::InvalidConfig("empty flow order".to_string());
        assert_eq!(why.to_string(), "invalid configuration: empty flow order");
    }
}
