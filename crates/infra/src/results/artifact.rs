//! Reading (and, for tests and tooling, writing) per-job result artifacts.

use std::io;
use std::path::{Path, PathBuf};

use ccsbatch_core::{JobDescriptor, ResultArtifact};

/// Why a finished job's artifact could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("result artifact {path} is missing")]
    Missing { path: PathBuf },
    #[error("result artifact {path} is unreadable: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

impl ArtifactError {
    pub fn path(&self) -> &Path {
        match self {
            ArtifactError::Missing { path } | ArtifactError::Corrupt { path, .. } => path,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, ArtifactError::Missing { .. })
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, ArtifactError::Corrupt { .. })
    }
}

/// Load and validate the artifact a job left behind.
pub async fn load_artifact(job: &JobDescriptor) -> Result<ResultArtifact, ArtifactError> {
    let path = job.result_artifact_path();
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ArtifactError::Missing {
                path: path.to_path_buf(),
            });
        }
        Err(e) => {
            return Err(ArtifactError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
        }
    };

    let artifact: ResultArtifact =
        serde_json::from_slice(&bytes).map_err(|e| ArtifactError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    artifact
        .validate(job.dataset_name())
        .map_err(|e| ArtifactError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    Ok(artifact)
}

/// Write `artifact` as pretty JSON.
pub async fn write_artifact(path: &Path, artifact: &ResultArtifact) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(artifact).map_err(io::Error::other)?;
    tokio::fs::write(path, json).await
}
