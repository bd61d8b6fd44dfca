//! Job descriptors: one dataset analysed against a set of targets.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::JobId;

/// File name suffix of the result artifact the engine writes for a job.
pub const ARTIFACT_SUFFIX: &str = ".result.json";

/// A path-valued token naming on-disk state that two jobs must not touch concurrently.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(PathBuf);

impl ResourceKey {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl core::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// The job-specific part of the engine command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandArguments {
    /// Target (chemical) names, in spec order.
    pub targets: Vec<String>,
    /// Ionization / adduct names. Empty means the engine default.
    pub ionizations: Vec<String>,
    /// Verbatim global argument string shared by every job of a spec file.
    pub global: String,
}

/// Immutable description of one unit of analysis work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    id: JobId,
    dataset_name: String,
    line_number: usize,
    resolved_input_path: PathBuf,
    output_directory: PathBuf,
    result_artifact_path: PathBuf,
    command_arguments: CommandArguments,
    resource_keys: BTreeSet<ResourceKey>,
}

impl JobDescriptor {
    /// Build a descriptor.
    ///
    /// The artifact path is derived from the output directory and the dataset
    /// name; the resource keys are the input file and the output directory.
    pub fn new(
        id: JobId,
        dataset_name: impl Into<String>,
        line_number: usize,
        resolved_input_path: impl Into<PathBuf>,
        output_directory: impl Into<PathBuf>,
        command_arguments: CommandArguments,
    ) -> DomainResult<Self> {
        let dataset_name = dataset_name.into();
        if dataset_name.trim().is_empty() {
            return Err(DomainError::validation("dataset name must not be empty"));
        }
        if command_arguments.targets.is_empty() {
            return Err(DomainError::validation(format!(
                "dataset '{dataset_name}' has no targets"
            )));
        }

        let resolved_input_path = resolved_input_path.into();
        let output_directory = output_directory.into();
        let result_artifact_path =
            output_directory.join(format!("{dataset_name}{ARTIFACT_SUFFIX}"));

        let resource_keys = BTreeSet::from([
            ResourceKey::new(resolved_input_path.clone()),
            ResourceKey::new(output_directory.clone()),
        ]);

        Ok(Self {
            id,
            dataset_name,
            line_number,
            resolved_input_path,
            output_directory,
            result_artifact_path,
            command_arguments,
            resource_keys,
        })
    }

    /// Return a copy with a different sequence number.
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    /// Declare an extra resource this job touches.
    pub fn with_resource(mut self, key: ResourceKey) -> Self {
        self.resource_keys.insert(key);
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn dataset_name(&self) -> &str {
        &self.dataset_name
    }

    pub fn line_number(&self) -> usize {
        self.line_number
    }

    pub fn resolved_input_path(&self) -> &Path {
        &self.resolved_input_path
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    pub fn result_artifact_path(&self) -> &Path {
        &self.result_artifact_path
    }

    pub fn command_arguments(&self) -> &CommandArguments {
        &self.command_arguments
    }

    pub fn resource_keys(&self) -> &BTreeSet<ResourceKey> {
        &self.resource_keys
    }

    /// True when both jobs declare at least one common resource.
    pub fn conflicts_with(&self, other: &JobDescriptor) -> bool {
        !self.resource_keys.is_disjoint(&other.resource_keys)
    }
}
