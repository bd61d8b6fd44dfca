//! Spec file → ordered job descriptors.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use ccsbatch_core::{CommandArguments, JobDescriptor, JobId};

use crate::error::{LineError, LineErrorKind, SpecError};
use crate::grammar::parse_job_line;
use crate::resolve::DatasetResolver;

/// Default instrument file extension.
pub const DEFAULT_EXTENSION: &str = "mzML";

/// Parser inputs besides the spec text itself.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Base input path: a directory to search, or a single dataset file.
    pub input: PathBuf,
    /// Root for per-dataset output directories. Defaults to each input
    /// file's parent directory.
    pub output: Option<PathBuf>,
    /// Accept the spec even when some lines are rejected.
    pub force: bool,
    /// Instrument file extension, without the leading dot.
    pub extension: String,
}

impl ParseOptions {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: None,
            force: false,
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }
}

/// Result of a successful parse.
#[derive(Debug, Clone)]
pub struct ParsedSpec {
    /// Verbatim global argument string (first significant line).
    pub global_arguments: String,
    /// Accepted jobs in file order, ids dense from 1.
    pub jobs: Vec<JobDescriptor>,
    /// Lines rejected under `force`. Always empty otherwise.
    pub skipped_lines: Vec<LineError>,
}

/// Turns spec files into [`JobDescriptor`]s.
#[derive(Debug, Clone)]
pub struct SpecParser {
    options: ParseOptions,
}

struct Accepted {
    line: usize,
    job: JobDescriptor,
}

impl SpecParser {
    pub fn new(options: ParseOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    /// Read and parse a spec file.
    pub fn parse_file(&self, path: &Path) -> Result<ParsedSpec, SpecError> {
        let text = fs::read_to_string(path).map_err(|source| SpecError::Read {
            path: path.display().to_string(),
            source,
        })?;
        self.parse_str(&text)
    }

    /// Parse spec text.
    ///
    /// Line errors are collected rather than returned early; the whole parse
    /// fails only at the end, and only without `force`.
    pub fn parse_str(&self, text: &str) -> Result<ParsedSpec, SpecError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let resolver = DatasetResolver::new(&self.options.input, &self.options.extension);

        let mut global_arguments: Option<String> = None;
        let mut accepted: Vec<Accepted> = Vec::new();
        let mut by_input: HashMap<PathBuf, usize> = HashMap::new();
        let mut dropped: BTreeSet<usize> = BTreeSet::new();
        let mut errors: Vec<LineError> = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line_number = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let global = match &global_arguments {
                Some(global) => global.clone(),
                None => {
                    debug!(line = line_number, "global arguments: {line}");
                    global_arguments = Some(line.to_string());
                    continue;
                }
            };

            let job = match self.parse_job(line, line_number, &global, &resolver) {
                Ok(job) => job,
                Err(kind) => {
                    debug!(line = line_number, error = %kind, "rejected spec line");
                    errors.push(LineError::new(line_number, kind));
                    continue;
                }
            };

            let input = job.resolved_input_path().to_path_buf();
            match by_input.get(&input) {
                Some(&first) => {
                    let original = &accepted[first];
                    if dropped.insert(first) {
                        errors.push(LineError::new(
                            original.line,
                            duplicate(&original.job, &input, line_number),
                        ));
                    }
                    errors.push(LineError::new(
                        line_number,
                        duplicate(&job, &input, original.line),
                    ));
                }
                None => {
                    by_input.insert(input, accepted.len());
                    accepted.push(Accepted {
                        line: line_number,
                        job,
                    });
                }
            }
        }

        errors.sort_by_key(|e| e.line);

        if !errors.is_empty() && !self.options.force {
            return Err(SpecError::Rejected { errors });
        }
        if !errors.is_empty() {
            warn!(skipped = errors.len(), "skipping rejected spec lines (force)");
            for e in &errors {
                warn!(line = e.line, "{}", e.kind);
            }
        }

        let jobs: Vec<JobDescriptor> = accepted
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| !dropped.contains(idx))
            .map(|(_, a)| a.job)
            .zip(1u32..)
            .map(|(job, seq)| job.with_id(JobId::new(seq)))
            .collect();

        info!(jobs = jobs.len(), skipped = errors.len(), "parsed job spec");

        Ok(ParsedSpec {
            global_arguments: global_arguments.unwrap_or_default(),
            jobs,
            skipped_lines: errors,
        })
    }

    fn parse_job(
        &self,
        line: &str,
        line_number: usize,
        global: &str,
        resolver: &DatasetResolver,
    ) -> Result<JobDescriptor, LineErrorKind> {
        let fields = parse_job_line(line)?;
        let input = resolver.resolve(&fields.dataset)?;

        let output_root = match &self.options.output {
            Some(root) => std::path::absolute(root).map_err(|e| LineErrorKind::Io(e.to_string()))?,
            None => input
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| resolver.base_dir().to_path_buf()),
        };
        let output_directory = output_root.join(&fields.dataset);

        let arguments = CommandArguments {
            targets: fields.targets,
            ionizations: fields.ionizations,
            global: global.to_string(),
        };

        JobDescriptor::new(
            JobId::new(0),
            fields.dataset,
            line_number,
            input,
            output_directory,
            arguments,
        )
        .map_err(|e| LineErrorKind::InvalidJob(e.to_string()))
    }
}

fn duplicate(job: &JobDescriptor, input: &Path, other_line: usize) -> LineErrorKind {
    LineErrorKind::DuplicateDataset {
        dataset: job.dataset_name().to_string(),
        path: input.display().to_string(),
        other_line,
    }
}
