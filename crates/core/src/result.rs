//! Result records written by the external analysis engine.
//!
//! The engine serializes one [`ResultArtifact`] per job. It holds one
//! [`ResultRecord`] per analysed target (chemical × ionization).

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Outcome of analysing one target in one dataset.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    /// The target was detected.
    Positive,
    /// The target was searched for and not found.
    Negative,
    /// Candidate peaks were found but rejected by scoring.
    Rejected,
    /// Too few points across the peak to fit.
    NotSufficientPoints,
    /// The target definition itself was invalid (e.g. unknown formula).
    TargetError,
    /// Repeated runs of the same target disagree (produced by run fusion).
    ConflictRuns,
    UnknownError,
    /// Analysis was not attempted.
    NoAnalysis,
}

impl AnalysisStatus {
    pub const ALL: [AnalysisStatus; 8] = [
        AnalysisStatus::Positive,
        AnalysisStatus::Negative,
        AnalysisStatus::Rejected,
        AnalysisStatus::NotSufficientPoints,
        AnalysisStatus::TargetError,
        AnalysisStatus::ConflictRuns,
        AnalysisStatus::UnknownError,
        AnalysisStatus::NoAnalysis,
    ];

    /// Stable text form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Positive => "positive",
            AnalysisStatus::Negative => "negative",
            AnalysisStatus::Rejected => "rejected",
            AnalysisStatus::NotSufficientPoints => "not_sufficient_points",
            AnalysisStatus::TargetError => "target_error",
            AnalysisStatus::ConflictRuns => "conflict_runs",
            AnalysisStatus::UnknownError => "unknown_error",
            AnalysisStatus::NoAnalysis => "no_analysis",
        }
    }
}

impl core::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AnalysisStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown analysis status '{s}'")))
    }
}

/// What was searched for: one chemical under one ionization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub chemical_name: String,
    /// Ionization / adduct, e.g. `[M+H]+`.
    pub ionization: String,
    pub monoisotopic_mass: f64,
    pub charge: i32,
}

impl Target {
    /// Human-readable natural key of the target.
    pub fn descriptor(&self) -> String {
        if self.ionization.is_empty() {
            self.chemical_name.clone()
        } else {
            format!("{} {}", self.chemical_name, self.ionization)
        }
    }
}

/// Per-isomer score triple, each component in `[0, 1]`.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreTriple {
    pub intensity: f64,
    pub peak_shape: f64,
    pub isotopic: f64,
}

impl ScoreTriple {
    pub fn new(intensity: f64, peak_shape: f64, isotopic: f64) -> Self {
        Self {
            intensity,
            peak_shape,
            isotopic,
        }
    }

    /// Combined score used to rank isomers.
    pub fn combined(&self) -> f64 {
        self.intensity * self.peak_shape * self.isotopic
    }
}

/// The feature at one arrival time, as seen by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrivalSnapshot {
    /// Arrival time in milliseconds.
    pub arrival_time: f64,
    pub intensity: f64,
    /// Full width at half maximum of the arrival-time peak, if fitted.
    #[serde(default)]
    pub fwhm: Option<f64>,
}

/// One detected isomer (a distinct mobility feature) of a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Isomer {
    pub scores: ScoreTriple,
    #[serde(default)]
    pub mobility: Option<f64>,
    /// Collision cross section in Å².
    #[serde(default)]
    pub ccs: Option<f64>,
    #[serde(default)]
    pub arrival_time: Option<f64>,
    #[serde(default)]
    pub snapshots: Vec<ArrivalSnapshot>,
}

/// Summary of the association hypothesis test for a target.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisSummary {
    pub data_likelihood: f64,
    pub posterior_probability: f64,
}

/// The analysis outcome of one target in one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub dataset: String,
    pub target: Target,
    pub status: AnalysisStatus,
    #[serde(default)]
    pub isomers: Vec<Isomer>,
    #[serde(default)]
    pub hypothesis: Option<HypothesisSummary>,
    /// Aggregate scores as reported by the engine. When absent, the best
    /// isomer's scores are used.
    #[serde(default)]
    pub scores: Option<ScoreTriple>,
}

impl ResultRecord {
    /// Scores stored on the analysis row.
    pub fn aggregate_scores(&self) -> Option<ScoreTriple> {
        self.scores.or_else(|| {
            self.isomers
                .iter()
                .map(|i| i.scores)
                .max_by(|a, b| a.combined().total_cmp(&b.combined()))
        })
    }
}

/// Everything one engine invocation produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultArtifact {
    pub dataset: String,
    #[serde(default)]
    pub records: Vec<ResultRecord>,
}

impl ResultArtifact {
    /// Check that every record belongs to the artifact's dataset.
    pub fn validate(&self, expected_dataset: &str) -> DomainResult<()> {
        if self.dataset != expected_dataset {
            return Err(DomainError::invariant(format!(
                "artifact is for dataset '{}', expected '{expected_dataset}'",
                self.dataset
            )));
        }
        if let Some(stray) = self.records.iter().find(|r| r.dataset != self.dataset) {
            return Err(DomainError::invariant(format!(
                "record for dataset '{}' inside artifact of '{}'",
                stray.dataset, self.dataset
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn caffeine() -> Target {
        Target {
            chemical_name: "Caffeine".to_string(),
            ionization: "[M+H]+".to_string(),
            monoisotopic_mass: 194.0804,
            charge: 1,
        }
    }

    fn isomer(i: f64, p: f64, s: f64) -> Isomer {
        Isomer {
            scores: ScoreTriple::new(i, p, s),
            mobility: Some(1.2),
            ccs: Some(138.2),
            arrival_time: Some(21.4),
            snapshots: vec![],
        }
    }

    #[test]
    fn descriptor_includes_ionization() {
        assert_eq!(caffeine().descriptor(), "Caffeine [M+H]+");

        let bare = Target {
            ionization: String::new(),
            ..caffeine()
        };
        assert_eq!(bare.descriptor(), "Caffeine");
    }

    #[test]
    fn aggregate_scores_prefer_reported_then_best_isomer() {
        let mut record = ResultRecord {
            dataset: "D1".to_string(),
            target: caffeine(),
            status: AnalysisStatus::Positive,
            isomers: vec![isomer(0.5, 0.5, 0.5), isomer(0.9, 0.8, 0.9)],
            hypothesis: None,
            scores: None,
        };
        assert_eq!(record.aggregate_scores(), Some(ScoreTriple::new(0.9, 0.8, 0.9)));

        record.scores = Some(ScoreTriple::new(0.1, 0.1, 0.1));
        assert_eq!(record.aggregate_scores(), Some(ScoreTriple::new(0.1, 0.1, 0.1)));

        record.scores = None;
        record.isomers.clear();
        assert_eq!(record.aggregate_scores(), None);
    }

    #[test]
    fn status_uses_snake_case_on_the_wire() {
        let json = serde_json::to_string(&AnalysisStatus::NotSufficientPoints).unwrap();
        assert_eq!(json, "\"not_sufficient_points\"");
    }

    #[test]
    fn artifact_rejects_foreign_records() {
        let artifact = ResultArtifact {
            dataset: "D1".to_string(),
            records: vec![ResultRecord {
                dataset: "D2".to_string(),
                target: caffeine(),
                status: AnalysisStatus::Negative,
                isomers: vec![],
                hypothesis: None,
                scores: None,
            }],
        };
        assert!(artifact.validate("D1").is_err());
        assert!(artifact.validate("D9").is_err());
    }

    proptest! {
        #[test]
        fn status_text_form_parses_back(idx in 0usize..AnalysisStatus::ALL.len()) {
            let status = AnalysisStatus::ALL[idx];
            prop_assert_eq!(status.as_str().parse::<AnalysisStatus>().unwrap(), status);
        }
    }
}
