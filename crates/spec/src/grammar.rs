//! Job line grammar.
//!
//! A job line is split on whitespace and the tokens are regrouped into three
//! fields: dataset, targets, ionizations. A delimiter (`,` `:` `;`) glues the
//! next token onto the current field instead of advancing to the next one:
//!
//! | line | dataset | targets | ionizations |
//! |---|---|---|---|
//! | `D1 Caffeine [M+H]+` | D1 | Caffeine | \[M+H\]+ |
//! | `D1 Caffeine , Glucose [M+H]+` | D1 | Caffeine, Glucose | \[M+H\]+ |
//! | `D1 Caffeine,Glucose [M+H]+;[M+Na]+` | D1 | Caffeine, Glucose | \[M+H\]+, \[M+Na\]+ |
//! | `D1 Caffeine ,Glucose` | D1 | Caffeine, Glucose | |
//! | `D1 Caffeine [M+H]+ [M+Na]+` | D1 | Caffeine | \[M+H\]+, \[M+Na\]+ |

use crate::error::LineErrorKind;

/// Characters that continue the current field.
pub const DELIMITERS: [char; 3] = [',', ':', ';'];

/// The fields of one job line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobLine {
    pub dataset: String,
    pub targets: Vec<String>,
    pub ionizations: Vec<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Field {
    Dataset,
    Targets,
    Ionizations,
}

impl Field {
    fn index(self) -> usize {
        match self {
            Field::Dataset => 0,
            Field::Targets => 1,
            Field::Ionizations => 2,
        }
    }

    fn next(self) -> Option<Field> {
        match self {
            Field::Dataset => Some(Field::Targets),
            Field::Targets => Some(Field::Ionizations),
            Field::Ionizations => None,
        }
    }
}

/// Split one job line into its fields.
pub fn parse_job_line(line: &str) -> Result<JobLine, LineErrorKind> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 2 {
        return Err(LineErrorKind::TooFewTokens {
            found: tokens.len(),
        });
    }

    let mut values: [Vec<String>; 3] = Default::default();
    let mut field = Field::Dataset;
    let mut continuation = false;

    for token in tokens {
        let delimiters = &DELIMITERS[..];
        let parts: Vec<&str> = token.split(delimiters).filter(|p| !p.is_empty()).collect();

        if parts.is_empty() {
            continuation = true;
            continue;
        }

        // Ionizations is the last field and takes every remaining token.
        let folds = continuation || token.starts_with(delimiters);
        if !folds && !values[field.index()].is_empty() {
            if let Some(next) = field.next() {
                field = next;
            }
        }

        let slot = &mut values[field.index()];
        for part in parts {
            if field == Field::Dataset && !slot.is_empty() {
                return Err(LineErrorKind::MultipleDatasets {
                    first: slot[0].clone(),
                    second: part.to_string(),
                });
            }
            slot.push(part.to_string());
        }

        continuation = token.ends_with(delimiters);
    }

    let [dataset, targets, ionizations] = values;
    let dataset = dataset.into_iter().next().unwrap_or_default();
    if targets.is_empty() {
        return Err(LineErrorKind::MissingTargets);
    }

    Ok(JobLine {
        dataset,
        targets,
        ionizations,
    })
}
