use crate::error::EvalError;
use crate::models::ScoreRecord;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// True when two scores for the same key are within 1% of both values
fn scores_agree(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    let diff = (a - b).abs();
    diff < a.abs() / 100.0 && diff < b.abs() / 100.0
}

fn check_consistency(records: &[ScoreRecord]) -> Result<(), EvalError> {
    let mut groups: HashMap<(&str, &str), Vec<f64>> = HashMap::new();
    for record in records {
        groups
            .entry((record.model.as_str(), record.scenario.as_str()))
            .or_default()
            .push(record.score);
    }

    for ((model, scenario), scores) in groups.into_iter().filter(|(_, s)| s.len() > 1) {
        let consistent = scores
            .iter()
            .enumerate()
            .all(|(i, a)| scores[i + 1..].iter().all(|b| scores_agree(*a, *b)));
        if !consistent {
            return Err(EvalError::DuplicateConflict {
                model: model.to_string(),
                scenario: scenario.to_string(),
                scores,
            });
        }
        debug!(model, scenario, count = scores.len(), "Dropping consistent duplicates");
    }

    Ok(())
}

/// Collapse records sharing (model, scenario) to the first-seen one.
///
/// Fails when any two scores in a group disagree by 1% or more.
pub fn resolve_duplicates(records: Vec<ScoreRecord>) -> Result<Vec<ScoreRecord>, EvalError> {
    check_consistency(&records)?;

    let mut seen = HashSet::new();
    Ok(records
        .into_iter()
        .filter(|r| seen.insert((r.model.clone(), r.scenario.clone())))
        .collect())
}
