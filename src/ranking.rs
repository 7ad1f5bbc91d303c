use crate::error::EvalError;
use crate::models::ScoreRecord;
use std::collections::BTreeMap;

/// Scenario label of the mean-win-rate column
pub const MWR_SCENARIO: &str = "MWR";

/// Fraction of the other scores in the group strictly below each score.
///
/// Output is aligned with `scores`. A single-member group has no win rate.
pub fn win_rates(scenario: &str, scores: &[f64]) -> Result<Vec<f64>, EvalError> {
    if scores.len() < 2 {
        return Err(EvalError::DegenerateWinRate(scenario.to_string()));
    }

    let others = (scores.len() - 1) as f64;
    Ok(scores
        .iter()
        .map(|x| scores.iter().filter(|v| x > v).count() as f64 / others)
        .collect())
}

/// Per-model mean of scenario win rates, as `MWR` records on the 0-1 scale
pub fn mean_win_rates(records: &[ScoreRecord]) -> Result<Vec<ScoreRecord>, EvalError> {
    let mut by_scenario: BTreeMap<&str, Vec<&ScoreRecord>> = BTreeMap::new();
    for record in records {
        by_scenario.entry(record.scenario.as_str()).or_default().push(record);
    }

    let mut by_model: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for (scenario, group) in by_scenario {
        let scores: Vec<f64> = group.iter().map(|r| r.score).collect();
        for (record, rate) in group.iter().zip(win_rates(scenario, &scores)?) {
            by_model.entry(record.model.as_str()).or_default().push(rate);
        }
    }

    Ok(by_model
        .into_iter()
        .map(|(model, rates)| {
            let mean = rates.iter().sum::<f64>() / rates.len() as f64;
            ScoreRecord::new(model, MWR_SCENARIO, mean)
        })
        .collect())
}
