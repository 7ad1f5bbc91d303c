use thiserror::Error;

/// Failures raised by the aggregation pipeline, the job runner and the object store pull.
#[derive(Error, Debug)]
pub enum EvalError {
    /// Same (model, scenario) key with scores disagreeing by 1% or more
    #[error("Inconsistent scores found for model '{model}' and scenario '{scenario}'. Scores: {scores:?}")]
    DuplicateConflict {
        model: String,
        scenario: String,
        scores: Vec<f64>,
    },

    /// A scenario did not resolve to exactly one metric key
    #[error("Expected exactly one '{metric}' metric for scenario '{scenario}' of model '{model}', found {candidates:?}")]
    AmbiguousMetric {
        model: String,
        scenario: String,
        metric: String,
        candidates: Vec<String>,
    },

    #[error("Metric '{metric}' missing from task '{task}'")]
    MissingMetric { task: String, metric: String },

    #[error("Metric '{metric}' of task '{task}' is not numeric")]
    NonNumericMetric { task: String, metric: String },

    #[error("Not implemented: no normalization defined for scenario '{0}'")]
    UnknownComposite(String),

    #[error("No subtask scores present for composite scenario '{0}'")]
    NoSubtaskScores(String),

    #[error("Win rate is undefined for scenario '{0}' with a single model")]
    DegenerateWinRate(String),

    #[error("Two scores for model '{model}' in column '{scenario}' after pivot")]
    DuplicateCell { model: String, scenario: String },

    #[error("Reference cell for scenario '{scenario}' and model '{model}' is not a number: '{value}'")]
    InvalidReferenceCell {
        scenario: String,
        model: String,
        value: String,
    },

    #[error("AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set as environment variables")]
    MissingCredentials,

    #[error("Current precision {0} is not supported, only [4, 8, 16]")]
    UnsupportedPrecision(u8),

    #[error("Experiment interrupted")]
    Interrupted,
}
