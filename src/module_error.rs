pub mod error {
    use thiserror::Error;

    // Errors raised while building or querying a forest.
    #[derive(Debug, Error, Clone, PartialEq)]
    pub enum ForestError {
        #[error("invalid configuration: {0}")]
        InvalidConfiguration(String),

        // Scoring needs at least one tree to average over.
        #[error("the forest has no trees")]
        EmptyForest,

        #[error("observation {observation} is out of range (observation count: {observation_count})")]
        ObservationOutOfRange {
            observation: usize,
            observation_count: usize,
        },

        #[error("data source schema differs: expected {expected_numeric} numeric / {expected_text} text attributes, found {found_numeric} / {found_text}")]
        SchemaMismatch {
            expected_numeric: usize,
            expected_text: usize,
            found_numeric: usize,
            found_text: usize,
        },

        #[error("numeric data has {numeric} observations but text data has {text}")]
        ShapeMismatch { numeric: usize, text: usize },

        #[error("grow job {job} panicked")]
        GrowJobPanicked { job: u64 },
    }

    pub type Result<T> = std::result::Result<T, ForestError>;
}
