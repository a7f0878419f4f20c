use thiserror::Error;

/// Fatal failure modes of a correction run. Warnings (non-isotopologue
/// enrichment requests, expected-value deviations) are reported through
/// `tracing` instead and never abort a run.
#[derive(Error, Debug)]
pub enum CorrectionError {
    #[error("unknown element: {0}")]
    UnknownElement(String),

    #[error("unknown isotope: {0}")]
    UnknownIsotope(String),

    #[error("malformed natural-abundance data for element {element}: {reason}")]
    MalformedAbundance { element: String, reason: String },

    #[error("malformed compound {name}: {reason}")]
    MalformedCompound { name: String, reason: String },

    #[error("measurement key set does not match the tracer pair set: {reason}")]
    MeasurementKeyMismatch { reason: String },

    #[error("malformed tracer purity: {0}")]
    MalformedPurity(String),

    #[error("zero pivot in row {0} of the correction matrix")]
    ZeroPivot(usize),

    #[error("malformed input line '{line}': {reason}")]
    MalformedLine { line: String, reason: String },

    #[error("{0}")]
    Other(String),
}

impl CorrectionError {
    pub fn custom(msg: impl std::fmt::Display) -> Self {
        Self::Other(msg.to_string())
    }
}
