use thiserror::Error;

/// Structural problem found while validating a loaded job descriptor.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("job contains no tasks")]
    NoTasks,
    #[error("task {index}: required field `{field}` is missing or empty")]
    MissingField { index: usize, field: &'static str },
    #[error("task {index}: weight must be a positive finite number, got {weight}")]
    InvalidWeight { index: usize, weight: f64 },
    #[error("helper {index}: program is empty")]
    EmptyHelper { index: usize },
}
