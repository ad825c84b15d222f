use thiserror::Error;

/// A configuration value that the generator cannot be built from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} [{value}] not recognized")]
pub struct InvalidConfiguration {
    pub field: &'static str,
    pub value: String,
}

impl InvalidConfiguration {
    pub fn new(field: &'static str, value: impl ToString) -> Self {
        Self {
            field,
            value: value.to_string(),
        }
    }
}

/// An operation was requested on a module in the wrong state, such as
/// folding spectral normalization on a plain convolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid state: {reason}")]
pub struct InvalidState {
    pub reason: &'static str,
}
