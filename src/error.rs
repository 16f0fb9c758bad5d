use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CalciumError {
    #[error("Slice with instance number {instance} has no rescale slope/intercept")]
    MissingCalibration { instance: i32 },

    #[error("Invalid ROI: {0}")]
    InvalidRoi(String),

    #[error("ROI reference slice {reference} is outside a stack of {len} slices")]
    OutOfRangeSlice { reference: usize, len: usize },

    #[error("Missing spacing information: {0}")]
    MissingSpacing(&'static str),

    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("Slice stack is empty")]
    EmptyStack,

    #[error("Inconsistent slice dimensions")]
    InconsistentDimensions,

    #[error("Slices are not strictly increasing by instance number")]
    UnorderedStack,
}

pub type Result<T> = std::result::Result<T, CalciumError>;
