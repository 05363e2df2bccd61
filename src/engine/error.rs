// Copyright © 2024 Pathway

use std::any::Any;
use std::error;
use std::result;

use arcstr::ArcStr;

use super::{DType, Value};

#[allow(clippy::module_name_repetitions)]
pub type DynError = Box<dyn error::Error + Send + Sync>;
pub type DynResult<T> = result::Result<T, DynError>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("missing columns {columns:?} found in {location}")]
    MissingColumns {
        columns: Vec<ArcStr>,
        location: String,
    },

    #[error(
        "dtype discrepancy detected for column {column}: operator {operator} reported dtype `{expected}` but returned dtype `{actual}`"
    )]
    DtypeMismatch {
        operator: ArcStr,
        column: ArcStr,
        expected: DType,
        actual: DType,
    },

    #[error("operator {operator} didn't return a value during transform")]
    MissingOutput { operator: ArcStr },

    #[error("node handle does not belong to this graph")]
    UnsupportedGraphArgument,

    #[error("schemas of operator {operator} are not computed, construct the graph first")]
    NotConstructed { operator: ArcStr },

    #[error("graph has no output node")]
    OutputNodeNotSet,

    #[error("cycle detected in graph")]
    CycleDetected,

    #[error("operator {operator} does not compute statistics")]
    NotStateful { operator: ArcStr },

    #[error("operator {operator} must be fit before transforming")]
    NotFitted { operator: ArcStr },

    #[error("length mismatch: expected {expected} rows, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("duplicate column: {0}")]
    DuplicateColumn(ArcStr),

    #[error("type mismatch: expected {expected}, got {value:?}")]
    TypeMismatch { expected: DType, value: Value },

    #[error("invalid shape: {0}")]
    InvalidShape(String),

    #[error("unknown dtype: {0}")]
    UnknownDType(String),

    #[error("worker panic: {0}")]
    WorkerPanic(String),

    #[error(transparent)]
    Other(DynError),
}

impl Error {
    pub fn from_panic_payload(panic_payload: Box<dyn Any + Send + 'static>) -> Self {
        let message = match panic_payload.downcast::<&'static str>() {
            Ok(message) => message.to_string(),
            Err(panic_payload) => match panic_payload.downcast::<String>() {
                Ok(message) => *message,
                Err(panic_payload) => format!("{panic_payload:?}"),
            },
        };
        Self::WorkerPanic(message)
    }

    pub fn downcast<E: error::Error + 'static>(self) -> Result<E, Self> {
        match self {
            Self::Other(inner) => match inner.downcast::<E>() {
                Ok(error) => Ok(*error),
                Err(other) => Err(Self::Other(other)),
            },
            other => Err(other),
        }
    }

    pub(crate) fn missing_columns(
        columns: impl IntoIterator<Item = ArcStr>,
        location: impl Into<String>,
    ) -> Self {
        Self::MissingColumns {
            columns: columns.into_iter().collect(),
            location: location.into(),
        }
    }
}

impl From<DynError> for Error {
    fn from(value: DynError) -> Self {
        match value.downcast::<Self>() {
            Ok(this) => *this,
            Err(other) => Self::Other(other),
        }
    }
}

pub type Result<T, E = Error> = result::Result<T, E>;
