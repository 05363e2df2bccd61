// Copyright © 2024 Pathway

use std::fmt::{self, Display};
use std::sync::Arc;

use arcstr::ArcStr;
use itertools::Itertools as _;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use super::error::{DynError, DynResult, Error};
use super::DType;

#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    String(ArcStr),
    List(Arc<[Self]>),
}

impl Value {
    #[inline(never)]
    #[cold]
    fn type_mismatch(&self, expected: DType) -> DynError {
        DynError::from(Error::TypeMismatch {
            expected,
            value: self.clone(),
        })
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn as_int(&self) -> DynResult<i64> {
        if let Self::Int(i) = self {
            Ok(*i)
        } else {
            Err(self.type_mismatch(DType::Int64))
        }
    }

    pub fn as_bool(&self) -> DynResult<bool> {
        if let Self::Bool(b) = self {
            Ok(*b)
        } else {
            Err(self.type_mismatch(DType::Bool))
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> DynResult<f64> {
        match self {
            Self::Float(f) => Ok(f.into_inner()),
            Self::Int(i) => Ok(*i as f64),
            _ => Err(self.type_mismatch(DType::Float64)),
        }
    }

    pub fn as_string(&self) -> DynResult<&ArcStr> {
        if let Self::String(s) = self {
            Ok(s)
        } else {
            Err(self.type_mismatch(DType::String))
        }
    }

    pub fn as_list(&self) -> DynResult<&Arc<[Self]>> {
        if let Self::List(values) = self {
            Ok(values)
        } else {
            Err(self.type_mismatch(DType::Unknown))
        }
    }

    /// Whether this scalar can be stored in a column of the given element type.
    /// Nulls fit every type.
    pub fn fits(&self, dtype: DType) -> bool {
        match self {
            Self::None => true,
            Self::Bool(_) => dtype == DType::Bool,
            Self::Int(_) => dtype.is_integer(),
            Self::Float(_) => dtype.is_float(),
            Self::String(_) => dtype == DType::String,
            Self::List(_) => false,
        }
    }
}

impl Display for Value {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::None => write!(fmt, "None"),
            Self::Bool(b) => write!(fmt, "{}", if *b { "True" } else { "False" }),
            Self::Int(i) => write!(fmt, "{i}"),
            Self::Float(OrderedFloat(f)) => write!(fmt, "{f:?}"),
            Self::String(s) => write!(fmt, "{s:?}"),
            Self::List(values) => write!(fmt, "[{}]", values.iter().format(", ")),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i.into())
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(OrderedFloat(f))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.into())
    }
}

impl From<ArcStr> for Value {
    fn from(s: ArcStr) -> Self {
        Self::String(s)
    }
}

impl From<&[Value]> for Value {
    fn from(values: &[Value]) -> Self {
        Self::List(values.into())
    }
}

impl<T> From<Vec<T>> for Value
where
    T: Into<Value>,
{
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(o: Option<T>) -> Self {
        match o {
            None => Self::None,
            Some(v) => v.into(),
        }
    }
}
