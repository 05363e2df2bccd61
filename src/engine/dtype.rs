// Copyright © 2024 Pathway

use std::fmt::{self, Display};
use std::str::FromStr;

use arcstr::ArcStr;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{Error, Result};

/// Canonical element type of a column, independent of any native column library.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    #[default]
    Float64,
    String,
    Unknown,
}

impl DType {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::UInt8
                | Self::UInt16
                | Self::UInt32
                | Self::UInt64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::String => "str",
            Self::Unknown => "unknown",
        }
    }
}

impl Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let dtype = match s {
            "bool" | "boolean" => Self::Bool,
            "int8" => Self::Int8,
            "int16" => Self::Int16,
            "int32" => Self::Int32,
            "int64" | "int" => Self::Int64,
            "uint8" => Self::UInt8,
            "uint16" => Self::UInt16,
            "uint32" => Self::UInt32,
            "uint64" => Self::UInt64,
            "float32" => Self::Float32,
            "float64" | "float" => Self::Float64,
            "str" | "string" | "object" => Self::String,
            "unknown" => Self::Unknown,
            other => return Err(Error::UnknownDType(other.to_string())),
        };
        Ok(dtype)
    }
}

/// The range of potential sizes of a single dimension of a column.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimension {
    min: usize,
    max: Option<usize>,
}

impl Dimension {
    pub fn new(min: usize, max: Option<usize>) -> Result<Self> {
        if let Some(max) = max {
            if max < min {
                return Err(Error::InvalidShape(format!(
                    "the maximum size of a dimension must be at least as large as the minimum size, got min: {min} max: {max}"
                )));
            }
        }
        Ok(Self { min, max })
    }

    pub fn fixed(size: usize) -> Self {
        Self {
            min: size,
            max: Some(size),
        }
    }

    pub fn variable() -> Self {
        Self::default()
    }

    pub fn min(&self) -> usize {
        self.min
    }

    pub fn max(&self) -> Option<usize> {
        self.max
    }

    pub fn is_bounded(&self) -> bool {
        self.max.is_some()
    }

    pub fn is_fixed(&self) -> bool {
        self.max == Some(self.min)
    }

    pub fn is_variable(&self) -> bool {
        !self.is_fixed()
    }
}

/// Sizes of all dimensions of a column; `None` means the shape is not known.
///
/// Equality is structural: an unknown shape only equals another unknown shape.
/// Use [`Shape::is_compatible_with`] for the wildcard comparison.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    dims: Option<Vec<Dimension>>,
}

impl Shape {
    pub fn unknown() -> Self {
        Self { dims: None }
    }

    pub fn new(dims: impl IntoIterator<Item = Dimension>) -> Self {
        Self {
            dims: Some(dims.into_iter().collect()),
        }
    }

    /// Shape of a list column whose first dimension is the row count.
    pub fn list(value_count: Option<usize>) -> Self {
        let inner = match value_count {
            Some(count) => Dimension::fixed(count),
            None => Dimension::variable(),
        };
        Self::new([Dimension::variable(), inner])
    }

    pub fn dims(&self) -> Option<&[Dimension]> {
        self.dims.as_deref()
    }

    pub fn is_known(&self) -> bool {
        self.dims.is_some()
    }

    pub fn is_list(&self) -> bool {
        self.dims.as_ref().is_some_and(|dims| dims.len() > 1)
    }

    pub fn is_ragged(&self) -> bool {
        self.is_list()
            && self
                .dims
                .iter()
                .flatten()
                .skip(1)
                .any(Dimension::is_variable)
    }

    pub fn is_fixed(&self) -> bool {
        self.dims
            .as_ref()
            .is_some_and(|dims| dims.iter().all(Dimension::is_fixed))
    }

    pub fn is_compatible_with(&self, other: &Self) -> bool {
        match (&self.dims, &other.dims) {
            (None, _) | (_, None) => true,
            (Some(lhs), Some(rhs)) => lhs == rhs,
        }
    }
}

/// Maps a native column library's type names onto [`DType`].
pub trait DTypeTranslator: Send + Sync {
    fn translate(&self, native: &str) -> Option<DType>;
}

/// Translator for numpy-style type names (`int64`, `float32`, `<U12`, `object`, ...).
#[derive(Debug, Default, Clone, Copy)]
pub struct NumpyTranslator;

impl DTypeTranslator for NumpyTranslator {
    fn translate(&self, native: &str) -> Option<DType> {
        let name = native.trim_start_matches(['<', '>', '|', '=']);
        if name.starts_with('U') || name.starts_with('S') {
            return Some(DType::String);
        }
        name.parse().ok()
    }
}

#[derive(Default)]
pub struct DTypeRegistry {
    translators: IndexMap<ArcStr, Box<dyn DTypeTranslator>>,
}

impl DTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("numpy", NumpyTranslator);
        registry
    }

    pub fn register(
        &mut self,
        library: impl Into<ArcStr>,
        translator: impl DTypeTranslator + 'static,
    ) {
        self.translators.insert(library.into(), Box::new(translator));
    }

    pub fn translate(&self, library: &str, native: &str) -> Result<DType> {
        self.translators
            .get(library)
            .and_then(|translator| translator.translate(native))
            .ok_or_else(|| Error::UnknownDType(format!("{library}:{native}")))
    }

    /// Tries every registered translator in registration order.
    pub fn translate_any(&self, native: &str) -> Result<DType> {
        self.translators
            .values()
            .find_map(|translator| translator.translate(native))
            .ok_or_else(|| Error::UnknownDType(native.to_string()))
    }
}

impl fmt::Debug for DTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DTypeRegistry")
            .field("libraries", &self.translators.keys().collect::<Vec<_>>())
            .finish()
    }
}
