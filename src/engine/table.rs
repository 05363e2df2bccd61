// Copyright © 2024 Pathway

use std::ops::Range;
use std::sync::Arc;

use arcstr::ArcStr;
use indexmap::IndexMap;
use itertools::Itertools as _;

use super::{DType, Error, Result, Value};

/// A typed, immutable column. Cloning shares the underlying values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    dtype: DType,
    is_list: bool,
    values: Arc<[Value]>,
}

impl Column {
    pub fn new(dtype: DType, values: impl IntoIterator<Item = Value>) -> Result<Self> {
        let values: Arc<[Value]> = values.into_iter().collect();
        if let Some(value) = values.iter().find(|value| !value.fits(dtype)) {
            return Err(Error::TypeMismatch {
                expected: dtype,
                value: value.clone(),
            });
        }
        Ok(Self {
            dtype,
            is_list: false,
            values,
        })
    }

    /// A column whose cells are lists of `dtype` elements (or nulls).
    pub fn new_list(dtype: DType, values: impl IntoIterator<Item = Value>) -> Result<Self> {
        let values: Arc<[Value]> = values.into_iter().collect();
        for value in values.iter() {
            match value {
                Value::None => {}
                Value::List(elements) => {
                    if let Some(element) = elements.iter().find(|element| !element.fits(dtype)) {
                        return Err(Error::TypeMismatch {
                            expected: dtype,
                            value: element.clone(),
                        });
                    }
                }
                other => {
                    return Err(Error::TypeMismatch {
                        expected: dtype,
                        value: other.clone(),
                    })
                }
            }
        }
        Ok(Self {
            dtype,
            is_list: true,
            values,
        })
    }

    pub fn empty(dtype: DType) -> Self {
        Self {
            dtype,
            is_list: false,
            values: Arc::new([]),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn is_list(&self) -> bool {
        self.is_list
    }

    /// A list column is ragged when its rows hold lists of different lengths.
    pub fn is_ragged(&self) -> bool {
        self.is_list
            && !self
                .values
                .iter()
                .filter_map(|value| value.as_list().ok().map(|list| list.len()))
                .all_equal()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, row: usize) -> Option<&Value> {
        self.values.get(row)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    pub fn slice(&self, range: Range<usize>) -> Self {
        Self {
            dtype: self.dtype,
            is_list: self.is_list,
            values: self.values[range].into(),
        }
    }

    fn concat<'a>(columns: impl IntoIterator<Item = &'a Self>) -> Result<Self> {
        let mut columns = columns.into_iter();
        let Some(first) = columns.next() else {
            return Ok(Self::empty(DType::Unknown));
        };
        let mut values = first.values.to_vec();
        for column in columns {
            if column.dtype != first.dtype || column.is_list != first.is_list {
                let value = column.values.first().cloned().unwrap_or_default();
                return Err(Error::TypeMismatch {
                    expected: first.dtype,
                    value,
                });
            }
            values.extend(column.values.iter().cloned());
        }
        Ok(Self {
            dtype: first.dtype,
            is_list: first.is_list,
            values: values.into(),
        })
    }
}

impl From<Vec<i64>> for Column {
    fn from(values: Vec<i64>) -> Self {
        Self {
            dtype: DType::Int64,
            is_list: false,
            values: values.into_iter().map(Value::from).collect(),
        }
    }
}

impl From<Vec<f64>> for Column {
    fn from(values: Vec<f64>) -> Self {
        Self {
            dtype: DType::Float64,
            is_list: false,
            values: values.into_iter().map(Value::from).collect(),
        }
    }
}

impl From<Vec<bool>> for Column {
    fn from(values: Vec<bool>) -> Self {
        Self {
            dtype: DType::Bool,
            is_list: false,
            values: values.into_iter().map(Value::from).collect(),
        }
    }
}

impl From<Vec<&str>> for Column {
    fn from(values: Vec<&str>) -> Self {
        Self {
            dtype: DType::String,
            is_list: false,
            values: values.into_iter().map(Value::from).collect(),
        }
    }
}

/// An ordered collection of equally long named columns.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Table {
    columns: IndexMap<ArcStr, Column>,
    num_rows: usize,
}

impl Table {
    pub fn new<N>(columns: impl IntoIterator<Item = (N, Column)>) -> Result<Self>
    where
        N: Into<ArcStr>,
    {
        let mut table = Self::default();
        for (name, column) in columns {
            let name = name.into();
            if table.columns.contains_key(&name) {
                return Err(Error::DuplicateColumn(name));
            }
            table.push_column(name, column)?;
        }
        Ok(table)
    }

    fn push_column(&mut self, name: ArcStr, column: Column) -> Result<()> {
        if self.columns.is_empty() {
            self.num_rows = column.len();
        } else if column.len() != self.num_rows {
            return Err(Error::LengthMismatch {
                expected: self.num_rows,
                actual: column.len(),
            });
        }
        self.columns.insert(name, column);
        Ok(())
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// True when the table holds no rows.
    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    pub fn column_names(&self) -> impl Iterator<Item = &ArcStr> {
        self.columns.keys()
    }

    pub fn columns(&self) -> impl Iterator<Item = (&ArcStr, &Column)> {
        self.columns.iter()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn select<S: AsRef<str>>(&self, names: impl IntoIterator<Item = S>) -> Result<Self> {
        let mut selected = IndexMap::new();
        let mut missing = Vec::new();
        for name in names {
            let name = name.as_ref();
            match self.columns.get_key_value(name) {
                Some((name, column)) => {
                    selected.insert(name.clone(), column.clone());
                }
                None => missing.push(ArcStr::from(name)),
            }
        }
        if !missing.is_empty() {
            return Err(Error::missing_columns(missing, "table selection"));
        }
        Ok(Self {
            columns: selected,
            num_rows: self.num_rows,
        })
    }

    /// Replaces the column if it already exists, keeping its position.
    pub fn with_column(mut self, name: impl Into<ArcStr>, column: Column) -> Result<Self> {
        let name = name.into();
        let replaces_only_column = self.columns.len() == 1 && self.columns.contains_key(&name);
        if !self.columns.is_empty() && !replaces_only_column && column.len() != self.num_rows {
            return Err(Error::LengthMismatch {
                expected: self.num_rows,
                actual: column.len(),
            });
        }
        self.num_rows = column.len();
        self.columns.insert(name, column);
        Ok(self)
    }

    /// Column-wise concatenation. A column name already present keeps its first occurrence.
    pub fn concat_columns(tables: impl IntoIterator<Item = Self>) -> Result<Self> {
        let mut result = Self::default();
        for table in tables {
            for (name, column) in table.columns {
                if !result.columns.contains_key(&name) {
                    result.push_column(name, column)?;
                }
            }
        }
        Ok(result)
    }

    /// Row-wise concatenation of tables sharing the same columns.
    pub fn concat_rows(tables: &[Self]) -> Result<Self> {
        let Some(first) = tables.first() else {
            return Ok(Self::default());
        };
        let mut result = Self::default();
        for name in first.columns.keys() {
            let parts: Vec<&Column> = tables
                .iter()
                .map(|table| {
                    table
                        .column(name)
                        .ok_or_else(|| Error::missing_columns([name.clone()], "row concatenation"))
                })
                .collect::<Result<_>>()?;
            result.push_column(name.clone(), Column::concat(parts)?)?;
        }
        Ok(result)
    }

    /// Splits the table into at most `partitions` contiguous, non-empty chunks.
    pub fn split(&self, partitions: usize) -> Vec<Self> {
        let partitions = partitions.clamp(1, self.num_rows.max(1));
        let chunk = self.num_rows.div_ceil(partitions).max(1);
        (0..partitions)
            .map(|i| {
                let start = (i * chunk).min(self.num_rows);
                let end = ((i + 1) * chunk).min(self.num_rows);
                Self {
                    columns: self
                        .columns
                        .iter()
                        .map(|(name, column)| (name.clone(), column.slice(start..end)))
                        .collect(),
                    num_rows: end - start,
                }
            })
            .filter(|table| !table.is_empty() || self.is_empty())
            .collect()
    }
}
