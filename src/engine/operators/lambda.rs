// Copyright © 2024 Pathway

use std::fmt;

use arcstr::ArcStr;

use crate::engine::error::DynResult;
use crate::engine::{Column, ColumnSelector, DType, Operator, Table};

type ColumnFn = dyn Fn(&Column) -> DynResult<Column> + Send + Sync;

/// Applies a user function to every selected column, keeping column names.
///
/// Unless an output dtype is declared, the produced dtype is only known after
/// running data through the function, so it has to be captured before a
/// checked transform.
pub struct Lambda {
    label: ArcStr,
    f: Box<ColumnFn>,
    dtype: Option<DType>,
}

impl Lambda {
    pub fn new(f: impl Fn(&Column) -> DynResult<Column> + Send + Sync + 'static) -> Self {
        Self {
            label: arcstr::literal!("Lambda"),
            f: Box::new(f),
            dtype: None,
        }
    }

    #[must_use]
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<ArcStr>) -> Self {
        self.label = label.into();
        self
    }
}

impl fmt::Debug for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lambda")
            .field("label", &self.label)
            .field("dtype", &self.dtype)
            .finish_non_exhaustive()
    }
}

impl Operator for Lambda {
    fn label(&self) -> ArcStr {
        self.label.clone()
    }

    fn transform(&self, selector: &ColumnSelector, table: Table) -> DynResult<Option<Table>> {
        let selected = table.select(selector.names())?;
        let columns = selected
            .columns()
            .map(|(name, column)| Ok((name.clone(), (self.f)(column)?)))
            .collect::<DynResult<Vec<_>>>()?;
        Ok(Some(Table::new(columns)?))
    }

    fn output_dtype(&self) -> Option<DType> {
        self.dtype
    }

    fn dynamic_dtypes(&self) -> bool {
        self.dtype.is_none()
    }
}
