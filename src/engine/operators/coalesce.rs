// Copyright © 2024 Pathway

use arcstr::ArcStr;
use itertools::Itertools;

use crate::engine::error::DynResult;
use crate::engine::operator::ColumnMapping;
use crate::engine::{Column, ColumnSelector, DType, Error, Operator, Schema, Table, Value};

/// Merges the selected columns into one, taking per row the first non-null value.
#[derive(Debug, Clone)]
pub struct Coalesce {
    output: ArcStr,
}

impl Coalesce {
    pub fn new(output: impl Into<ArcStr>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

impl Operator for Coalesce {
    fn column_mapping(&self, selector: &ColumnSelector) -> ColumnMapping {
        [(self.output.clone(), selector.names().cloned().collect())]
            .into_iter()
            .collect()
    }

    fn validate_schemas(
        &self,
        _parents_schema: &Schema,
        _deps_schema: &Schema,
        input_schema: &Schema,
        _output_schema: &Schema,
        strict_dtypes: bool,
    ) -> DynResult<()> {
        if !strict_dtypes {
            return Ok(());
        }
        let dtypes: Vec<DType> = input_schema
            .iter()
            .map(|column| column.dtype())
            .filter(|dtype| dtype.is_known())
            .unique()
            .collect();
        if let &[expected, actual, ..] = dtypes.as_slice() {
            return Err(Error::DtypeMismatch {
                operator: self.label(),
                column: self.output.clone(),
                expected,
                actual,
            }
            .into());
        }
        Ok(())
    }

    fn transform(&self, selector: &ColumnSelector, table: Table) -> DynResult<Option<Table>> {
        let selected = table.select(selector.names())?;
        let sources: Vec<&Column> = selected.columns().map(|(_, column)| column).collect();
        let dtype = sources.first().map_or(DType::Unknown, |column| column.dtype());
        let values = (0..selected.num_rows()).map(|row| {
            sources
                .iter()
                .filter_map(|column| column.get(row))
                .find(|value| !value.is_none())
                .cloned()
                .unwrap_or(Value::None)
        });
        let column = Column::new(dtype, values)?;
        Ok(Some(Table::new([(self.output.clone(), column)])?))
    }
}
