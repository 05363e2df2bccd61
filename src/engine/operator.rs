// Copyright © 2024 Pathway

use std::any::Any;

use arcstr::ArcStr;
use bitflags::bitflags;
use indexmap::IndexMap;

use super::error::DynResult;
use super::{
    ColumnSchema, ColumnSelector, DType, Error, NodeHandle, Properties, Result, Schema, Table, Tag,
};

/// Output column name to the input columns it is derived from.
pub type ColumnMapping = IndexMap<ArcStr, Vec<ArcStr>>;

/// Partial statistic computed by [`StatOperator::fit`] on a single partition.
pub type FitStats = Box<dyn Any + Send>;

bitflags! {
    /// In-memory table representations an operator can consume and produce.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Supports: u8 {
        const CPU_DATAFRAME = 1;
        const GPU_DATAFRAME = 1 << 1;
        const CPU_DICT_ARRAY = 1 << 2;
        const GPU_DICT_ARRAY = 1 << 3;
    }
}

/// Side input of an operator that is not part of the main parent chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    /// Columns read straight from the root table.
    Columns(ColumnSelector),
    /// Output of another node of the same graph.
    Node(NodeHandle),
}

impl From<ColumnSelector> for Dependency {
    fn from(selector: ColumnSelector) -> Self {
        Self::Columns(selector)
    }
}

impl From<NodeHandle> for Dependency {
    fn from(handle: NodeHandle) -> Self {
        Self::Node(handle)
    }
}

/// A unit of column transformation with a statically computable schema effect.
///
/// Every method has a default; concrete operators override the hooks they need.
/// Schema hooks must not depend on data, and [`Operator::transform`] must produce
/// exactly the columns declared by [`Operator::column_mapping`].
pub trait Operator: Send + Sync {
    fn label(&self) -> ArcStr {
        let name = std::any::type_name::<Self>();
        name.rsplit("::").next().unwrap_or(name).into()
    }

    fn compute_selector(
        &self,
        input_schema: &Schema,
        selector: Option<&ColumnSelector>,
        _parents_selector: &ColumnSelector,
        _dependencies_selector: &ColumnSelector,
    ) -> Result<ColumnSelector> {
        let selector = selector.cloned().unwrap_or_else(ColumnSelector::all);
        validate_matching_columns(self, input_schema, &selector, "compute_selector")?;
        selector.resolve(input_schema)
    }

    fn compute_input_schema(
        &self,
        _root_schema: &Schema,
        parents_schema: &Schema,
        deps_schema: &Schema,
        selector: &ColumnSelector,
    ) -> Result<Schema> {
        let combined = parents_schema + deps_schema;
        validate_matching_columns(self, &combined, selector, "compute_input_schema")?;
        Ok(combined)
    }

    fn compute_output_schema(
        &self,
        input_schema: &Schema,
        selector: &ColumnSelector,
        prev_output_schema: Option<&Schema>,
    ) -> Result<Schema> {
        validate_matching_columns(self, input_schema, selector, "compute_output_schema")?;
        let selector = selector.resolve(input_schema)?;

        let mut output_schema = Schema::default();
        for (output_name, input_names) in self.column_mapping(&selector) {
            let sources = input_schema.select(&input_names).map_err(|_| {
                Error::missing_columns(
                    input_names
                        .iter()
                        .filter(|name| !input_schema.contains(name))
                        .cloned(),
                    format!("operator {} during compute_output_schema", self.label()),
                )
            })?;
            output_schema.insert(self.compute_column_schema(&output_name, &sources));
        }

        if self.dynamic_dtypes() {
            if let Some(prev_output_schema) = prev_output_schema {
                output_schema = output_schema
                    .iter()
                    .map(|column| match prev_output_schema.get(column.name()) {
                        Some(previous) => column.clone().with_dtype(previous.dtype()),
                        None => column.clone(),
                    })
                    .collect();
            }
        }

        Ok(output_schema)
    }

    /// Builds the descriptor of one output column from its source columns.
    fn compute_column_schema(&self, name: &ArcStr, sources: &Schema) -> ColumnSchema {
        let column = ColumnSchema::new(name.clone());
        let column = self.compute_dtype(column, sources);
        let column = self.compute_tags(column, sources);
        self.compute_properties(column, sources)
    }

    fn compute_dtype(&self, column: ColumnSchema, sources: &Schema) -> ColumnSchema {
        let mut column = match sources.iter().next() {
            Some(source) => column
                .with_dtype(source.dtype())
                .with_shape(source.shape().clone())
                .with_list(source.is_list(), source.is_ragged()),
            None => column,
        };
        if let Some(dtype) = self.output_dtype() {
            let is_list = sources.iter().any(ColumnSchema::is_list);
            let is_ragged = sources.iter().any(ColumnSchema::is_ragged);
            column = column.with_dtype(dtype).with_list(is_list, is_ragged);
        }
        column
    }

    fn compute_tags(&self, column: ColumnSchema, sources: &Schema) -> ColumnSchema {
        let column = match sources.iter().next() {
            Some(source) => column.with_tags(source.tags().iter().cloned()),
            None => column,
        };
        column.with_tags(self.output_tags())
    }

    fn compute_properties(&self, column: ColumnSchema, sources: &Schema) -> ColumnSchema {
        let mut properties = sources
            .iter()
            .next()
            .map(|source| source.properties().clone())
            .unwrap_or_default();
        properties.extend(self.output_properties());
        column.with_properties(properties)
    }

    /// Identity by default: every selected column produces a same-named output.
    fn column_mapping(&self, selector: &ColumnSelector) -> ColumnMapping {
        selector
            .names()
            .map(|name| (name.clone(), vec![name.clone()]))
            .collect()
    }

    fn output_column_names(&self, selector: &ColumnSelector) -> ColumnSelector {
        self.column_mapping(selector).into_keys().collect()
    }

    /// Rejects incompatible schema combinations by returning an error.
    fn validate_schemas(
        &self,
        _parents_schema: &Schema,
        _deps_schema: &Schema,
        _input_schema: &Schema,
        _output_schema: &Schema,
        _strict_dtypes: bool,
    ) -> DynResult<()> {
        Ok(())
    }

    /// Applies the operator to the selected columns of `table`.
    /// Returning `Ok(None)` is reported as a missing output.
    fn transform(&self, _selector: &ColumnSelector, table: Table) -> DynResult<Option<Table>> {
        Ok(Some(table))
    }

    fn dependencies(&self) -> Vec<Dependency> {
        Vec::new()
    }

    fn supports(&self) -> Supports {
        Supports::CPU_DATAFRAME | Supports::GPU_DATAFRAME
    }

    fn output_dtype(&self) -> Option<DType> {
        None
    }

    fn output_tags(&self) -> Vec<Tag> {
        Vec::new()
    }

    fn output_properties(&self) -> Properties {
        Properties::new()
    }

    /// Output dtypes can only be learned by running data through the operator.
    fn dynamic_dtypes(&self) -> bool {
        false
    }

    fn as_stat(&self) -> Option<&dyn StatOperator> {
        None
    }

    fn as_stat_mut(&mut self) -> Option<&mut dyn StatOperator> {
        None
    }
}

/// An operator that learns a global statistic before it can transform.
///
/// `fit` runs once per partition, possibly on different workers; `fit_finalize`
/// runs once with every partial result after all of them are gathered.
pub trait StatOperator: Operator {
    fn fit(&self, selector: &ColumnSelector, table: &Table) -> DynResult<FitStats>;

    fn fit_finalize(&mut self, stats: Vec<FitStats>) -> DynResult<()>;

    /// Forgets learned statistics.
    fn clear(&mut self) {}
}

pub(crate) fn validate_matching_columns<O: Operator + ?Sized>(
    operator: &O,
    schema: &Schema,
    selector: &ColumnSelector,
    method: &str,
) -> Result<()> {
    let missing: Vec<ArcStr> = selector
        .names()
        .filter(|name| !schema.contains(name))
        .cloned()
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::missing_columns(
            missing,
            format!("operator {} during {method}", operator.label()),
        ))
    }
}
