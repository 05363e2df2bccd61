// Copyright © 2024 Pathway

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dagframe_engine::engine::error::DynResult;
use dagframe_engine::engine::operators::{Identity, Rename};
use dagframe_engine::engine::{
    Column, ColumnSchema, ColumnSelector, DType, Graph, NodeHandle, Operator, Schema, Table, Value,
};

pub fn schema(columns: &[(&str, DType)]) -> Schema {
    columns
        .iter()
        .map(|(name, dtype)| ColumnSchema::new(*name).with_dtype(*dtype))
        .collect()
}

/// Root schema `{a: int64, b: int64}`.
pub fn root_schema() -> Schema {
    schema(&[("a", DType::Int64), ("b", DType::Int64)])
}

/// Root table `{a: [1, 2], b: [5, 6]}`.
pub fn root_table() -> Table {
    Table::new([
        ("a", Column::from(vec![1_i64, 2])),
        ("b", Column::from(vec![5_i64, 6])),
    ])
    .expect("root table should be valid")
}

pub fn values(table: &Table, name: &str) -> Vec<Value> {
    table
        .column(name)
        .unwrap_or_else(|| panic!("column {name} should be present"))
        .values()
        .to_vec()
}

pub fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().copied().map(Value::from).collect()
}

pub fn floats(values: &[f64]) -> Vec<Value> {
    values.iter().copied().map(Value::from).collect()
}

pub fn names(table: &Table) -> Vec<&str> {
    table.column_names().map(|name| name.as_str()).collect()
}

pub fn schema_names(schema: &Schema) -> Vec<&str> {
    schema.column_names().map(|name| name.as_str()).collect()
}

pub struct RenameGraph {
    pub graph: Graph,
    pub identity: NodeHandle,
    pub rename: NodeHandle,
}

/// Identity over `{a}`, followed by a rename of `a` to `a2`.
pub fn rename_graph() -> eyre::Result<RenameGraph> {
    let mut graph = Graph::new(root_schema());
    let identity = graph.add_node(Identity, [], Some(ColumnSelector::from("a")))?;
    let rename = graph.apply(identity, Rename::new([("a", "a2")]))?;
    graph.set_output(rename)?;
    graph.construct(false)?;
    Ok(RenameGraph {
        graph,
        identity,
        rename,
    })
}

/// Passes data through unchanged and counts how often it ran.
#[derive(Debug, Default, Clone)]
pub struct CountingIdentity {
    pub calls: Arc<AtomicUsize>,
}

impl CountingIdentity {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Operator for CountingIdentity {
    fn transform(&self, _selector: &ColumnSelector, table: Table) -> DynResult<Option<Table>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(table))
    }
}
