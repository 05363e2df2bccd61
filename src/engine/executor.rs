// Copyright © 2024 Pathway

use std::collections::HashMap;

use arcstr::ArcStr;
use indexmap::{IndexMap, IndexSet};
use log::{debug, error};

use super::{ColumnSchema, DType, Error, Graph, Node, NodeHandle, Result, Table};

/// What to evaluate: the graph's output node, one node, or several nodes whose
/// outputs are concatenated column-wise in the given order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Target {
    #[default]
    Graph,
    Node(NodeHandle),
    Nodes(Vec<NodeHandle>),
}

impl Target {
    /// Checks every handle against `graph`, and that its schemas were
    /// computed, before anything runs.
    pub fn resolve(&self, graph: &Graph) -> Result<Vec<NodeHandle>> {
        let nodes = match self {
            Self::Graph => vec![graph.output_node()?],
            Self::Node(node) => vec![*node],
            Self::Nodes(nodes) => nodes.clone(),
        };
        for node in &nodes {
            graph.node(*node)?.ensure_constructed()?;
        }
        Ok(nodes)
    }
}

impl From<NodeHandle> for Target {
    fn from(node: NodeHandle) -> Self {
        Self::Node(node)
    }
}

impl From<Vec<NodeHandle>> for Target {
    fn from(nodes: Vec<NodeHandle>) -> Self {
        Self::Nodes(nodes)
    }
}

impl From<&[NodeHandle]> for Target {
    fn from(nodes: &[NodeHandle]) -> Self {
        Self::Nodes(nodes.to_vec())
    }
}

impl From<&Graph> for Target {
    fn from(_graph: &Graph) -> Self {
        Self::Graph
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransformOptions {
    output_dtypes: Option<IndexMap<ArcStr, DType>>,
    additional_columns: Vec<ArcStr>,
}

impl TransformOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit dtypes of the result, used by executors that must announce the
    /// output layout before running anything.
    #[must_use]
    pub fn with_output_dtypes<S: Into<ArcStr>>(
        mut self,
        dtypes: impl IntoIterator<Item = (S, DType)>,
    ) -> Self {
        self.output_dtypes = Some(
            dtypes
                .into_iter()
                .map(|(name, dtype)| (name.into(), dtype))
                .collect(),
        );
        self
    }

    /// Root columns appended to the result after all targets.
    #[must_use]
    pub fn with_additional_columns<S: Into<ArcStr>>(
        mut self,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.additional_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn output_dtypes(&self) -> Option<&IndexMap<ArcStr, DType>> {
        self.output_dtypes.as_ref()
    }

    /// Requested additional columns with duplicates removed, first occurrence kept.
    pub fn additional_columns(&self) -> IndexSet<ArcStr> {
        self.additional_columns.iter().cloned().collect()
    }
}

/// Column descriptors observed while running real data, keyed by node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DtypeCapture {
    observed: IndexMap<NodeHandle, IndexMap<ArcStr, ColumnSchema>>,
}

impl DtypeCapture {
    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }

    pub fn get(&self, node: NodeHandle, column: &str) -> Option<&ColumnSchema> {
        self.observed.get(&node)?.get(column)
    }

    fn record(&mut self, node: NodeHandle, column: ColumnSchema) {
        self.observed
            .entry(node)
            .or_default()
            .insert(column.name().clone(), column);
    }

    /// Later observations replace earlier ones for the same column.
    pub fn merge(&mut self, other: Self) {
        for (node, columns) in other.observed {
            for column in columns.into_values() {
                self.record(node, column);
            }
        }
    }

    /// Overwrites the output descriptors of `graph` with the observed ones.
    pub fn apply(self, graph: &mut Graph) -> Result<()> {
        for (node, columns) in self.observed {
            for column in columns.into_values() {
                graph.record_output_column(node, column)?;
            }
        }
        Ok(())
    }
}

/// Evaluates a graph against a single in-memory table, depth first.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Fails with [`Error::DtypeMismatch`] if an operator produces a non-empty column
    /// whose dtype differs from the propagated one.
    pub fn transform(
        &self,
        table: &Table,
        graph: &Graph,
        target: impl Into<Target>,
        options: &TransformOptions,
    ) -> Result<Table> {
        let (output, _) = self.run(table, graph, &target.into(), options, false)?;
        Ok(output)
    }

    /// Like [`LocalExecutor::transform`], but records the dtypes that operators
    /// actually produce into the output schemas of `graph`.
    pub fn capture_dtypes(
        &self,
        table: &Table,
        graph: &mut Graph,
        target: impl Into<Target>,
        options: &TransformOptions,
    ) -> Result<Table> {
        let (output, capture) = self.run(table, graph, &target.into(), options, true)?;
        capture.apply(graph)?;
        Ok(output)
    }

    pub(crate) fn run(
        &self,
        table: &Table,
        graph: &Graph,
        target: &Target,
        options: &TransformOptions,
        capture_dtypes: bool,
    ) -> Result<(Table, DtypeCapture)> {
        let nodes = target.resolve(graph)?;
        let mut run = Run {
            graph,
            root: table,
            capture: capture_dtypes.then(DtypeCapture::default),
            outputs: HashMap::new(),
        };

        let mut output: Option<Table> = None;
        for node in nodes {
            let transformed = run.node_output(node)?;
            output = Some(combine(graph.node(node)?, transformed, output)?);
        }
        let mut output = output.unwrap_or_default();

        let additional: Vec<ArcStr> = options
            .additional_columns()
            .into_iter()
            .filter(|name| !output.contains(name))
            .collect();
        if !additional.is_empty() {
            output = Table::concat_columns([output, table.select(&additional)?])?;
        }

        Ok((output, run.capture.unwrap_or_default()))
    }
}

struct Run<'a> {
    graph: &'a Graph,
    root: &'a Table,
    capture: Option<DtypeCapture>,
    outputs: HashMap<NodeHandle, Table>,
}

impl Run<'_> {
    fn node_output(&mut self, handle: NodeHandle) -> Result<Table> {
        if let Some(output) = self.outputs.get(&handle) {
            return Ok(output.clone());
        }
        self.graph.node(handle)?.ensure_constructed()?;
        let input = self.build_input(handle)?;
        let output = self.apply(handle, input)?;
        self.outputs.insert(handle, output.clone());
        Ok(output)
    }

    fn root_columns(&self, node: &Node, names: &[ArcStr]) -> Result<Table> {
        self.root.select(names).map_err(|err| match err {
            Error::MissingColumns { columns, .. } => Error::missing_columns(
                columns,
                format!("root table for operator {}", node.label()),
            ),
            other => other,
        })
    }

    fn build_input(&mut self, handle: NodeHandle) -> Result<Table> {
        let graph = self.graph;
        let node = graph.node(handle)?;

        if !node.has_upstream() {
            let names: IndexSet<ArcStr> = node
                .input_schema()
                .column_names()
                .chain(node.dependency_columns().names())
                .cloned()
                .collect();
            let names: Vec<ArcStr> = names.into_iter().collect();
            return self.root_columns(node, &names);
        }

        let mut input: Option<Table> = None;
        let mut seen: IndexSet<ArcStr> = IndexSet::new();
        for upstream in node.parents_with_dependencies() {
            let upstream_columns: Vec<ArcStr> = graph
                .node(upstream)?
                .output_schema()
                .column_names()
                .cloned()
                .collect();
            let upstream_output = self.node_output(upstream)?;
            input = Some(match input {
                None => {
                    seen.extend(upstream_columns.iter().cloned());
                    upstream_output.select(&upstream_columns)?
                }
                Some(input) => {
                    let new_columns: Vec<ArcStr> = upstream_columns
                        .into_iter()
                        .filter(|name| seen.insert(name.clone()))
                        .collect();
                    Table::concat_columns([input, upstream_output.select(&new_columns)?])?
                }
            });
        }
        let input = input.unwrap_or_default();

        let missing: IndexSet<ArcStr> = node
            .input_schema()
            .column_names()
            .filter(|name| !seen.contains(*name))
            .chain(node.dependency_columns().names())
            .filter(|name| !input.contains(name))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(input);
        }
        let missing: Vec<ArcStr> = missing.into_iter().collect();
        debug!(
            "Fetching {} columns for {} from the root table",
            missing.len(),
            node.label()
        );
        let extra = self.root_columns(node, &missing)?;
        Table::concat_columns([input, extra])
    }

    fn apply(&mut self, handle: NodeHandle, input: Table) -> Result<Table> {
        let graph = self.graph;
        let node = graph.node(handle)?;
        let Some(op) = node.op() else {
            return Ok(input);
        };
        if self.capture.is_none() && node.is_stateful() && !node.fit_state().is_fitted() {
            return Err(Error::NotFitted {
                operator: op.label(),
            });
        }

        let selection = node.input_columns().resolve(node.input_schema())?;
        let output = op
            .transform(&selection, input)
            .map_err(|err| {
                error!("Failed to transform operator {}: {err}", op.label());
                Error::from(err)
            })?
            .ok_or_else(|| Error::MissingOutput {
                operator: op.label(),
            })?;

        for expected in node.output_schema().iter() {
            let column = output.column(expected.name()).ok_or_else(|| {
                Error::missing_columns(
                    [expected.name().clone()],
                    format!("output of operator {}", op.label()),
                )
            })?;
            let observed = expected
                .clone()
                .with_dtype(column.dtype())
                .with_list(column.is_list(), column.is_ragged());
            match &mut self.capture {
                Some(capture) => capture.record(handle, observed),
                None if !output.is_empty() && expected.dtype() != observed.dtype() => {
                    let err = Error::DtypeMismatch {
                        operator: op.label(),
                        column: expected.name().clone(),
                        expected: expected.dtype(),
                        actual: observed.dtype(),
                    };
                    error!("Failed to transform operator {}: {err}", op.label());
                    return Err(err);
                }
                None => {}
            }
        }
        Ok(output)
    }
}

/// Appends the declared output columns of `node`, in declared order.
fn combine(node: &Node, transformed: Table, output: Option<Table>) -> Result<Table> {
    let names: Vec<ArcStr> = node.output_schema().column_names().cloned().collect();
    let transformed = transformed.select(&names)?;
    match output {
        None => Ok(transformed),
        Some(output) => Table::concat_columns([output, transformed]),
    }
}
