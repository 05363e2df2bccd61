// Copyright © 2024 Pathway

use std::time::Instant;

use arcstr::ArcStr;
use indexmap::IndexMap;
use log::{debug, error, info};

use super::executor::{DtypeCapture, LocalExecutor, Target, TransformOptions};
use super::operator::FitStats;
use super::worker::clean_worker_cache;
use super::{
    ColumnSelector, Config, DType, Error, FitState, Graph, NodeHandle, Operator, Result, Session,
    SynchronousSession, Table,
};

/// Column layout and dtypes of a partitioned table, known without looking at
/// any partition.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableMeta {
    columns: IndexMap<ArcStr, DType>,
}

impl TableMeta {
    pub fn new<S: Into<ArcStr>>(columns: impl IntoIterator<Item = (S, DType)>) -> Self {
        Self {
            columns: columns
                .into_iter()
                .map(|(name, dtype)| (name.into(), dtype))
                .collect(),
        }
    }

    fn of(table: &Table) -> Self {
        Self::new(
            table
                .columns()
                .map(|(name, column)| (name.clone(), column.dtype())),
        )
    }

    pub fn column_names(&self) -> impl Iterator<Item = &ArcStr> {
        self.columns.keys()
    }

    pub fn dtype(&self, name: &str) -> Option<DType> {
        self.columns.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A table split row-wise into independently processed partitions.
#[derive(Clone, Debug, Default)]
pub struct PartitionedTable {
    partitions: Vec<Table>,
    meta: TableMeta,
}

impl PartitionedTable {
    pub fn new(partitions: Vec<Table>) -> Self {
        let meta = partitions.first().map(TableMeta::of).unwrap_or_default();
        Self { partitions, meta }
    }

    pub fn split(table: &Table, partitions: usize) -> Self {
        Self {
            partitions: table.split(partitions),
            meta: TableMeta::of(table),
        }
    }

    pub fn from_config(table: &Table, config: &Config) -> Self {
        Self::split(table, config.partitions())
    }

    pub fn partitions(&self) -> &[Table] {
        &self.partitions
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn num_rows(&self) -> usize {
        self.partitions.iter().map(Table::num_rows).sum()
    }

    pub fn meta(&self) -> &TableMeta {
        &self.meta
    }

    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Self> {
        let partitions = self
            .partitions
            .iter()
            .map(|partition| partition.select(names))
            .collect::<Result<_>>()?;
        let meta = TableMeta {
            columns: names
                .iter()
                .filter_map(|name| {
                    let (name, dtype) = self.meta.columns.get_key_value(name.as_ref())?;
                    Some((name.clone(), *dtype))
                })
                .collect(),
        };
        Ok(Self { partitions, meta })
    }

    /// Concatenates all partitions back into a single table.
    pub fn collect(&self) -> Result<Table> {
        Table::concat_rows(&self.partitions)
    }
}

/// Applies a [`LocalExecutor`] to every partition through a [`Session`] and
/// fits stateful operators by gathering per-partition statistics.
#[derive(Debug, Default)]
pub struct DistributedExecutor<S: Session = SynchronousSession> {
    executor: LocalExecutor,
    session: S,
}

impl DistributedExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: Session> DistributedExecutor<S> {
    pub fn with_session(session: S) -> Self {
        Self {
            executor: LocalExecutor::new(),
            session,
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    fn clear_worker_cache(&self) {
        self.session.run_on_all_workers(clean_worker_cache);
    }

    pub fn transform(
        &self,
        data: &PartitionedTable,
        graph: &Graph,
        target: impl Into<Target>,
        options: &TransformOptions,
    ) -> Result<PartitionedTable> {
        let (output, _) = self.run(data, graph, &target.into(), options, false)?;
        Ok(output)
    }

    /// Transforms every partition while recording observed dtypes into `graph`.
    /// The returned table's metadata reflects the captured dtypes.
    pub fn capture_dtypes(
        &self,
        data: &PartitionedTable,
        graph: &mut Graph,
        target: impl Into<Target>,
        options: &TransformOptions,
    ) -> Result<PartitionedTable> {
        let target = target.into();
        let (mut output, capture) = self.run(data, graph, &target, options, true)?;
        capture.apply(graph)?;
        let nodes = target.resolve(graph)?;
        output.meta = output_meta(data, graph, &nodes, options)?;
        Ok(output)
    }

    fn run(
        &self,
        data: &PartitionedTable,
        graph: &Graph,
        target: &Target,
        options: &TransformOptions,
        capture_dtypes: bool,
    ) -> Result<(PartitionedTable, DtypeCapture)> {
        let nodes = target.resolve(graph)?;
        self.clear_worker_cache();

        if nodes.is_empty() {
            let additional: Vec<ArcStr> = options.additional_columns().into_iter().collect();
            let output = if additional.is_empty() {
                data.clone()
            } else {
                data.select(additional.as_slice())?
            };
            return Ok((output, DtypeCapture::default()));
        }

        let meta = output_meta(data, graph, &nodes, options)?;
        let target = Target::Nodes(nodes);
        let executor = self.executor;
        let tasks: Vec<_> = data
            .partitions
            .iter()
            .enumerate()
            .map(|(index, partition)| {
                let target = &target;
                move || {
                    debug!("Transforming partition {index}");
                    executor.run(partition, graph, target, options, capture_dtypes)
                }
            })
            .collect();

        let mut partitions = Vec::with_capacity(tasks.len());
        let mut capture = DtypeCapture::default();
        for result in self.session.execute(tasks) {
            let (partition, observed) = result?;
            partitions.push(partition);
            capture.merge(observed);
        }
        Ok((PartitionedTable { partitions, meta }, capture))
    }

    /// Fits the stateful operators of `nodes` on the whole of `data`.
    ///
    /// Each node's upstream subgraph is evaluated with dtype capture, every partition
    /// is fitted as a separate task and `fit_finalize` runs once per node after all
    /// partial results are gathered. On failure the nodes are left unfit.
    pub fn fit(
        &self,
        data: &PartitionedTable,
        graph: &mut Graph,
        nodes: &[NodeHandle],
    ) -> Result<()> {
        let started = Instant::now();
        for &node in nodes {
            let node = graph.node(node)?;
            if !node.is_stateful() {
                return Err(Error::NotStateful {
                    operator: node.label(),
                });
            }
            node.ensure_constructed()?;
        }
        info!(
            "Fitting {} operators over {} partitions",
            nodes.len(),
            data.num_partitions()
        );

        for &node in nodes {
            graph.set_fit_state(node, FitState::Fitting)?;
        }
        if let Err(err) = self.fit_nodes(data, graph, nodes) {
            for &node in nodes {
                graph.set_fit_state(node, FitState::Unfit)?;
            }
            return Err(err);
        }
        for &node in nodes {
            graph.set_fit_state(node, FitState::Ready)?;
        }

        info!(
            "Fitted {} operators in {:.3}s",
            nodes.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Fits every stateful node of `graph`, stage by stage.
    pub fn fit_graph(&self, data: &PartitionedTable, graph: &mut Graph) -> Result<()> {
        for stage in graph.fit_stages()? {
            self.fit(data, graph, &stage)?;
        }
        Ok(())
    }

    fn fit_nodes(
        &self,
        data: &PartitionedTable,
        graph: &mut Graph,
        nodes: &[NodeHandle],
    ) -> Result<()> {
        let mut inputs = Vec::with_capacity(nodes.len());
        for &handle in nodes {
            let node = graph.node(handle)?;
            let upstream: Vec<NodeHandle> = node.parents_with_dependencies().collect();
            let mut upstream_columns = ColumnSelector::default();
            for upstream in &upstream {
                upstream_columns += &graph.node(*upstream)?.output_columns();
            }
            let additional: Vec<ArcStr> = node
                .input_columns()
                .names()
                .filter(|name| !upstream_columns.contains(name))
                .cloned()
                .collect();
            let options = TransformOptions::new().with_additional_columns(additional);
            inputs.push(self.capture_dtypes(data, graph, upstream, &options)?);
        }

        let partials = self.gather_stats(graph, nodes, &inputs)?;

        for (&handle, stats) in nodes.iter().zip(partials) {
            let label = graph.node(handle)?.label();
            let stat = graph
                .op_mut(handle)?
                .as_stat_mut()
                .ok_or_else(|| Error::NotStateful {
                    operator: label.clone(),
                })?;
            stat.fit_finalize(stats).map_err(|err| {
                error!("Failed to finalize operator {label}: {err}");
                Error::from(err)
            })?;
            graph.set_fit_state(handle, FitState::Fitted)?;
        }
        graph.construct(true)
    }

    /// Submits one fit task per node and partition, and blocks until all of them
    /// returned. Partials are grouped per node, in partition order.
    fn gather_stats(
        &self,
        graph: &Graph,
        nodes: &[NodeHandle],
        inputs: &[PartitionedTable],
    ) -> Result<Vec<Vec<FitStats>>> {
        let mut tasks = Vec::new();
        let mut owners = Vec::new();
        for (index, (&handle, input)) in nodes.iter().zip(inputs).enumerate() {
            let node = graph.node(handle)?;
            let stat = node
                .op()
                .and_then(Operator::as_stat)
                .ok_or_else(|| Error::NotStateful {
                    operator: node.label(),
                })?;
            let selector = node.input_columns();
            for partition in input.partitions() {
                tasks.push(move || {
                    stat.fit(selector, partition).map_err(|err| {
                        error!("Failed to fit operator {}: {err}", stat.label());
                        Error::from(err)
                    })
                });
                owners.push(index);
            }
        }

        let mut partials: Vec<Vec<FitStats>> = nodes.iter().map(|_| Vec::new()).collect();
        for (owner, result) in owners.into_iter().zip(self.session.execute(tasks)) {
            partials[owner].push(result?);
        }
        Ok(partials)
    }
}

/// Predicts the result layout: declared output columns of every node followed by
/// the additional root columns. Dtypes come from `options`, then the propagated
/// schema, then default to `float64`.
fn output_meta(
    data: &PartitionedTable,
    graph: &Graph,
    nodes: &[NodeHandle],
    options: &TransformOptions,
) -> Result<TableMeta> {
    let explicit = options.output_dtypes();
    let mut columns: IndexMap<ArcStr, DType> = IndexMap::new();
    let mut declare = |name: &ArcStr, propagated: Option<DType>| {
        if columns.contains_key(name) {
            return;
        }
        let dtype = explicit
            .and_then(|dtypes| dtypes.get(name).copied())
            .or(propagated.filter(|dtype| dtype.is_known()))
            .unwrap_or(DType::Float64);
        columns.insert(name.clone(), dtype);
    };

    for &handle in nodes {
        for column in graph.node(handle)?.output_schema() {
            declare(column.name(), Some(column.dtype()));
        }
    }
    for name in options.additional_columns() {
        let propagated = data
            .meta
            .dtype(&name)
            .or_else(|| graph.root_schema().get(&name).map(|column| column.dtype()));
        declare(&name, propagated);
    }
    Ok(TableMeta { columns })
}
