// Copyright © 2024 Pathway

use std::collections::HashMap;
use std::fmt;

use arcstr::ArcStr;
use id_arena::{Arena, ArenaBehavior};
use indexmap::IndexSet;
use log::{debug, error};

use super::{ColumnSchema, ColumnSelector, Config, Dependency, Error, Operator, Result, Schema};

macro_rules! define_handle {
    ($handle:ident) => {
        #[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
        pub struct $handle {
            arena_id: u32,
            index: u32,
        }

        impl ArenaBehavior for $handle {
            type Id = Self;

            fn new_id(arena_id: u32, index: usize) -> Self {
                let index = index.try_into().unwrap();
                Self { arena_id, index }
            }

            fn arena_id(handle: Self) -> u32 {
                handle.arena_id
            }

            fn index(handle: Self) -> usize {
                handle.index.try_into().unwrap()
            }
        }
    };
}

define_handle!(NodeHandle);

/// Lifecycle of a node whose operator learns statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FitState {
    #[default]
    Unfit,
    Fitting,
    Fitted,
    Ready,
}

impl FitState {
    pub fn is_fitted(self) -> bool {
        matches!(self, Self::Fitted | Self::Ready)
    }
}

pub struct Node {
    op: Option<Box<dyn Operator>>,
    parents: Vec<NodeHandle>,
    dependencies: Vec<NodeHandle>,
    dependency_columns: ColumnSelector,
    selector: Option<ColumnSelector>,
    input_columns: ColumnSelector,
    input_schema: Schema,
    output_schema: Schema,
    constructed: bool,
    fit_state: FitState,
}

impl Node {
    fn new(
        op: Option<Box<dyn Operator>>,
        parents: Vec<NodeHandle>,
        selector: Option<ColumnSelector>,
    ) -> Self {
        Self {
            op,
            parents,
            dependencies: Vec::new(),
            dependency_columns: ColumnSelector::default(),
            selector,
            input_columns: ColumnSelector::default(),
            input_schema: Schema::default(),
            output_schema: Schema::default(),
            constructed: false,
            fit_state: FitState::default(),
        }
    }

    pub fn op(&self) -> Option<&dyn Operator> {
        self.op.as_deref()
    }

    pub fn label(&self) -> ArcStr {
        match &self.op {
            Some(op) => op.label(),
            None => arcstr::literal!("Selection"),
        }
    }

    pub fn parents(&self) -> &[NodeHandle] {
        &self.parents
    }

    pub fn dependencies(&self) -> &[NodeHandle] {
        &self.dependencies
    }

    pub fn parents_with_dependencies(
        &self,
    ) -> impl DoubleEndedIterator<Item = NodeHandle> + Clone + '_ {
        self.parents.iter().chain(&self.dependencies).copied()
    }

    pub fn has_upstream(&self) -> bool {
        !self.parents.is_empty() || !self.dependencies.is_empty()
    }

    /// Columns named directly as dependencies, read from the root table.
    pub fn dependency_columns(&self) -> &ColumnSelector {
        &self.dependency_columns
    }

    pub fn selector(&self) -> Option<&ColumnSelector> {
        self.selector.as_ref()
    }

    /// The selector as resolved during schema propagation.
    pub fn input_columns(&self) -> &ColumnSelector {
        &self.input_columns
    }

    pub fn input_schema(&self) -> &Schema {
        &self.input_schema
    }

    pub fn output_schema(&self) -> &Schema {
        &self.output_schema
    }

    pub fn output_columns(&self) -> ColumnSelector {
        self.output_schema.column_names().cloned().collect()
    }

    pub fn is_stateful(&self) -> bool {
        self.op.as_ref().is_some_and(|op| op.as_stat().is_some())
    }

    pub fn fit_state(&self) -> FitState {
        self.fit_state
    }

    /// Whether the schemas of this node are up to date with its edges.
    pub fn is_constructed(&self) -> bool {
        self.constructed
    }

    pub(crate) fn ensure_constructed(&self) -> Result<()> {
        if self.constructed {
            Ok(())
        } else {
            Err(Error::NotConstructed {
                operator: self.label(),
            })
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("op", &self.label())
            .field("parents", &self.parents)
            .field("dependencies", &self.dependencies)
            .field("selector", &self.selector)
            .field("output_schema", &self.output_schema)
            .field("constructed", &self.constructed)
            .field("fit_state", &self.fit_state)
            .finish()
    }
}

/// A DAG of operators over named columns. The graph owns every node;
/// edges are handles into the same arena.
pub struct Graph {
    nodes: Arena<Node, NodeHandle>,
    root_schema: Schema,
    output: Option<NodeHandle>,
    strict_dtypes: bool,
}

impl Graph {
    pub fn new(root_schema: Schema) -> Self {
        Self {
            nodes: Arena::new(),
            root_schema,
            output: None,
            strict_dtypes: false,
        }
    }

    #[must_use]
    pub fn with_strict_dtypes(mut self, strict_dtypes: bool) -> Self {
        self.strict_dtypes = strict_dtypes;
        self
    }

    #[must_use]
    pub fn with_config(self, config: &Config) -> Self {
        self.with_strict_dtypes(config.strict_dtypes())
    }

    pub fn strict_dtypes(&self) -> bool {
        self.strict_dtypes
    }

    pub fn root_schema(&self) -> &Schema {
        &self.root_schema
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 0
    }

    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.nodes.get(handle).is_some()
    }

    pub fn node(&self, handle: NodeHandle) -> Result<&Node> {
        self.nodes.get(handle).ok_or(Error::UnsupportedGraphArgument)
    }

    fn node_mut(&mut self, handle: NodeHandle) -> Result<&mut Node> {
        self.nodes
            .get_mut(handle)
            .ok_or(Error::UnsupportedGraphArgument)
    }

    /// Adds a pass-through node reading `selector` straight from the root table.
    pub fn select(&mut self, selector: impl Into<ColumnSelector>) -> NodeHandle {
        self.nodes
            .alloc(Node::new(None, Vec::new(), Some(selector.into())))
    }

    /// Adds a node applying `op` to the outputs of `parents`. Without parents the
    /// operator reads the columns named by `selector` from the root table.
    pub fn add_node(
        &mut self,
        op: impl Operator + 'static,
        parents: impl IntoIterator<Item = NodeHandle>,
        selector: Option<ColumnSelector>,
    ) -> Result<NodeHandle> {
        let parents: Vec<NodeHandle> = parents.into_iter().collect();
        for parent in &parents {
            self.node(*parent)?;
        }
        let dependencies = op.dependencies();
        let handle = self
            .nodes
            .alloc(Node::new(Some(Box::new(op)), parents, selector));
        for dependency in dependencies {
            self.add_dependency(handle, dependency)?;
        }
        Ok(handle)
    }

    /// Shorthand for a single-parent node consuming every parent column.
    pub fn apply(&mut self, parent: NodeHandle, op: impl Operator + 'static) -> Result<NodeHandle> {
        self.add_node(op, [parent], None)
    }

    pub fn add_dependency(
        &mut self,
        handle: NodeHandle,
        dependency: impl Into<Dependency>,
    ) -> Result<()> {
        self.node(handle)?;
        match dependency.into() {
            Dependency::Columns(selector) => {
                let input = self.select(selector.clone());
                let node = self.node_mut(handle)?;
                node.dependencies.push(input);
                node.dependency_columns += &selector;
                node.constructed = false;
            }
            Dependency::Node(dependency) => {
                self.node(dependency)?;
                let node = self.node_mut(handle)?;
                node.dependencies.push(dependency);
                node.constructed = false;
            }
        }
        Ok(())
    }

    pub fn set_output(&mut self, handle: NodeHandle) -> Result<()> {
        self.node(handle)?;
        self.output = Some(handle);
        Ok(())
    }

    pub fn output_node(&self) -> Result<NodeHandle> {
        self.output.ok_or(Error::OutputNodeNotSet)
    }

    pub fn output_schema(&self) -> Result<&Schema> {
        Ok(self.node(self.output_node()?)?.output_schema())
    }

    fn targets(&self) -> Vec<NodeHandle> {
        match self.output {
            Some(output) => vec![output],
            None => self.nodes.iter().map(|(handle, _)| handle).collect(),
        }
    }

    /// Nodes reachable from the output node (or every node, if no output is set),
    /// each listed after all of its parents and dependencies.
    pub fn nodes(&self) -> Result<Vec<NodeHandle>> {
        self.post_order(&self.targets())
    }

    pub fn post_order(&self, targets: &[NodeHandle]) -> Result<Vec<NodeHandle>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: HashMap<NodeHandle, Mark> = HashMap::new();
        let mut order = Vec::new();
        for &target in targets {
            let mut stack = vec![(target, false)];
            while let Some((handle, expanded)) = stack.pop() {
                if expanded {
                    marks.insert(handle, Mark::Done);
                    order.push(handle);
                    continue;
                }
                match marks.get(&handle) {
                    Some(Mark::Done) => continue,
                    Some(Mark::Visiting) => return Err(Error::CycleDetected),
                    None => {}
                }
                marks.insert(handle, Mark::Visiting);
                stack.push((handle, true));
                for upstream in self.node(handle)?.parents_with_dependencies().rev() {
                    match marks.get(&upstream) {
                        Some(Mark::Visiting) => return Err(Error::CycleDetected),
                        Some(Mark::Done) => {}
                        None => stack.push((upstream, false)),
                    }
                }
            }
        }
        Ok(order)
    }

    pub fn stateful_nodes(&self) -> Result<Vec<NodeHandle>> {
        let mut stateful = Vec::new();
        for handle in self.nodes()? {
            if self.node(handle)?.is_stateful() {
                stateful.push(handle);
            }
        }
        Ok(stateful)
    }

    /// Stateful nodes grouped so that every node only depends on statistics
    /// fitted in earlier stages.
    pub fn fit_stages(&self) -> Result<Vec<Vec<NodeHandle>>> {
        let mut levels: HashMap<NodeHandle, usize> = HashMap::new();
        let mut stages: Vec<Vec<NodeHandle>> = Vec::new();
        for handle in self.nodes()? {
            let node = self.node(handle)?;
            let mut level = 0;
            for upstream in node.parents_with_dependencies() {
                let upstream_node = self.node(upstream)?;
                let upstream_level = levels.get(&upstream).copied().unwrap_or_default()
                    + usize::from(upstream_node.is_stateful());
                level = level.max(upstream_level);
            }
            levels.insert(handle, level);
            if node.is_stateful() {
                if stages.len() <= level {
                    stages.resize_with(level + 1, Vec::new);
                }
                stages[level].push(handle);
            }
        }
        stages.retain(|stage| !stage.is_empty());
        Ok(stages)
    }

    /// Root-table columns the given output column of `handle` is derived from.
    pub fn column_lineage(&self, handle: NodeHandle, column: &str) -> Result<IndexSet<ArcStr>> {
        let node = self.node(handle)?;
        if !node.output_schema.contains(column) {
            return Err(Error::missing_columns(
                [ArcStr::from(column)],
                format!("output of operator {}", node.label()),
            ));
        }
        let sources: Vec<ArcStr> = match node.op() {
            Some(op) => op
                .column_mapping(&node.input_columns)
                .get(column)
                .cloned()
                .unwrap_or_default(),
            None => vec![ArcStr::from(column)],
        };

        let mut lineage = IndexSet::new();
        for source in sources {
            let producer = node
                .parents_with_dependencies()
                .find(|upstream| {
                    self.nodes
                        .get(*upstream)
                        .is_some_and(|upstream| upstream.output_schema.contains(&source))
                });
            match producer {
                Some(producer) => lineage.extend(self.column_lineage(producer, &source)?),
                None => {
                    lineage.insert(source);
                }
            }
        }
        Ok(lineage)
    }

    /// Runs schema propagation over every node of the graph, parents first,
    /// including nodes the output node does not reach. With `preserve_dtypes`
    /// operators with dynamic dtypes keep the dtypes currently recorded in their
    /// output schema.
    pub fn construct(&mut self, preserve_dtypes: bool) -> Result<()> {
        let all: Vec<NodeHandle> = self.nodes.iter().map(|(handle, _)| handle).collect();
        let order = self.post_order(&all)?;
        for handle in order {
            self.compute_schemas(handle, preserve_dtypes)?;
        }
        Ok(())
    }

    fn compute_schemas(&mut self, handle: NodeHandle, preserve_dtypes: bool) -> Result<()> {
        let node = self.node(handle)?;

        let mut parents_schema = Schema::default();
        let mut parents_selector = ColumnSelector::default();
        for parent in &node.parents {
            let parent = self.node(*parent)?;
            parents_schema += &parent.output_schema;
            parents_selector += &parent.output_columns();
        }
        let mut deps_schema = Schema::default();
        let mut deps_selector = ColumnSelector::default();
        for dependency in &node.dependencies {
            let dependency = self.node(*dependency)?;
            deps_schema += &dependency.output_schema;
            deps_selector += &dependency.output_columns();
        }
        if node.parents.is_empty() {
            let selection = node.selector.clone().unwrap_or_else(ColumnSelector::all);
            parents_schema = self.root_schema.apply(&selection).map_err(|err| match err {
                Error::MissingColumns { columns, .. } => Error::missing_columns(
                    columns,
                    format!("root schema for operator {}", node.label()),
                ),
                other => other,
            })?;
            parents_selector = parents_schema.column_names().cloned().collect();
        }

        let (input_columns, input_schema, output_schema) = match node.op() {
            None => {
                let upstream_schema = &parents_schema + &deps_schema;
                let input_columns = node
                    .selector
                    .as_ref()
                    .unwrap_or(&ColumnSelector::all())
                    .resolve(&upstream_schema)?;
                let input_schema = upstream_schema.select(input_columns.names())?;
                let output_schema = input_schema.clone();
                (input_columns, input_schema, output_schema)
            }
            Some(op) => {
                let upstream_schema = &parents_schema + &deps_schema;
                let input_columns = op.compute_selector(
                    &upstream_schema,
                    node.selector.as_ref(),
                    &parents_selector,
                    &deps_selector,
                )?;
                let input_schema = op.compute_input_schema(
                    &self.root_schema,
                    &parents_schema,
                    &deps_schema,
                    &input_columns,
                )?;
                let prev_output_schema = (preserve_dtypes && !node.output_schema.is_empty())
                    .then_some(&node.output_schema);
                let output_schema =
                    op.compute_output_schema(&input_schema, &input_columns, prev_output_schema)?;
                op.validate_schemas(
                    &parents_schema,
                    &deps_schema,
                    &input_schema,
                    &output_schema,
                    self.strict_dtypes,
                )
                .map_err(|err| {
                    error!("Failed to validate schemas for operator {}: {err}", op.label());
                    Error::from(err)
                })?;
                (input_columns, input_schema, output_schema)
            }
        };
        let output_schema = if preserve_dtypes {
            keep_known_dtypes(output_schema, &node.output_schema)
        } else {
            output_schema
        };
        debug!(
            "Computed schemas for {}: {} input columns, {} output columns",
            node.label(),
            input_schema.len(),
            output_schema.len()
        );

        let node = self.node_mut(handle)?;
        node.input_columns = input_columns;
        node.input_schema = input_schema;
        node.output_schema = output_schema;
        node.constructed = true;
        Ok(())
    }

    pub(crate) fn record_output_column(
        &mut self,
        handle: NodeHandle,
        column: ColumnSchema,
    ) -> Result<()> {
        self.node_mut(handle)?.output_schema.insert(column);
        Ok(())
    }

    pub(crate) fn set_fit_state(&mut self, handle: NodeHandle, state: FitState) -> Result<()> {
        self.node_mut(handle)?.fit_state = state;
        Ok(())
    }

    pub(crate) fn op_mut(&mut self, handle: NodeHandle) -> Result<&mut (dyn Operator + 'static)> {
        let node = self.node_mut(handle)?;
        let label = node.label();
        node.op
            .as_deref_mut()
            .ok_or(Error::NotStateful { operator: label })
    }

    /// Forgets every learned statistic and marks stateful nodes as unfit.
    pub fn clear_stats(&mut self) {
        for (_, node) in self.nodes.iter_mut() {
            if let Some(stat) = node.op.as_mut().and_then(|op| op.as_stat_mut()) {
                stat.clear();
                node.fit_state = FitState::Unfit;
            }
        }
    }
}

/// Statically unknown dtypes fall back to the ones already observed.
fn keep_known_dtypes(schema: Schema, previous: &Schema) -> Schema {
    schema
        .iter()
        .map(|column| match previous.get(column.name()) {
            Some(previous) if !column.dtype().is_known() && previous.dtype().is_known() => {
                column.clone().with_dtype(previous.dtype())
            }
            _ => column.clone(),
        })
        .collect()
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.len())
            .field("root_schema", &self.root_schema)
            .field("output", &self.output)
            .finish()
    }
}
