// Copyright © 2024 Pathway

use std::sync::Arc;

use assert_matches::assert_matches;

use dagframe_engine::engine::operators::{Center, Identity, Lambda, Rename};
use dagframe_engine::engine::{
    worker, Column, ColumnSchema, ColumnSelector, Config, DType, DistributedExecutor, Error,
    FitState, Graph, NodeHandle, PartitionedTable, RayonSession, Schema, Session, Table, Target,
    TransformOptions, Value,
};

use crate::helpers::{floats, ints, names, root_schema, schema, values};

fn measurements() -> Table {
    Table::new([
        ("a", Column::from(vec![1_i64, 2, 3, 4])),
        ("b", Column::from(vec![10_i64, 20, 30, 40])),
    ])
    .expect("measurements should be valid")
}

fn centered_graph() -> eyre::Result<(Graph, NodeHandle)> {
    let mut graph = Graph::new(root_schema());
    let node = graph.add_node(Center::new(), [], Some(ColumnSelector::from("a")))?;
    graph.set_output(node)?;
    graph.construct(false)?;
    Ok((graph, node))
}

fn fit_and_transform<S: Session>(
    executor: &DistributedExecutor<S>,
    partitions: usize,
) -> eyre::Result<Table> {
    let (mut graph, node) = centered_graph()?;
    let data = PartitionedTable::split(&measurements(), partitions);
    executor.fit(&data, &mut graph, &[node])?;
    assert_eq!(graph.node(node)?.fit_state(), FitState::Ready);

    let output = executor.transform(&data, &graph, Target::Graph, &TransformOptions::new())?;
    assert_eq!(output.num_partitions(), data.num_partitions());
    assert_eq!(output.num_rows(), 4);
    Ok(output.collect()?)
}

#[test]
fn test_fit_matches_single_partition() -> eyre::Result<()> {
    let executor = DistributedExecutor::new();
    let partitioned = fit_and_transform(&executor, 2)?;
    let single = fit_and_transform(&executor, 1)?;

    assert_eq!(values(&partitioned, "a"), floats(&[-1.5, -0.5, 0.5, 1.5]));
    assert_eq!(values(&partitioned, "a"), values(&single, "a"));
    Ok(())
}

#[test]
fn test_rayon_session() -> eyre::Result<()> {
    let executor = DistributedExecutor::with_session(RayonSession::new(2)?);
    assert_eq!(executor.session().workers(), 2);
    let output = fit_and_transform(&executor, 4)?;
    assert_eq!(values(&output, "a"), floats(&[-1.5, -0.5, 0.5, 1.5]));
    Ok(())
}

#[test]
fn test_session_from_config() -> eyre::Result<()> {
    let config = Config::new(3)?.with_partitions(2)?;
    let session = RayonSession::from_config(&config)?;
    assert_eq!(session.workers(), 3);

    let data = PartitionedTable::from_config(&measurements(), &config);
    assert_eq!(data.num_partitions(), 2);
    assert_eq!(data.partitions()[0].num_rows(), 2);
    Ok(())
}

#[test]
fn test_execute_preserves_order() {
    let tasks: Vec<_> = (0..16_i64)
        .map(|i| move || -> dagframe_engine::engine::Result<i64> { Ok(i * i) })
        .collect();
    let session = RayonSession::new(4).expect("pool should start");
    let results: Vec<i64> = session
        .execute(tasks)
        .into_iter()
        .map(|result| result.expect("task should succeed"))
        .collect();
    assert_eq!(results, (0..16_i64).map(|i| i * i).collect::<Vec<_>>());
}

#[test]
fn test_worker_panic() -> eyre::Result<()> {
    let mut graph = Graph::new(root_schema());
    let node = graph.add_node(
        Lambda::new(|_| panic!("boom")).with_dtype(DType::Int64),
        [],
        Some(ColumnSelector::from("a")),
    )?;
    graph.set_output(node)?;
    graph.construct(false)?;

    let data = PartitionedTable::split(&measurements(), 2);
    for result in [
        DistributedExecutor::new().transform(&data, &graph, Target::Graph, &TransformOptions::new()),
        DistributedExecutor::with_session(RayonSession::new(2)?).transform(
            &data,
            &graph,
            Target::Graph,
            &TransformOptions::new(),
        ),
    ] {
        assert_matches!(result, Err(Error::WorkerPanic(message)) if message.contains("boom"));
    }
    Ok(())
}

#[test]
fn test_failed_fit_leaves_node_unfit() -> eyre::Result<()> {
    let root = schema(&[("name", DType::String)]);
    let table = Table::new([("name", Column::from(vec!["x", "y"]))])?;
    let mut graph = Graph::new(root);
    let node = graph.add_node(Center::new(), [], None)?;
    graph.set_output(node)?;
    graph.construct(false)?;

    let data = PartitionedTable::split(&table, 2);
    let result = DistributedExecutor::new().fit(&data, &mut graph, &[node]);
    assert_matches!(
        result,
        Err(Error::TypeMismatch {
            expected: DType::Float64,
            ..
        })
    );
    assert_eq!(graph.node(node)?.fit_state(), FitState::Unfit);
    Ok(())
}

#[test]
fn test_fit_requires_stateful_nodes() -> eyre::Result<()> {
    let mut graph = Graph::new(root_schema());
    let node = graph.add_node(Identity, [], None)?;
    graph.construct(false)?;

    let data = PartitionedTable::split(&measurements(), 2);
    let result = DistributedExecutor::new().fit(&data, &mut graph, &[node]);
    assert_matches!(result, Err(Error::NotStateful { operator }) if operator.as_str() == "Identity");
    Ok(())
}

#[test]
fn test_fit_requires_constructed_nodes() -> eyre::Result<()> {
    let mut graph = Graph::new(root_schema());
    let node = graph.add_node(Center::new(), [], Some(ColumnSelector::from("a")))?;

    let data = PartitionedTable::split(&measurements(), 2);
    let executor = DistributedExecutor::new();
    let result = executor.fit(&data, &mut graph, &[node]);
    assert_matches!(result, Err(Error::NotConstructed { operator }) if operator.as_str() == "Center");
    assert_eq!(graph.node(node)?.fit_state(), FitState::Unfit);

    graph.construct(false)?;
    executor.fit(&data, &mut graph, &[node])?;
    assert_eq!(graph.node(node)?.fit_state(), FitState::Ready);
    Ok(())
}

#[test]
fn test_fit_graph_in_stages() -> eyre::Result<()> {
    let mut graph = Graph::new(root_schema());
    let first = graph.add_node(Center::new(), [], Some(ColumnSelector::from("a")))?;
    let other = graph.add_node(Center::new(), [], Some(ColumnSelector::from("b")))?;
    let renamed = graph.apply(first, Rename::with_postfix("_c"))?;
    let second = graph.add_node(Center::new(), [renamed, other], None)?;
    graph.set_output(second)?;
    graph.construct(false)?;

    let data = PartitionedTable::split(&measurements(), 2);
    let executor = DistributedExecutor::new();
    executor.fit_graph(&data, &mut graph)?;
    for node in [first, other, second] {
        assert_eq!(graph.node(node)?.fit_state(), FitState::Ready);
    }

    let output = executor
        .transform(&data, &graph, Target::Graph, &TransformOptions::new())?
        .collect()?;
    assert_eq!(names(&output), vec!["a_c", "b"]);
    assert_eq!(values(&output, "a_c"), floats(&[-1.5, -0.5, 0.5, 1.5]));
    assert_eq!(values(&output, "b"), floats(&[-15.0, -5.0, 5.0, 15.0]));

    graph.clear_stats();
    assert_eq!(graph.node(second)?.fit_state(), FitState::Unfit);
    let result = executor.transform(&data, &graph, Target::Graph, &TransformOptions::new());
    assert_matches!(result, Err(Error::NotFitted { .. }));
    Ok(())
}

#[test]
fn test_output_meta() -> eyre::Result<()> {
    let root = Schema::new([ColumnSchema::new("a"), ColumnSchema::new("b")]);
    let mut graph = Graph::new(root);
    let selection = graph.select(ColumnSelector::from(["a", "b"]));
    graph.set_output(selection)?;
    graph.construct(false)?;

    let data = PartitionedTable::split(&measurements(), 2);
    let executor = DistributedExecutor::new();

    let output = executor.transform(&data, &graph, Target::Graph, &TransformOptions::new())?;
    assert_eq!(output.meta().dtype("a"), Some(DType::Float64));
    assert_eq!(output.meta().dtype("b"), Some(DType::Float64));

    let options = TransformOptions::new().with_output_dtypes([("a", DType::Int32)]);
    let output = executor.transform(&data, &graph, Target::Graph, &options)?;
    assert_eq!(output.meta().dtype("a"), Some(DType::Int32));
    assert_eq!(output.meta().dtype("b"), Some(DType::Float64));

    let output = executor.capture_dtypes(&data, &mut graph, Target::Graph, &TransformOptions::new())?;
    assert_eq!(output.meta().dtype("a"), Some(DType::Float64));

    let (mut graph, node) = centered_graph()?;
    executor.fit(&data, &mut graph, &[node])?;
    let options = TransformOptions::new().with_additional_columns(["b"]);
    let output = executor.transform(&data, &graph, node, &options)?;
    assert_eq!(
        output.meta().column_names().map(|name| name.as_str()).collect::<Vec<_>>(),
        vec!["a", "b"]
    );
    assert_eq!(output.meta().dtype("a"), Some(DType::Float64));
    assert_eq!(output.meta().dtype("b"), Some(DType::Int64));
    Ok(())
}

#[test]
fn test_captured_dtypes_reach_meta() -> eyre::Result<()> {
    let mut graph = Graph::new(root_schema());
    let node = graph.add_node(
        Lambda::new(|column| {
            let values = column
                .iter()
                .map(|value| Value::from(value.to_string().as_str()));
            Ok(Column::new(DType::String, values)?)
        }),
        [],
        Some(ColumnSelector::from("a")),
    )?;
    graph.set_output(node)?;
    graph.construct(false)?;

    let data = PartitionedTable::split(&measurements(), 2);
    let executor = DistributedExecutor::new();
    assert_matches!(
        executor.transform(&data, &graph, Target::Graph, &TransformOptions::new()),
        Err(Error::DtypeMismatch { .. })
    );

    let output = executor.capture_dtypes(&data, &mut graph, Target::Graph, &TransformOptions::new())?;
    assert_eq!(output.meta().dtype("a"), Some(DType::String));
    let output = executor.transform(&data, &graph, Target::Graph, &TransformOptions::new())?;
    assert_eq!(output.meta().dtype("a"), Some(DType::String));
    Ok(())
}

#[test]
fn test_empty_target_selects_additional_columns() -> eyre::Result<()> {
    let graph = Graph::new(root_schema());
    let data = PartitionedTable::split(&measurements(), 2);
    let executor = DistributedExecutor::new();

    let options = TransformOptions::new().with_additional_columns(["b"]);
    let output = executor.transform(&data, &graph, Vec::<NodeHandle>::new(), &options)?;
    assert_eq!(output.meta().column_names().count(), 1);
    assert_eq!(values(&output.collect()?, "b"), ints(&[10, 20, 30, 40]));

    let output = executor.transform(&data, &graph, Vec::<NodeHandle>::new(), &TransformOptions::new())?;
    assert_eq!(output.meta(), data.meta());
    Ok(())
}

#[test]
fn test_worker_cache_is_cleared_between_runs() -> eyre::Result<()> {
    let (graph, node) = {
        let mut graph = Graph::new(root_schema());
        let node = graph.add_node(Identity, [], Some(ColumnSelector::from("a")))?;
        graph.set_output(node)?;
        graph.construct(false)?;
        (graph, node)
    };

    let cached = worker::get_or_insert_with("lookup", || vec![1_u8, 2, 3]);
    let again = worker::get_or_insert_with("lookup", Vec::<u8>::new);
    assert!(Arc::ptr_eq(&cached, &again));
    assert!(worker::contains("lookup"));

    let data = PartitionedTable::split(&measurements(), 2);
    DistributedExecutor::new().transform(&data, &graph, node, &TransformOptions::new())?;
    assert!(!worker::contains("lookup"));
    assert_eq!(worker::len(), 0);
    Ok(())
}
