// Copyright © 2024 Pathway

use assert_matches::assert_matches;
use serde_json::json;

use dagframe_engine::engine::error::DynResult;
use dagframe_engine::engine::operators::{
    AddProperties, AddTags, Center, Coalesce, Identity, Lambda, Rename,
};
use dagframe_engine::engine::{
    Column, ColumnSelector, DType, Error, FitStats, Graph, LocalExecutor, Operator, Properties, StatOperator,
    Supports, Table, Tag, Target, TransformOptions, Value,
};

use crate::helpers::{floats, ints, names, root_schema, root_table, schema, values};

fn transformed(op: &impl Operator, selector: &ColumnSelector, table: Table) -> eyre::Result<Table> {
    op.transform(selector, table)
        .map_err(Error::from)?
        .ok_or_else(|| eyre::eyre!("{} returned nothing", op.label()))
}

#[test]
fn test_default_label_is_type_name() {
    assert_eq!(Identity.label().as_str(), "Identity");
    assert_eq!(Coalesce::new("x").label().as_str(), "Coalesce");
    assert_eq!(Lambda::new(|column| Ok(column.clone())).label().as_str(), "Lambda");
    assert!(Identity.supports().contains(Supports::CPU_DATAFRAME));
}

#[test]
fn test_coalesce_takes_first_non_null() -> eyre::Result<()> {
    let table = Table::new([
        (
            "x",
            Column::new(DType::Int64, [Value::None, Value::from(2_i64), Value::None])?,
        ),
        (
            "y",
            Column::new(DType::Int64, [Value::from(10_i64), Value::from(20_i64), Value::None])?,
        ),
    ])?;
    let selector = ColumnSelector::from(["x", "y"]);
    let output = transformed(&Coalesce::new("xy"), &selector, table)?;

    assert_eq!(names(&output), vec!["xy"]);
    assert_eq!(
        values(&output, "xy"),
        vec![Value::from(10_i64), Value::from(2_i64), Value::None]
    );
    assert_eq!(
        output.column("xy").map(Column::dtype),
        Some(DType::Int64)
    );
    Ok(())
}

#[test]
fn test_rename_mapping_and_postfix() -> eyre::Result<()> {
    let rename = Rename::new([("a", "first")]);
    assert_eq!(rename.new_name(&arcstr::literal!("a")).as_str(), "first");
    assert_eq!(rename.new_name(&arcstr::literal!("b")).as_str(), "b");

    let postfixed = Rename::with_postfix("_raw");
    let selector = ColumnSelector::from(["a", "b"]);
    let mapping = postfixed.column_mapping(&selector);
    assert_eq!(
        mapping.keys().map(|name| name.as_str()).collect::<Vec<_>>(),
        vec!["a_raw", "b_raw"]
    );

    let output = transformed(&postfixed, &selector, root_table())?;
    assert_eq!(names(&output), vec!["a_raw", "b_raw"]);
    assert_eq!(values(&output, "b_raw"), ints(&[5, 6]));
    Ok(())
}

#[test]
fn test_tags_and_properties() -> eyre::Result<()> {
    let mut properties = Properties::new();
    properties.insert("domain".to_string(), json!({"min": 0, "max": 9}));

    let mut graph = Graph::new(root_schema());
    let tagged = graph.add_node(
        AddTags::new([Tag::CATEGORICAL]),
        [],
        Some(ColumnSelector::from("a")),
    )?;
    let described = graph.apply(tagged, AddProperties::new(properties))?;
    graph.set_output(described)?;
    graph.construct(false)?;

    let column = graph
        .output_schema()?
        .get("a")
        .cloned()
        .ok_or_else(|| eyre::eyre!("missing a"))?;
    assert!(column.has_tag(&Tag::CATEGORICAL));
    assert_eq!(column.properties().get("domain"), Some(&json!({"min": 0, "max": 9})));
    assert_eq!(column.dtype(), DType::Int64);

    let output =
        LocalExecutor::new().transform(&root_table(), &graph, Target::Graph, &TransformOptions::new())?;
    assert_eq!(values(&output, "a"), ints(&[1, 2]));
    Ok(())
}

#[test]
fn test_lambda_declared_dtype() -> eyre::Result<()> {
    let halve = Lambda::new(|column| {
        let values = column
            .iter()
            .map(|value| Ok(Value::from(value.as_float()? / 2.0)))
            .collect::<DynResult<Vec<_>>>()?;
        Ok(Column::new(DType::Float64, values)?)
    })
    .with_dtype(DType::Float64)
    .with_label("Halve");
    assert!(!halve.dynamic_dtypes());
    assert_eq!(halve.label().as_str(), "Halve");

    let mut graph = Graph::new(root_schema());
    let node = graph.add_node(halve, [], None)?;
    graph.set_output(node)?;
    graph.construct(false)?;
    assert_eq!(
        graph.output_schema()?.get("b").map(|column| column.dtype()),
        Some(DType::Float64)
    );

    let output =
        LocalExecutor::new().transform(&root_table(), &graph, Target::Graph, &TransformOptions::new())?;
    assert_eq!(values(&output, "a"), floats(&[0.5, 1.0]));
    assert_eq!(values(&output, "b"), floats(&[2.5, 3.0]));
    Ok(())
}

#[test]
fn test_center_fit_and_clear() -> eyre::Result<()> {
    let selector = ColumnSelector::from("a");
    let table = Table::new([(
        "a",
        Column::new(
            DType::Float64,
            [Value::from(1.0), Value::None, Value::from(4.0)],
        )?,
    )])?;
    let empty = Table::new([("a", Column::empty(DType::Float64))])?;

    let mut center = Center::new();
    let partials = vec![
        center.fit(&selector, &table).map_err(Error::from)?,
        center.fit(&selector, &empty).map_err(Error::from)?,
    ];
    center.fit_finalize(partials).map_err(Error::from)?;
    assert_eq!(center.mean("a"), Some(2.5));

    let output = transformed(&center, &selector, table)?;
    assert_eq!(
        values(&output, "a"),
        vec![Value::from(-1.5), Value::None, Value::from(1.5)]
    );

    let mut only_empty = Center::new();
    let partial = only_empty.fit(&selector, &empty).map_err(Error::from)?;
    only_empty.fit_finalize(vec![partial]).map_err(Error::from)?;
    assert_eq!(only_empty.mean("a"), Some(0.0));

    center.clear();
    assert!(center.means().is_empty());
    let result = center.transform(&selector, root_table());
    assert_matches!(
        result.map_err(Error::from),
        Err(Error::NotFitted { operator }) if operator.as_str() == "Center"
    );
    Ok(())
}

#[test]
fn test_center_rejects_foreign_partials() {
    let mut center = Center::new();
    let partial: FitStats = Box::new(42_u32);
    let result = center.fit_finalize(vec![partial]);
    assert!(result
        .err()
        .is_some_and(|err| err.to_string().contains("unexpected partial statistic")));
}

#[test]
fn test_coalesce_schema_inherits_first_source() -> eyre::Result<()> {
    let root = schema(&[("x", DType::Float32), ("y", DType::Int64)]);
    let mut graph = Graph::new(root);
    let merged = graph.add_node(Coalesce::new("xy"), [], None)?;
    graph.set_output(merged)?;
    graph.construct(false)?;

    let output = graph.output_schema()?;
    assert_eq!(output.len(), 1);
    assert_eq!(output.get("xy").map(|column| column.dtype()), Some(DType::Float32));
    Ok(())
}
