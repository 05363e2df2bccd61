// Copyright © 2024 Pathway

use assert_matches::assert_matches;

use dagframe_engine::engine::{ColumnSchema, ColumnSelector, DType, Error, Schema, Tag};

fn tagged_schema() -> Schema {
    Schema::new([
        ColumnSchema::new("c").with_tags([Tag::CATEGORICAL]),
        ColumnSchema::new("a").with_tags([Tag::CONTINUOUS]),
        ColumnSchema::new("b").with_tags([Tag::CATEGORICAL, Tag::TARGET]),
        ColumnSchema::new("d").with_tags([Tag::TARGET]),
    ])
}

fn resolved_names(selector: &ColumnSelector) -> Vec<&str> {
    selector.names().map(|name| name.as_str()).collect()
}

#[test]
fn test_tag_resolution_follows_schema_order() -> eyre::Result<()> {
    let schema = tagged_schema();
    let selector = ColumnSelector::with_tags([Tag::CATEGORICAL]);
    let resolved = selector.resolve(&schema)?;
    assert_eq!(resolved_names(&resolved), vec!["c", "b"]);
    Ok(())
}

#[test]
fn test_tag_resolution_has_no_duplicates() -> eyre::Result<()> {
    let schema = tagged_schema();
    let selector = ColumnSelector::with_tags([Tag::CATEGORICAL, Tag::TARGET]);
    let resolved = selector.resolve(&schema)?;
    assert_eq!(resolved_names(&resolved), vec!["c", "b", "d"]);
    Ok(())
}

#[test]
fn test_explicit_names_come_first() -> eyre::Result<()> {
    let schema = tagged_schema();
    let selector = ColumnSelector::from("b") + ColumnSelector::with_tags([Tag::CATEGORICAL]);
    let resolved = selector.resolve(&schema)?;
    assert_eq!(resolved_names(&resolved), vec!["b", "c"]);
    Ok(())
}

#[test]
fn test_missing_column() {
    let schema = Schema::new([
        ColumnSchema::new("a").with_dtype(DType::Int64),
        ColumnSchema::new("b").with_dtype(DType::Int64),
    ]);
    let result = ColumnSelector::from("c").resolve(&schema);
    assert_matches!(
        result,
        Err(Error::MissingColumns { columns, .. }) if columns == [arcstr::literal!("c")]
    );
}

#[test]
fn test_wildcard_with_subtraction() -> eyre::Result<()> {
    let schema = tagged_schema();
    let selector = ColumnSelector::all() - ColumnSelector::from(["a", "d"]);
    let resolved = selector.resolve(&schema)?;
    assert_eq!(resolved_names(&resolved), vec!["c", "b"]);
    Ok(())
}

#[test]
fn test_union_keeps_first_occurrence() {
    let selector = ColumnSelector::from(["x", "y"]) + ColumnSelector::from(["y", "z", "x"]);
    assert_eq!(resolved_names(&selector), vec!["x", "y", "z"]);
}

#[test]
fn test_wildcard_string_selects_everything() -> eyre::Result<()> {
    let selector = ColumnSelector::from("*");
    assert!(selector.is_all());
    let resolved = selector.resolve(&tagged_schema())?;
    assert_eq!(resolved_names(&resolved), vec!["c", "a", "b", "d"]);
    Ok(())
}

#[test]
fn test_empty_selector() -> eyre::Result<()> {
    let selector = ColumnSelector::default();
    assert!(selector.is_empty());
    assert!(selector.resolve(&tagged_schema())?.is_empty());
    Ok(())
}
