// Copyright © 2024 Pathway

use crate::engine::{ColumnSelector, Operator, Properties, Result, Schema, Tag};

/// Tags every selected column.
#[derive(Debug, Default, Clone)]
pub struct AddTags {
    tags: Vec<Tag>,
}

impl AddTags {
    pub fn new<T: Into<Tag>>(tags: impl IntoIterator<Item = T>) -> Self {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }
}

impl Operator for AddTags {
    fn output_tags(&self) -> Vec<Tag> {
        self.tags.clone()
    }
}

/// Sets properties on every selected column, replacing same-named ones.
#[derive(Debug, Default, Clone)]
pub struct AddProperties {
    properties: Properties,
}

impl AddProperties {
    pub fn new(properties: Properties) -> Self {
        Self { properties }
    }
}

impl Operator for AddProperties {
    fn output_properties(&self) -> Properties {
        self.properties.clone()
    }
}

/// Passes through only the upstream columns carrying at least one of the tags.
#[derive(Debug, Default, Clone)]
pub struct SelectByTags {
    tags: Vec<Tag>,
}

impl SelectByTags {
    pub fn new<T: Into<Tag>>(tags: impl IntoIterator<Item = T>) -> Self {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }
}

impl Operator for SelectByTags {
    fn compute_selector(
        &self,
        input_schema: &Schema,
        selector: Option<&ColumnSelector>,
        _parents_selector: &ColumnSelector,
        _dependencies_selector: &ColumnSelector,
    ) -> Result<ColumnSelector> {
        let candidates = selector
            .cloned()
            .unwrap_or_else(ColumnSelector::all)
            .resolve(input_schema)?;
        let tagged = ColumnSelector::with_tags(self.tags.iter().cloned()).resolve(input_schema)?;
        Ok(candidates
            .names()
            .filter(|name| tagged.contains(name))
            .cloned()
            .collect())
    }
}
