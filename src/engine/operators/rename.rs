// Copyright © 2024 Pathway

use arcstr::ArcStr;
use indexmap::IndexMap;

use crate::engine::error::DynResult;
use crate::engine::operator::ColumnMapping;
use crate::engine::{ColumnSelector, Operator, Table};

/// Renames columns through an explicit mapping; names absent from the mapping
/// get the postfix appended, if one is set, and are kept otherwise.
#[derive(Debug, Default, Clone)]
pub struct Rename {
    mapping: IndexMap<ArcStr, ArcStr>,
    postfix: Option<ArcStr>,
}

impl Rename {
    pub fn new<A, B>(mapping: impl IntoIterator<Item = (A, B)>) -> Self
    where
        A: Into<ArcStr>,
        B: Into<ArcStr>,
    {
        Self {
            mapping: mapping
                .into_iter()
                .map(|(from, to)| (from.into(), to.into()))
                .collect(),
            postfix: None,
        }
    }

    pub fn with_postfix(postfix: impl Into<ArcStr>) -> Self {
        Self {
            mapping: IndexMap::new(),
            postfix: Some(postfix.into()),
        }
    }

    pub fn new_name(&self, name: &ArcStr) -> ArcStr {
        if let Some(renamed) = self.mapping.get(name) {
            return renamed.clone();
        }
        match &self.postfix {
            Some(postfix) => arcstr::format!("{name}{postfix}"),
            None => name.clone(),
        }
    }
}

impl Operator for Rename {
    fn column_mapping(&self, selector: &ColumnSelector) -> ColumnMapping {
        selector
            .names()
            .map(|name| (self.new_name(name), vec![name.clone()]))
            .collect()
    }

    fn transform(&self, selector: &ColumnSelector, table: Table) -> DynResult<Option<Table>> {
        let selected = table.select(selector.names())?;
        let renamed = Table::new(
            selected
                .columns()
                .map(|(name, column)| (self.new_name(name), column.clone())),
        )?;
        Ok(Some(renamed))
    }
}
