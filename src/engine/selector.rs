// Copyright © 2024 Pathway

use std::ops::{Add, AddAssign, Sub};

use arcstr::ArcStr;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use super::{Error, Result, Schema, Tag};

pub const WILDCARD: &str = "*";

/// An ordered, deduplicated query over column names and tags.
///
/// Selectors are resolved against a [`Schema`] before use; the resolved form
/// only carries concrete names.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSelector {
    names: IndexSet<ArcStr>,
    tags: IndexSet<Tag>,
    excluded: IndexSet<ArcStr>,
    all: bool,
}

impl ColumnSelector {
    pub fn new<S: Into<ArcStr>>(names: impl IntoIterator<Item = S>) -> Self {
        let mut selector = Self::default();
        for name in names {
            let name = name.into();
            if name == WILDCARD {
                selector.all = true;
            } else {
                selector.names.insert(name);
            }
        }
        selector
    }

    /// Selects every column of the schema it is resolved against.
    pub fn all() -> Self {
        Self {
            all: true,
            ..Self::default()
        }
    }

    pub fn with_tags<T: Into<Tag>>(tags: impl IntoIterator<Item = T>) -> Self {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn names(&self) -> impl ExactSizeIterator<Item = &ArcStr> + Clone {
        self.names.iter()
    }

    pub fn tags(&self) -> impl ExactSizeIterator<Item = &Tag> + Clone {
        self.tags.iter()
    }

    pub fn excluded(&self) -> impl ExactSizeIterator<Item = &ArcStr> + Clone {
        self.excluded.iter()
    }

    pub fn is_all(&self) -> bool {
        self.all
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.names.is_empty() && self.tags.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Expands the wildcard and tag predicates into concrete names present in
    /// `schema` and drops excluded names. Fails if an explicitly named column is absent.
    pub fn resolve(&self, schema: &Schema) -> Result<Self> {
        let missing: Vec<ArcStr> = self
            .names
            .iter()
            .filter(|name| !schema.contains(name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(Error::missing_columns(missing, "selector resolution"));
        }

        let mut names = self.names.clone();
        if self.all {
            names.extend(schema.column_names().cloned());
        } else if !self.tags.is_empty() {
            names.extend(
                schema
                    .iter()
                    .filter(|column| column.has_any_tag(&self.tags))
                    .map(|column| column.name().clone()),
            );
        }
        names.retain(|name| !self.excluded.contains(name));
        Ok(Self {
            names,
            ..Self::default()
        })
    }

    #[must_use]
    pub fn exclude<S: Into<ArcStr>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        for name in names {
            let name = name.into();
            self.names.shift_remove(&name);
            self.excluded.insert(name);
        }
        self
    }
}

impl From<&str> for ColumnSelector {
    fn from(name: &str) -> Self {
        Self::new([name])
    }
}

impl From<Vec<&str>> for ColumnSelector {
    fn from(names: Vec<&str>) -> Self {
        Self::new(names)
    }
}

impl<const N: usize> From<[&str; N]> for ColumnSelector {
    fn from(names: [&str; N]) -> Self {
        Self::new(names)
    }
}

impl FromIterator<ArcStr> for ColumnSelector {
    fn from_iter<I: IntoIterator<Item = ArcStr>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl AddAssign<&ColumnSelector> for ColumnSelector {
    fn add_assign(&mut self, rhs: &ColumnSelector) {
        self.names.extend(rhs.names.iter().cloned());
        self.tags.extend(rhs.tags.iter().cloned());
        self.excluded.extend(rhs.excluded.iter().cloned());
        self.all |= rhs.all;
    }
}

impl Add for ColumnSelector {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += &rhs;
        self
    }
}

impl Add<&ColumnSelector> for &ColumnSelector {
    type Output = ColumnSelector;

    fn add(self, rhs: &ColumnSelector) -> ColumnSelector {
        let mut result = self.clone();
        result += rhs;
        result
    }
}

impl Sub for ColumnSelector {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.exclude(rhs.names)
    }
}

impl Sub<&ColumnSelector> for &ColumnSelector {
    type Output = ColumnSelector;

    fn sub(self, rhs: &ColumnSelector) -> ColumnSelector {
        self.clone().exclude(rhs.names.iter().cloned())
    }
}
