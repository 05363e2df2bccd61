// Copyright © 2024 Pathway

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display};
use std::ops::{Add, AddAssign, Sub};

use arcstr::ArcStr;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{ColumnSelector, DType, Error, Result, Shape};

pub type Properties = BTreeMap<String, JsonValue>;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(ArcStr);

impl Tag {
    pub const CATEGORICAL: Self = Self(arcstr::literal!("categorical"));
    pub const CONTINUOUS: Self = Self(arcstr::literal!("continuous"));
    pub const LIST: Self = Self(arcstr::literal!("list"));
    pub const TARGET: Self = Self(arcstr::literal!("target"));
    pub const ID: Self = Self(arcstr::literal!("id"));
    pub const USER_ID: Self = Self(arcstr::literal!("user_id"));
    pub const ITEM_ID: Self = Self(arcstr::literal!("item_id"));

    pub fn new(name: impl Into<ArcStr>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tag {
    fn from(name: &str) -> Self {
        Self(name.into())
    }
}

/// Engine-agnostic metadata of a single column. Builders return new values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    name: ArcStr,
    dtype: DType,
    is_list: bool,
    is_ragged: bool,
    tags: BTreeSet<Tag>,
    properties: Properties,
    shape: Shape,
}

impl ColumnSchema {
    pub fn new(name: impl Into<ArcStr>) -> Self {
        Self {
            name: name.into(),
            dtype: DType::Unknown,
            is_list: false,
            is_ragged: false,
            tags: BTreeSet::new(),
            properties: Properties::new(),
            shape: Shape::unknown(),
        }
    }

    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn is_list(&self) -> bool {
        self.is_list
    }

    pub fn is_ragged(&self) -> bool {
        self.is_ragged
    }

    pub fn tags(&self) -> &BTreeSet<Tag> {
        &self.tags
    }

    pub fn has_tag(&self, tag: &Tag) -> bool {
        self.tags.contains(tag)
    }

    pub fn has_any_tag<'a>(&self, tags: impl IntoIterator<Item = &'a Tag>) -> bool {
        tags.into_iter().any(|tag| self.tags.contains(tag))
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<ArcStr>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    /// Sets the list flags; a known shape that disagrees with them is dropped.
    #[must_use]
    pub fn with_list(mut self, is_list: bool, is_ragged: bool) -> Self {
        self.is_list = is_list;
        self.is_ragged = is_list && is_ragged;
        if self.shape.is_known()
            && (self.shape.is_list() != self.is_list || self.shape.is_ragged() != self.is_ragged)
        {
            self.shape = Shape::unknown();
        }
        self
    }

    #[must_use]
    pub fn with_shape(mut self, shape: Shape) -> Self {
        if shape.is_known() {
            self.is_list = shape.is_list();
            self.is_ragged = shape.is_ragged();
        }
        self.shape = shape;
        self
    }

    /// Adds tags to the ones already present.
    #[must_use]
    pub fn with_tags<T: Into<Tag>>(mut self, tags: impl IntoIterator<Item = T>) -> Self {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn without_tags<'a>(mut self, tags: impl IntoIterator<Item = &'a Tag>) -> Self {
        for tag in tags {
            self.tags.remove(tag);
        }
        self
    }

    /// Replaces all properties.
    #[must_use]
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    /// Whether a column described by `other` may stand in for this one.
    /// An unknown dtype or shape on either side matches anything.
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        let dtype_matches =
            !self.dtype.is_known() || !other.dtype.is_known() || self.dtype == other.dtype;
        dtype_matches && self.is_list == other.is_list && self.shape.is_compatible_with(&other.shape)
    }
}

/// Ordered mapping of column name to [`ColumnSchema`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: IndexMap<ArcStr, ColumnSchema>,
}

impl Schema {
    pub fn new(columns: impl IntoIterator<Item = ColumnSchema>) -> Self {
        columns.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &ArcStr> {
        self.columns.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns.values()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.get(name)
    }

    /// Inserts or replaces a column, keeping the position of a replaced one.
    pub fn insert(&mut self, column: ColumnSchema) {
        self.columns.insert(column.name.clone(), column);
    }

    pub fn select<S: AsRef<str>>(&self, names: impl IntoIterator<Item = S>) -> Result<Self> {
        let mut selected = Self::default();
        let mut missing = Vec::new();
        for name in names {
            match self.columns.get(name.as_ref()) {
                Some(column) => selected.insert(column.clone()),
                None => missing.push(ArcStr::from(name.as_ref())),
            }
        }
        if missing.is_empty() {
            Ok(selected)
        } else {
            Err(Error::missing_columns(missing, "schema selection"))
        }
    }

    /// Columns carrying at least one of `tags`, in schema order.
    pub fn select_by_tags<'a>(&self, tags: impl IntoIterator<Item = &'a Tag> + Clone) -> Self {
        self.iter()
            .filter(|column| column.has_any_tag(tags.clone()))
            .cloned()
            .collect()
    }

    pub fn apply(&self, selector: &ColumnSelector) -> Result<Self> {
        let resolved = selector.resolve(self)?;
        self.select(resolved.names())
    }

    #[must_use]
    pub fn without<S: AsRef<str>>(&self, names: impl IntoIterator<Item = S>) -> Self {
        let mut result = self.clone();
        for name in names {
            result.columns.shift_remove(name.as_ref());
        }
        result
    }
}

impl FromIterator<ColumnSchema> for Schema {
    fn from_iter<I: IntoIterator<Item = ColumnSchema>>(iter: I) -> Self {
        let mut schema = Self::default();
        for column in iter {
            schema.insert(column);
        }
        schema
    }
}

impl<'a> IntoIterator for &'a Schema {
    type Item = &'a ColumnSchema;
    type IntoIter = indexmap::map::Values<'a, ArcStr, ColumnSchema>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.values()
    }
}

impl AddAssign<&Schema> for Schema {
    fn add_assign(&mut self, rhs: &Schema) {
        for column in rhs {
            self.insert(column.clone());
        }
    }
}

impl Add<&Schema> for &Schema {
    type Output = Schema;

    fn add(self, rhs: &Schema) -> Schema {
        let mut result = self.clone();
        result += rhs;
        result
    }
}

impl Add for Schema {
    type Output = Schema;

    fn add(mut self, rhs: Schema) -> Schema {
        self += &rhs;
        self
    }
}

impl Sub<&Schema> for &Schema {
    type Output = Schema;

    fn sub(self, rhs: &Schema) -> Schema {
        self.without(rhs.column_names())
    }
}
