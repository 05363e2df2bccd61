// Copyright © 2024 Pathway

mod center;
mod coalesce;
mod lambda;
mod rename;
mod tags;

pub use center::Center;
pub use coalesce::Coalesce;
pub use lambda::Lambda;
pub use rename::Rename;
pub use tags::{AddProperties, AddTags, SelectByTags};

use super::Operator;

/// Passes the selected columns through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl Operator for Identity {}
