// Copyright © 2024 Pathway

use std::ops::Add;

use arcstr::ArcStr;
use indexmap::IndexMap;
use log::debug;

use crate::engine::error::DynResult;
use crate::engine::operator::FitStats;
use crate::engine::{
    Column, ColumnSelector, DType, Error, Operator, StatOperator, Table, Tag, Value,
};

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct SumState {
    sum: f64,
    count: usize,
}

impl Add for SumState {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            sum: self.sum + rhs.sum,
            count: self.count + rhs.count,
        }
    }
}

type PartialSums = IndexMap<ArcStr, SumState>;

/// Subtracts the column mean learned during fit. Output is always `float64`.
#[derive(Debug, Default, Clone)]
pub struct Center {
    means: IndexMap<ArcStr, f64>,
}

impl Center {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn means(&self) -> &IndexMap<ArcStr, f64> {
        &self.means
    }

    pub fn mean(&self, column: &str) -> Option<f64> {
        self.means.get(column).copied()
    }
}

impl Operator for Center {
    fn transform(&self, selector: &ColumnSelector, table: Table) -> DynResult<Option<Table>> {
        let selected = table.select(selector.names())?;
        let mut columns = Vec::with_capacity(selected.num_columns());
        for (name, column) in selected.columns() {
            let mean = self.mean(name).ok_or_else(|| Error::NotFitted {
                operator: self.label(),
            })?;
            let values = column
                .iter()
                .map(|value| match value {
                    Value::None => Ok(Value::None),
                    value => Ok(Value::from(value.as_float()? - mean)),
                })
                .collect::<DynResult<Vec<_>>>()?;
            columns.push((name.clone(), Column::new(DType::Float64, values)?));
        }
        Ok(Some(Table::new(columns)?))
    }

    fn output_dtype(&self) -> Option<DType> {
        Some(DType::Float64)
    }

    fn output_tags(&self) -> Vec<Tag> {
        vec![Tag::CONTINUOUS]
    }

    fn as_stat(&self) -> Option<&dyn StatOperator> {
        Some(self)
    }

    fn as_stat_mut(&mut self) -> Option<&mut dyn StatOperator> {
        Some(self)
    }
}

impl StatOperator for Center {
    fn fit(&self, selector: &ColumnSelector, table: &Table) -> DynResult<FitStats> {
        let selected = table.select(selector.names())?;
        let mut sums = PartialSums::new();
        for (name, column) in selected.columns() {
            let mut state = SumState::default();
            for value in column.iter().filter(|value| !value.is_none()) {
                state.sum += value.as_float()?;
                state.count += 1;
            }
            sums.insert(name.clone(), state);
        }
        Ok(Box::new(sums))
    }

    fn fit_finalize(&mut self, stats: Vec<FitStats>) -> DynResult<()> {
        let mut totals = PartialSums::new();
        for partial in stats {
            let partial = partial
                .downcast::<PartialSums>()
                .map_err(|_| "unexpected partial statistic for Center")?;
            for (name, state) in *partial {
                let total = totals.entry(name).or_default();
                *total = *total + state;
            }
        }
        self.means = totals
            .into_iter()
            .map(|(name, state)| {
                #[allow(clippy::cast_precision_loss)]
                let mean = if state.count == 0 {
                    0.0
                } else {
                    state.sum / state.count as f64
                };
                (name, mean)
            })
            .collect();
        debug!("Center fitted means for {} columns", self.means.len());
        Ok(())
    }

    fn clear(&mut self) {
        self.means.clear();
    }
}
