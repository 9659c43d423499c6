use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{FilterError, FilterResult, LastRun, MetricsRow, MetricsTable, SymbolFilter};
use crate::Symbol;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Logic {
    #[default]
    And,
    Or,
}

/// Applies every child to the same input and combines the pass sets.
pub struct CompositeFilter {
    name: String,
    logic: Logic,
    children: Vec<Box<dyn SymbolFilter>>,
    last_run: LastRun,
}

impl CompositeFilter {
    pub fn new(logic: Logic, children: Vec<Box<dyn SymbolFilter>>) -> Result<Self, FilterError> {
        if children.is_empty() {
            return Err(FilterError::EmptyComposite);
        }

        let name = match logic {
            Logic::And => "all_of",
            Logic::Or => "any_of",
        };
        Ok(Self {
            name: name.to_owned(),
            logic,
            children,
            last_run: LastRun::default(),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn logic(&self) -> Logic {
        self.logic
    }

    pub fn children(&self) -> &[Box<dyn SymbolFilter>] {
        &self.children
    }

    /// Stats of each child's last run, in child order.
    pub fn child_stats(&self) -> Vec<Option<FilterResult>> {
        self.children.iter().map(|child| child.stats()).collect()
    }
}

impl SymbolFilter for CompositeFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, row: &MetricsRow) -> bool {
        match self.logic {
            Logic::And => self.children.iter().all(|child| child.matches(row)),
            Logic::Or => self.children.iter().any(|child| child.matches(row)),
        }
    }

    fn last_run(&self) -> &LastRun {
        &self.last_run
    }

    fn apply(&self, table: &MetricsTable) -> MetricsTable {
        let passed: Vec<HashSet<Symbol>> = self
            .children
            .iter()
            .map(|child| {
                child
                    .apply(table)
                    .rows()
                    .iter()
                    .map(|row| row.symbol.clone())
                    .collect()
            })
            .collect();

        let output = table.filtered(|row| match self.logic {
            Logic::And => passed.iter().all(|set| set.contains(&row.symbol)),
            Logic::Or => passed.iter().any(|set| set.contains(&row.symbol)),
        });
        self.last_run
            .record(FilterResult::compute(&self.name, table.len(), output.len()));
        output
    }
}

/// Output of [`FilterPipeline::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineResult {
    pub table: MetricsTable,
    pub combined: FilterResult,
    /// Keyed `filter_{index}_{name}`.
    pub per_filter: BTreeMap<String, FilterResult>,
}

pub struct FilterPipeline {
    root: CompositeFilter,
}

impl FilterPipeline {
    pub fn new(logic: Logic, filters: Vec<Box<dyn SymbolFilter>>) -> Result<Self, FilterError> {
        Ok(Self {
            root: CompositeFilter::new(logic, filters)?.with_name("pipeline"),
        })
    }

    pub fn logic(&self) -> Logic {
        self.root.logic()
    }

    pub fn run(&self, table: &MetricsTable) -> PipelineResult {
        let output = self.root.apply(table);
        let combined = self
            .root
            .stats()
            .unwrap_or_else(|| FilterResult::compute("pipeline", table.len(), output.len()));

        let per_filter = self
            .root
            .children()
            .iter()
            .enumerate()
            .filter_map(|(index, child)| {
                child
                    .stats()
                    .map(|stats| (format!("filter_{index}_{}", child.name()), stats))
            })
            .collect();

        info!(
            input = combined.input_row_count,
            output = combined.output_row_count,
            filter_rate_percent = combined.filter_rate_percent,
            "screening pipeline finished"
        );

        PipelineResult {
            table: output,
            combined,
            per_filter,
        }
    }
}
