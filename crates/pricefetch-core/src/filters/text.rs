use serde::{Deserialize, Serialize};

use super::{FilterError, LastRun, MetricsRow, SymbolFilter};

/// GICS sector names keyed by their short aliases.
const SECTOR_ALIASES: &[(&str, &str)] = &[
    ("technology", "Information Technology"),
    ("healthcare", "Health Care"),
    ("financials", "Financials"),
    ("energy", "Energy"),
    ("industrials", "Industrials"),
    ("materials", "Materials"),
    ("utilities", "Utilities"),
    ("real_estate", "Real Estate"),
    ("consumer_discretionary", "Consumer Discretionary"),
    ("consumer_staples", "Consumer Staples"),
    ("communication", "Communication Services"),
];

/// GICS sector name for a short alias; other names pass through trimmed.
pub fn canonical_sector(name: &str) -> String {
    let trimmed = name.trim();
    let lower = trimmed.to_ascii_lowercase();
    SECTOR_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map_or_else(|| trimmed.to_owned(), |(_, sector)| (*sector).to_owned())
}

/// Text columns a [`StringMatchFilter`] can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextColumn {
    Exchange,
    Sector,
}

impl TextColumn {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exchange => "exchange",
            Self::Sector => "sector",
        }
    }

    fn value(self, row: &MetricsRow) -> Option<&str> {
        match self {
            Self::Exchange => row.exchange.as_deref(),
            Self::Sector => row.sector.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    Exact,
    Contains,
    StartsWith,
    EndsWith,
}

impl MatchMode {
    fn test(self, value: &str, target: &str) -> bool {
        match self {
            Self::Exact => value == target,
            Self::Contains => value.contains(target),
            Self::StartsWith => value.starts_with(target),
            Self::EndsWith => value.ends_with(target),
        }
    }
}

/// Keeps rows whose text column matches any target. Rows without a value never match.
///
/// Matching is case-insensitive unless [`StringMatchFilter::case_sensitive`] is set.
#[derive(Debug, Clone)]
pub struct StringMatchFilter {
    name: String,
    column: TextColumn,
    targets: Vec<String>,
    mode: MatchMode,
    case_sensitive: bool,
    last_run: LastRun,
}

impl StringMatchFilter {
    pub fn new<I, S>(column: TextColumn, targets: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut kept: Vec<String> = Vec::new();
        for target in targets {
            let trimmed = target.as_ref().trim();
            if trimmed.is_empty() {
                return Err(FilterError::InvalidThreshold {
                    field: column.as_str(),
                    value: target.as_ref().to_owned(),
                });
            }
            if !kept.iter().any(|existing| existing == trimmed) {
                kept.push(trimmed.to_owned());
            }
        }

        if kept.is_empty() {
            return Err(FilterError::InvalidThreshold {
                field: column.as_str(),
                value: String::from("no values"),
            });
        }

        Ok(Self {
            name: column.as_str().to_owned(),
            column,
            targets: kept,
            mode: MatchMode::Exact,
            case_sensitive: false,
            last_run: LastRun::default(),
        })
    }

    pub fn with_mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn column(&self) -> TextColumn {
        self.column
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }
}

impl SymbolFilter for StringMatchFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, row: &MetricsRow) -> bool {
        let Some(value) = self.column.value(row) else {
            return false;
        };

        if self.case_sensitive {
            self.targets.iter().any(|target| self.mode.test(value, target))
        } else {
            let value = value.to_lowercase();
            self.targets
                .iter()
                .any(|target| self.mode.test(&value, &target.to_lowercase()))
        }
    }

    fn last_run(&self) -> &LastRun {
        &self.last_run
    }
}

/// Keeps rows in one of the given sectors. Short aliases such as `technology` expand to
/// their GICS names before matching.
#[derive(Debug, Clone)]
pub struct SectorFilter {
    inner: StringMatchFilter,
}

impl SectorFilter {
    pub fn new<I, S>(sectors: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let expanded: Vec<String> = sectors
            .into_iter()
            .map(|sector| canonical_sector(sector.as_ref()))
            .collect();
        Ok(Self {
            inner: StringMatchFilter::new(TextColumn::Sector, expanded)?,
        })
    }

    pub fn case_sensitive(self, case_sensitive: bool) -> Self {
        Self {
            inner: self.inner.case_sensitive(case_sensitive),
        }
    }

    pub fn sectors(&self) -> &[String] {
        self.inner.targets()
    }
}

impl SymbolFilter for SectorFilter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn matches(&self, row: &MetricsRow) -> bool {
        self.inner.matches(row)
    }

    fn last_run(&self) -> &LastRun {
        self.inner.last_run()
    }
}
