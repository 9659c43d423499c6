use super::{FilterError, LastRun, MetricsRow, SymbolFilter};

const ALIASES: &[(&str, &[&str])] = &[
    ("NASDAQ", &["NAS", "XNAS"]),
    ("NYSE", &["NYQ", "XNYS"]),
    ("AMEX", &["ASE", "XASE"]),
    ("ARCA", &["PSE", "ARCX"]),
];

/// Canonical exchange code for a code or one of its aliases, upper-cased.
pub fn canonical_exchange(code: &str) -> String {
    let upper = code.trim().to_ascii_uppercase();
    ALIASES
        .iter()
        .find(|(canonical, aliases)| *canonical == upper || aliases.contains(&upper.as_str()))
        .map_or(upper, |(canonical, _)| (*canonical).to_owned())
}

/// Keeps rows listed on one of the given exchanges.
#[derive(Debug, Clone)]
pub struct ExchangeFilter {
    exchanges: Vec<String>,
    last_run: LastRun,
}

impl ExchangeFilter {
    pub fn new<I, S>(exchanges: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut canonical: Vec<String> = Vec::new();
        for exchange in exchanges {
            let code = canonical_exchange(exchange.as_ref());
            if code.is_empty() {
                return Err(FilterError::InvalidThreshold {
                    field: "exchange",
                    value: exchange.as_ref().to_owned(),
                });
            }
            if !canonical.contains(&code) {
                canonical.push(code);
            }
        }

        if canonical.is_empty() {
            return Err(FilterError::InvalidThreshold {
                field: "exchange",
                value: String::from("no exchanges"),
            });
        }

        Ok(Self {
            exchanges: canonical,
            last_run: LastRun::default(),
        })
    }

    pub fn exchanges(&self) -> &[String] {
        &self.exchanges
    }
}

impl SymbolFilter for ExchangeFilter {
    fn name(&self) -> &str {
        "exchange"
    }

    fn matches(&self, row: &MetricsRow) -> bool {
        row.exchange
            .as_deref()
            .is_some_and(|exchange| self.exchanges.contains(&canonical_exchange(exchange)))
    }

    fn last_run(&self) -> &LastRun {
        &self.last_run
    }
}
