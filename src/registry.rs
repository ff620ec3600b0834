//! Benchmark registry and name filtering.

use crate::error::{HarnessError, Result};
use crate::unit::BenchmarkUnit;

/// Registered benchmark units, kept in registration order.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    units: Vec<BenchmarkUnit>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit. Names must be unique.
    pub fn register(&mut self, unit: BenchmarkUnit) -> Result<()> {
        if self.get(unit.name()).is_some() {
            return Err(HarnessError::Configuration(format!(
                "benchmark '{}' is already registered",
                unit.name()
            )));
        }
        self.units.push(unit);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, unit: BenchmarkUnit) -> Result<Self> {
        self.register(unit)?;
        Ok(self)
    }

    /// Units whose name matches `filter`, in registration order.
    ///
    /// The filter is case-insensitive: a plain substring, or a glob where `*`
    /// matches any run of characters. No filter selects everything. Selecting
    /// nothing is an error.
    pub fn discover(&self, filter: Option<&str>) -> Result<Vec<&BenchmarkUnit>> {
        let selected: Vec<&BenchmarkUnit> = self
            .units
            .iter()
            .filter(|u| filter.map_or(true, |f| matches_glob(u.name(), f)))
            .collect();
        if selected.is_empty() {
            return Err(HarnessError::Selection {
                filter: filter.map(str::to_string),
            });
        }
        Ok(selected)
    }

    pub fn get(&self, name: &str) -> Option<&BenchmarkUnit> {
        self.units.iter().find(|u| u.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.units.iter().map(BenchmarkUnit::name).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Case-insensitive glob match; without `*` it is a substring match.
pub(crate) fn matches_glob(text: &str, pattern: &str) -> bool {
    let pattern = pattern.to_lowercase();
    let text = text.to_lowercase();

    if !pattern.contains('*') {
        return text.contains(&pattern);
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let last = parts.len() - 1;
    let mut remaining = text.as_str();

    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            // anchored at the start
            match remaining.strip_prefix(part) {
                Some(rest) => remaining = rest,
                None => return false,
            }
        } else if i == last {
            // anchored at the end
            return remaining.ends_with(part);
        } else {
            match remaining.find(part) {
                Some(pos) => remaining = &remaining[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}
