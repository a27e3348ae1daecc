//! Exclusion filter: components an interest response must avoid, one name level at a time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::name::{Component, Name};

/// One filter entry: a concrete component or a wildcard bounding an open range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExcludeEntry {
    Any,
    Component(Component),
}

/// Ordered list of exclusion entries.
///
/// An `Any` entry excludes every component strictly between its neighbouring
/// concrete components (unbounded when it is first or last).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExclusionFilter {
    entries: Vec<ExcludeEntry>,
}

impl ExclusionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ExcludeEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Add a wildcard. No-op if the last entry already is one.
    pub fn add_any(&mut self) {
        if self.entries.last() != Some(&ExcludeEntry::Any) {
            self.entries.push(ExcludeEntry::Any);
        }
    }

    /// Add every component of `name` as its own single-level entry.
    pub fn add_name(&mut self, name: &Name) {
        self.entries.extend(
            name.components()
                .iter()
                .cloned()
                .map(ExcludeEntry::Component),
        );
    }

    pub fn add_component(&mut self, component: Component) {
        self.entries.push(ExcludeEntry::Component(component));
    }

    /// Add a run of names, sorted by canonical order, each decomposed to single components.
    pub fn add_names<'a, I>(&mut self, names: I)
    where
        I: IntoIterator<Item = &'a Name>,
    {
        let mut run: Vec<&Name> = names.into_iter().collect();
        run.sort();
        for name in run {
            self.add_name(name);
        }
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Whether `component` is excluded: equal to a listed component, or inside a wildcard range.
    pub fn is_excluded(&self, component: &Component) -> bool {
        for (i, entry) in self.entries.iter().enumerate() {
            match entry {
                ExcludeEntry::Component(c) => {
                    if c == component {
                        return true;
                    }
                }
                ExcludeEntry::Any => {
                    let lower = self.entries[..i].iter().rev().find_map(as_component);
                    let upper = self.entries[i + 1..].iter().find_map(as_component);
                    let above = lower.map_or(true, |l| component > l);
                    let below = upper.map_or(true, |u| component < u);
                    if above && below {
                        return true;
                    }
                }
            }
        }
        false
    }
}

fn as_component(entry: &ExcludeEntry) -> Option<&Component> {
    match entry {
        ExcludeEntry::Component(c) => Some(c),
        ExcludeEntry::Any => None,
    }
}

impl fmt::Display for ExclusionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match entry {
                ExcludeEntry::Any => f.write_str("<any>")?,
                ExcludeEntry::Component(c) => write!(f, "{}", c)?,
            }
        }
        Ok(())
    }
}
