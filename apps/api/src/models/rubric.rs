#![allow(dead_code)]

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// A single weighted criterion a résumé is judged against.
///
/// `weight` is expected in `[0, 1]`; the form that collects criteria clamps it,
/// so the pipeline does not re-validate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub id: String,
    pub name: String,
    pub description: String,
    pub weight: f64,
}

/// Ordered set of criteria. Order is preserved into the judge prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rubric {
    criteria: Vec<Criterion>,
}

impl Rubric {
    pub fn new(criteria: Vec<Criterion>) -> Self {
        Self { criteria }
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    pub fn contains(&self, criterion_id: &str) -> bool {
        self.criteria.iter().any(|c| c.id == criterion_id)
    }

    /// Criterion id → weight. When an id is declared more than once the last
    /// declaration wins.
    pub fn weights(&self) -> HashMap<&str, f64> {
        self.criteria
            .iter()
            .map(|c| (c.id.as_str(), c.weight))
            .collect()
    }

    /// Ids declared more than once, in order of first repetition.
    pub fn duplicate_ids(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for criterion in &self.criteria {
            let id = criterion.id.as_str();
            if !seen.insert(id) && !duplicates.contains(&id) {
                duplicates.push(id);
            }
        }
        duplicates
    }
}
