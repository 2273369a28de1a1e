use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::{BTreeSet, HashMap, HashSet},
    hash::Hash,
    path::{Path, PathBuf},
};

use crate::SynthesisError;

/// The part of a decision model that identification reasons about.
///
/// The covered elements are kept sorted so that two headers describing the same
/// model compare and serialise identically.
#[derive(Serialize, Clone, Deserialize, Debug)]
pub struct DecisionModelHeader {
    pub category: String,
    pub body_path: Option<String>,
    pub covered_elements: BTreeSet<String>,
}

impl DecisionModelHeader {
    pub fn write_to_dir(
        &self,
        base_path: &Path,
        prefix_str: &str,
        suffix_str: &str,
    ) -> Result<PathBuf, SynthesisError> {
        let p = base_path.join(format!(
            "header_{}_{}_{}.json",
            prefix_str, self.category, suffix_str
        ));
        std::fs::write(&p, serde_json::to_string_pretty(self)?)?;
        Ok(p)
    }
}

impl PartialEq<DecisionModelHeader> for DecisionModelHeader {
    fn eq(&self, o: &DecisionModelHeader) -> bool {
        self.category == o.category && self.covered_elements == o.covered_elements
    }
}

impl PartialOrd<DecisionModelHeader> for DecisionModelHeader {
    fn partial_cmp(&self, o: &DecisionModelHeader) -> std::option::Option<std::cmp::Ordering> {
        let superset = self.covered_elements.is_superset(&o.covered_elements);
        let subset = self.covered_elements.is_subset(&o.covered_elements);
        match (superset, subset) {
            (true, true) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Greater),
            (false, true) => Some(Ordering::Less),
            _ => None,
        }
    }
}

impl Eq for DecisionModelHeader {}

impl Hash for DecisionModelHeader {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.category.hash(state);
        for m in &self.covered_elements {
            m.hash(state);
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExplorationBid {
    pub explorer_unique_identifier: String,
    pub can_explore: bool,
    pub is_exact: bool,
    pub competitiveness: f32,
    pub target_objectives: HashSet<String>,
    pub additional_numeric_properties: HashMap<String, f32>,
}

impl ExplorationBid {
    pub fn impossible(explorer_id: &str) -> ExplorationBid {
        ExplorationBid {
            explorer_unique_identifier: explorer_id.to_owned(),
            can_explore: false,
            is_exact: false,
            competitiveness: 0.0,
            target_objectives: HashSet::new(),
            additional_numeric_properties: HashMap::new(),
        }
    }
}

impl PartialEq<ExplorationBid> for ExplorationBid {
    fn eq(&self, other: &ExplorationBid) -> bool {
        self.can_explore == other.can_explore
            && self.is_exact == other.is_exact
            && self.competitiveness == other.competitiveness
            && self.target_objectives == other.target_objectives
    }
}

impl PartialOrd<ExplorationBid> for ExplorationBid {
    fn partial_cmp(&self, other: &ExplorationBid) -> Option<Ordering> {
        if self.can_explore != other.can_explore {
            return Some(self.can_explore.cmp(&other.can_explore));
        }
        if self.target_objectives != other.target_objectives {
            return None;
        }
        match (self.is_exact, other.is_exact) {
            (true, false) => Some(Ordering::Greater),
            (false, true) => Some(Ordering::Less),
            _ => self.competitiveness.partial_cmp(&other.competitiveness),
        }
    }
}
