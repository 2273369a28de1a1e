pub mod error;
pub mod headers;
pub mod macros;

use std::{
    collections::BTreeMap,
    path::Path,
    sync::Arc,
};

use derive_builder::Builder;
use downcast_rs::{impl_downcast, Downcast, DowncastSync};
use headers::{DecisionModelHeader, ExplorationBid};
use serde::de::DeserializeOwned;
use std::cmp::Ordering;

pub use error::SynthesisError;

// re-exported so that the macros of this crate resolve in downstream crates
pub use ciborium;
pub use rmp_serde;
pub use schemars;
pub use serde_json;

/// The trait/interface for a decision model in the design space identification methodology, as
/// defined in [1].
///
/// A decision model is a collection of parameters and associated functions that potentially define design spaces,
/// e.g. a decision model for SDFs with a topology matrix parameter and an associated function to check the existence of deadlocks.
///
/// The header is a necessary abstraction to ensure that the identification procedure terminates properly.
/// It also gives an idea of how much of the input models are being "covered" by the decision model in question.
///
/// [1] R. Jordão, I. Sander and M. Becker, "Formulation of Design Space Exploration Problems by
/// Composable Design Space Identification," 2021 Design, Automation & Test in Europe Conference &
/// Exhibition (DATE), 2021, pp. 1204-1207, doi: 10.23919/DATE51398.2021.9474082.
///
pub trait DecisionModel: Send + DowncastSync {
    fn category(&self) -> String;

    fn header(&self) -> DecisionModelHeader;

    fn body_as_json(&self) -> Option<String> {
        None
    }

    fn body_as_msgpack(&self) -> Option<Vec<u8>> {
        None
    }

    fn body_as_cbor(&self) -> Option<Vec<u8>> {
        None
    }

    fn dominates(&self, o: &dyn DecisionModel) -> bool {
        matches!(
            self.header().partial_cmp(&o.header()),
            Some(Ordering::Greater)
        )
    }

    fn write_to_dir(
        &self,
        base_path: &Path,
        prefix_str: &str,
        suffix_str: &str,
    ) -> Result<DecisionModelHeader, SynthesisError> {
        let mut h = self.header();
        if let Some(j) = self.body_as_json() {
            let p = base_path.join(format!(
                "body_{}_{}_{}.json",
                prefix_str, h.category, suffix_str
            ));
            std::fs::write(&p, j)?;
            h.body_path = p.to_str().map(|x| x.to_string());
        }
        if let Some(b) = self.body_as_msgpack() {
            let p = base_path.join(format!(
                "body_{}_{}_{}.msgpack",
                prefix_str, h.category, suffix_str
            ));
            std::fs::write(&p, b)?;
        }
        if let Some(b) = self.body_as_cbor() {
            let p = base_path.join(format!(
                "body_{}_{}_{}.cbor",
                prefix_str, h.category, suffix_str
            ));
            std::fs::write(&p, b)?;
        }
        h.write_to_dir(base_path, prefix_str, suffix_str)?;
        Ok(h)
    }
}
impl_downcast!(sync DecisionModel);

impl DecisionModel for DecisionModelHeader {
    fn category(&self) -> String {
        self.category.to_owned()
    }

    fn header(&self) -> DecisionModelHeader {
        self.to_owned()
    }
}

impl PartialEq<dyn DecisionModel> for dyn DecisionModel {
    fn eq(&self, other: &dyn DecisionModel) -> bool {
        self.category() == other.category() && self.header() == other.header()
    }
}

impl Eq for dyn DecisionModel {}

impl PartialOrd<dyn DecisionModel> for dyn DecisionModel {
    fn partial_cmp(&self, other: &dyn DecisionModel) -> Option<Ordering> {
        self.header().partial_cmp(&other.header())
    }
}

/// An identification rule takes every decision model known so far and returns the
/// ones it could identify out of them. Rules must be pure so that they can run in
/// parallel and the procedure reaches a fix point.
pub type IdentificationRule = fn(&[Arc<dyn DecisionModel>]) -> Vec<Arc<dyn DecisionModel>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Builder, serde::Serialize, serde::Deserialize)]
#[builder(default)]
pub struct ExplorationConfiguration {
    pub max_sols: u64,
    pub total_timeout: u64,
}

/// A solved decision model together with the objective values it achieves.
///
/// Objectives are kept in an ordered map so that solutions print and compare
/// deterministically.
pub type ExplorationSolution = (Arc<dyn DecisionModel>, BTreeMap<String, f64>);

/// This trait is the root for all possible explorers. A real explorer should
/// implement this trait by dispatching the real exploration from 'explore'.
///
/// A correct implementation of the explorer should:
///
///   1. bid positively only for the decision models it can actually solve;
///   2. return an empty list if the decision model is explorable but no solution was found
///      within the budget, and an error if the decision model is proven infeasible.
///
pub trait Explorer: Downcast + Send + Sync {
    fn unique_identifier(&self) -> String;
    fn bid(&self, m: Arc<dyn DecisionModel>) -> ExplorationBid;
    fn explore(
        &self,
        m: Arc<dyn DecisionModel>,
        currrent_solutions: &[ExplorationSolution],
        exploration_configuration: ExplorationConfiguration,
    ) -> Result<Vec<ExplorationSolution>, SynthesisError>;
}
impl_downcast!(Explorer);

pub fn compute_dominant_biddings<'a, I>(biddings: I) -> Option<(usize, ExplorationBid)>
where
    I: Iterator<Item = &'a ExplorationBid>,
{
    biddings
        .enumerate()
        .filter(|(_, b)| b.can_explore)
        .reduce(|(i, b), (j, bb)| match b.partial_cmp(bb) {
            Some(Ordering::Less) => (j, bb),
            _ => (i, b),
        })
        .map(|(i, b)| (i, b.to_owned()))
}

pub fn load_decision_model<T: DecisionModel + DeserializeOwned>(
    path: &Path,
) -> Result<T, SynthesisError> {
    let f = std::fs::File::open(path)?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "cbor" => Ok(ciborium::from_reader(f)?),
        "msgpack" => Ok(rmp_serde::from_read(f)?),
        "json" => Ok(serde_json::from_reader(f)?),
        other => Err(SynthesisError::Serialization(format!(
            "unknown model file extension '{}' for {}",
            other,
            path.display()
        ))),
    }
}

/// Groups objective values by name, mostly to print them.
pub fn objectives_to_string(objs: &BTreeMap<String, f64>) -> String {
    objs.iter()
        .map(|(k, v)| format!("{}: {}", k, v))
        .reduce(|s1, s2| format!("{}, {}", s1, s2))
        .unwrap_or("None".to_owned())
}

pub fn objectives_from_pairs<I, S>(pairs: I) -> BTreeMap<String, f64>
where
    I: IntoIterator<Item = (S, f64)>,
    S: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
