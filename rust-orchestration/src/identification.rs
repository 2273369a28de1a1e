use std::{cmp::Ordering, sync::Arc};

use log::debug;
use rayon::prelude::*;
use sdfsyde_core::{DecisionModel, IdentificationRule};

/// Runs every rule over the known decision models until no rule identifies anything new.
///
/// Rules of one step run in parallel and only see the models known at the start of the
/// step. At least one step is always performed.
pub fn identification_procedure(
    rules: &[IdentificationRule],
    pre_identified: Vec<Arc<dyn DecisionModel>>,
) -> Vec<Arc<dyn DecisionModel>> {
    let mut step = 0;
    let mut identified: Vec<Arc<dyn DecisionModel>> = Vec::new();
    for m in pre_identified {
        if !identified.contains(&m) {
            identified.push(m);
        }
    }
    loop {
        let before = identified.len();
        let potentials: Vec<Arc<dyn DecisionModel>> = rules
            .par_iter()
            .flat_map(|rule| rule(&identified))
            .collect();
        for m in potentials {
            if !identified.contains(&m) {
                identified.push(m);
            }
        }
        debug!(
            "{} total decision models identified at step {}",
            identified.len(),
            step
        );
        step += 1;
        if identified.len() == before {
            break;
        }
    }
    identified
}

/// The decision models not strictly dominated by any other one.
pub fn compute_dominant_decision_models(
    decision_models: &[Arc<dyn DecisionModel>],
) -> Vec<Arc<dyn DecisionModel>> {
    decision_models
        .iter()
        .filter(|m| {
            let h = m.header();
            decision_models
                .iter()
                .all(|o| !matches!(h.partial_cmp(&o.header()), Some(Ordering::Less)))
        })
        .cloned()
        .collect()
}
