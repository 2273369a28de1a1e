pub mod flow;
pub mod mapping;
pub mod routing;
pub mod search;
pub mod solution;
pub mod timing;

#[cfg(test)]
pub(crate) mod test_models;

use std::{collections::HashSet, sync::Arc};

use derive_builder::Builder;
use log::debug;
use sdfsyde_common::models::{SDFToMultiCoreCharacterized, SDFToMultiCoreCharacterizedJobs};
use sdfsyde_core::{
    headers::ExplorationBid, DecisionModel, ExplorationConfiguration, ExplorationSolution,
    Explorer, SynthesisError,
};
use serde::{Deserialize, Serialize};

pub use search::{SearchDriver, SearchOutcome, SearchStatus};
pub use solution::{verify, JobSchedulingSolution};
pub use timing::{ObjectiveWeights, Objectives};

/// Knobs of the schedule search. The objective weights have no default and must be
/// given explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(build_fn(error = "SynthesisError"))]
pub struct SearchConfiguration {
    pub weights: ObjectiveWeights,
    #[builder(default = "0")]
    pub seed: u64,
    #[builder(default = "64")]
    pub restart_base_factor: u64,
    #[builder(default = "16")]
    pub max_restarts: u64,
    #[builder(default = "8")]
    pub max_routes_per_pair: usize,
    #[builder(default = "1")]
    pub parallel_workers: usize,
    #[builder(default = "true")]
    pub warm_start: bool,
    /// In seconds, zero for no limit.
    #[builder(default = "0")]
    pub total_timeout: u64,
    /// Stop after this many improving solutions, zero for no limit.
    #[builder(default = "0")]
    pub max_sols: u64,
}

impl SearchConfiguration {
    /// The same configuration with the limits of an exploration request, where set.
    pub fn limited_by(&self, exploration: &ExplorationConfiguration) -> SearchConfiguration {
        let mut c = self.clone();
        if exploration.total_timeout > 0 {
            c.total_timeout = exploration.total_timeout;
        }
        if exploration.max_sols > 0 {
            c.max_sols = exploration.max_sols;
        }
        c
    }
}

/// Validates, analyses and expands a characterised problem, then searches for its best
/// schedule.
///
/// Problems proven impossible before the search starts, like overflowing buffers,
/// surface as `Infeasible`; `MalformedModel` is returned untouched.
pub fn synthesize(
    model: &SDFToMultiCoreCharacterized,
    config: &SearchConfiguration,
) -> Result<SearchOutcome, SynthesisError> {
    let jobs = SDFToMultiCoreCharacterizedJobs::from_characterized(model.to_owned())
        .map_err(|e| e.escalate())?;
    debug!(
        "expanded the application into {} jobs and {} dependencies",
        jobs.jobs.len(),
        jobs.dependencies.len()
    );
    SearchDriver::new(config.to_owned()).run(&jobs)
}

/// Explorer of job-expanded SDF problems on communicating multicores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SDFJobSchedulingExplorer {
    pub configuration: SearchConfiguration,
}

impl SDFJobSchedulingExplorer {
    pub fn new(configuration: SearchConfiguration) -> SDFJobSchedulingExplorer {
        SDFJobSchedulingExplorer { configuration }
    }
}

impl Explorer for SDFJobSchedulingExplorer {
    fn unique_identifier(&self) -> String {
        "SDFJobSchedulingExplorer".to_string()
    }

    fn bid(&self, m: Arc<dyn DecisionModel>) -> ExplorationBid {
        match SDFToMultiCoreCharacterizedJobs::try_from(m.as_ref()) {
            Ok(jobs) => ExplorationBid {
                explorer_unique_identifier: self.unique_identifier(),
                can_explore: true,
                is_exact: true,
                competitiveness: 1.0,
                target_objectives: HashSet::from(["THROUGHPUT".to_string(), "LATENCY".to_string()]),
                additional_numeric_properties: [("jobs".to_string(), jobs.jobs.len() as f32)]
                    .into_iter()
                    .collect(),
            },
            Err(_) => ExplorationBid::impossible(&self.unique_identifier()),
        }
    }

    /// Returns the improving solutions of one search, without those already dominated by
    /// the solutions given. Each one carries in its body how the search ended for it. An
    /// exhausted budget without any solution is not an error here.
    fn explore(
        &self,
        m: Arc<dyn DecisionModel>,
        currrent_solutions: &[ExplorationSolution],
        exploration_configuration: ExplorationConfiguration,
    ) -> Result<Vec<ExplorationSolution>, SynthesisError> {
        let model = SDFToMultiCoreCharacterizedJobs::try_from(m.as_ref())
            .map_err(|e| SynthesisError::MalformedModel(e.to_string()))?;
        let driver = SearchDriver::new(self.configuration.limited_by(&exploration_configuration));
        let outcome = match driver.run(&model) {
            Ok(o) => o,
            Err(SynthesisError::BudgetExhausted) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(outcome
            .improvements
            .into_iter()
            .map(|s| {
                let objs = s.objectives_map();
                (Arc::new(s) as Arc<dyn DecisionModel>, objs)
            })
            .filter(|(_, objs)| {
                !currrent_solutions.iter().any(|(_, other)| {
                    other.iter().all(|(k, v)| objs.get(k).map(|x| v <= x).unwrap_or(false))
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_models::chain;

    fn weights() -> ObjectiveWeights {
        ObjectiveWeights {
            throughput: 1,
            latency: 1,
        }
    }

    #[test]
    fn weights_are_required() {
        match SearchConfigurationBuilder::default().seed(3).build() {
            Err(SynthesisError::MalformedModel(msg)) => assert!(msg.contains("weights")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn defaults_are_applied() {
        let c = SearchConfigurationBuilder::default()
            .weights(weights())
            .build()
            .unwrap();
        assert_eq!(c.seed, 0);
        assert_eq!(c.max_routes_per_pair, 8);
        assert!(c.warm_start);
        let limited = c.limited_by(&ExplorationConfiguration {
            max_sols: 2,
            ..Default::default()
        });
        assert_eq!(limited.max_sols, 2);
        assert_eq!(limited.total_timeout, 0);
    }

    #[test]
    fn explorer_bids_only_for_job_models() {
        let explorer = SDFJobSchedulingExplorer::new(
            SearchConfigurationBuilder::default()
                .weights(weights())
                .build()
                .unwrap(),
        );
        let jobs: Arc<dyn DecisionModel> = Arc::new(chain(2, 1, 0));
        let bid = explorer.bid(jobs.clone());
        assert!(bid.can_explore && bid.is_exact);
        let characterized: Arc<dyn DecisionModel> = Arc::new(chain(2, 1, 0).characterized);
        assert!(!explorer.bid(characterized).can_explore);
        let sols = explorer
            .explore(jobs.clone(), &[], ExplorationConfiguration::default())
            .unwrap();
        assert!(!sols.is_empty());
        let last = sols.last().map(|(m, _)| JobSchedulingSolution::try_from(m.as_ref()));
        assert_eq!(last.unwrap().unwrap().status, SearchStatus::Complete);
        let again = explorer
            .explore(jobs, &sols, ExplorationConfiguration::default())
            .unwrap();
        assert!(again.is_empty());
    }
}
