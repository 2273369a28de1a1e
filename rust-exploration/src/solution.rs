//! The solved decision model and its independent verification.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use schemars::JsonSchema;
use sdfsyde_common::{models::SDFToMultiCoreCharacterizedJobs, sdf::DependencyKind};
use sdfsyde_core::{
    headers::DecisionModelHeader, impl_decision_model_conversion,
    impl_decision_model_standard_parts, DecisionModel, SynthesisError,
};
use serde::{Deserialize, Serialize};

use crate::{
    flow::{verify_buffer_occupancy, TokenFlowNetwork},
    routing::{Hop, RoutedTransfer},
    search::SearchStatus,
    timing::{evaluate, ObjectiveWeights, Objectives, Placement},
};

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, JsonSchema)]
pub struct ScheduledJob {
    pub processing_element: String,
    pub start: u64,
    pub duration: u64,
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, JsonSchema)]
pub struct ScheduledHop {
    pub communication_unit: String,
    pub start: u64,
    pub duration: u64,
}

/// Tokens of one channel going from a sender job to a receiver job.
///
/// `routed_volume` is what actually crosses the network: the whole `tokens` when the two
/// jobs run on different processing elements and zero otherwise.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, JsonSchema)]
pub struct ScheduledTransfer {
    pub channel: String,
    pub sender: String,
    pub receiver: String,
    pub tokens: u64,
    pub routed_volume: u64,
    pub hops: Vec<ScheduledHop>,
}

/// A complete mapping and schedule of one iteration of the application.
///
/// `status` is `Complete` only on the best schedule of a search that explored its whole
/// space; every other schedule may still be improved on.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, JsonSchema)]
pub struct JobSchedulingSolution {
    pub schedule: BTreeMap<String, ScheduledJob>,
    pub transfers: Vec<ScheduledTransfer>,
    pub actor_throughputs: BTreeMap<String, u64>,
    pub objectives: Objectives,
    pub cost: u64,
    pub status: SearchStatus,
}

impl_decision_model_conversion!(JobSchedulingSolution);
impl DecisionModel for JobSchedulingSolution {
    impl_decision_model_standard_parts!(JobSchedulingSolution);

    fn header(&self) -> DecisionModelHeader {
        let mut elems: BTreeSet<String> = BTreeSet::new();
        for (job, s) in &self.schedule {
            elems.insert(job.to_owned());
            elems.insert(format!(
                "{}={}:{}-{}:{}",
                "mapping", job, "", s.processing_element, ""
            ));
        }
        for t in &self.transfers {
            elems.insert(format!(
                "{}={}:{}-{}:{}",
                t.channel, t.sender, "", t.receiver, ""
            ));
        }
        DecisionModelHeader {
            category: self.category(),
            body_path: None,
            covered_elements: elems,
        }
    }
}

impl JobSchedulingSolution {
    /// The mapping part of the solution, job to processing element.
    pub fn mapping(&self) -> BTreeMap<&str, &str> {
        self.schedule
            .iter()
            .map(|(j, s)| (j.as_str(), s.processing_element.as_str()))
            .collect()
    }

    pub fn objectives_map(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("THROUGHPUT".to_string(), self.objectives.throughput as f64),
            ("LATENCY".to_string(), self.objectives.latency as f64),
        ])
    }

    /// Assembles a solution out of the engine's indexed assignment.
    pub(crate) fn from_assignment(
        model: &SDFToMultiCoreCharacterizedJobs,
        network: &TokenFlowNetwork,
        placements: &[Placement],
        transfers: &[RoutedTransfer],
        weights: &ObjectiveWeights,
    ) -> JobSchedulingSolution {
        let platform = &model.characterized.platform;
        let capacities: Vec<u32> = platform
            .communication_units
            .iter()
            .map(|cu| platform.max_transfers_of(cu).unwrap_or(0))
            .collect();
        let evaluation = evaluate(
            network,
            placements,
            transfers,
            platform.processing_elements.len(),
            &capacities,
        );
        let schedule = model
            .jobs
            .iter()
            .zip(placements.iter())
            .map(|(j, p)| {
                (
                    j.identifier(),
                    ScheduledJob {
                        processing_element: platform.processing_elements[p.pe].to_owned(),
                        start: p.start,
                        duration: p.duration,
                    },
                )
            })
            .collect();
        let scheduled_transfers = transfers
            .iter()
            .map(|t| {
                let e = &network.edges[t.edge];
                ScheduledTransfer {
                    channel: e.channel.to_owned().unwrap_or_default(),
                    sender: model.jobs[e.src].identifier(),
                    receiver: model.jobs[e.dst].identifier(),
                    tokens: e.volume,
                    routed_volume: t.volume,
                    hops: t
                        .hops
                        .iter()
                        .map(|h: &Hop| ScheduledHop {
                            communication_unit: platform.communication_units[h.unit].to_owned(),
                            start: h.start,
                            duration: h.duration,
                        })
                        .collect(),
                }
            })
            .collect();
        let mut actor_throughputs: BTreeMap<String, u64> = BTreeMap::new();
        for (j, th) in model.jobs.iter().zip(evaluation.job_throughputs.iter()) {
            let entry = actor_throughputs.entry(j.actor.to_owned()).or_insert(0);
            *entry = (*entry).max(*th);
        }
        JobSchedulingSolution {
            schedule,
            transfers: scheduled_transfers,
            actor_throughputs,
            objectives: evaluation.objectives,
            cost: weights.cost(&evaluation.objectives),
            status: SearchStatus::BudgetExhausted,
        }
    }
}

fn violation(msg: String) -> SynthesisError {
    SynthesisError::Infeasible(format!("solution violates {}", msg))
}

/// Checks a solution against its problem from scratch.
///
/// Every job runs once on an admissible processing element for its WCET, processing
/// elements run one job at a time, communication units never serve more transfers than
/// their capacity, every dependency is respected including transfer delays, every
/// cross-processor token travels over a connected route while same-processor tokens stay
/// off the network, buffers stay within their bounds and the reported objectives match
/// the schedule. The first violation found is returned as `Infeasible`.
pub fn verify(
    model: &SDFToMultiCoreCharacterizedJobs,
    solution: &JobSchedulingSolution,
) -> Result<(), SynthesisError> {
    let c = &model.characterized;
    let platform = &c.platform;
    let network = TokenFlowNetwork::new(model)?;
    let pe_index: HashMap<&str, usize> = platform
        .processing_elements
        .iter()
        .enumerate()
        .map(|(i, p)| (p.as_str(), i))
        .collect();
    let cu_index: HashMap<&str, usize> = platform
        .communication_units
        .iter()
        .enumerate()
        .map(|(i, p)| (p.as_str(), i))
        .collect();

    // mapping and timing coherence
    if solution.schedule.len() != model.jobs.len() {
        return Err(violation(format!(
            "coverage: {} jobs scheduled out of {}",
            solution.schedule.len(),
            model.jobs.len()
        )));
    }
    let mut placements = Vec::with_capacity(model.jobs.len());
    for job in &model.jobs {
        let id = job.identifier();
        let s = solution
            .schedule
            .get(&id)
            .ok_or_else(|| violation(format!("coverage: job {} is not scheduled", id)))?;
        let pe = *pe_index
            .get(s.processing_element.as_str())
            .ok_or_else(|| {
                violation(format!("mapping: unknown element {}", s.processing_element))
            })?;
        if !c
            .admissible_processing_elements(&job.actor)
            .contains(&s.processing_element.as_str())
        {
            return Err(violation(format!(
                "mapping: {} may not run on {}",
                id, s.processing_element
            )));
        }
        let wcet = c.wcet_of(&job.actor, &s.processing_element)?;
        if s.duration != wcet {
            return Err(violation(format!(
                "mapping: {} lasts {} instead of its WCET {}",
                id, s.duration, wcet
            )));
        }
        placements.push(Placement {
            pe,
            start: s.start,
            duration: s.duration,
        });
    }

    // processor exclusivity
    for pe in 0..platform.processing_elements.len() {
        let mut intervals: Vec<(u64, u64)> = placements
            .iter()
            .filter(|p| p.pe == pe && p.duration > 0)
            .map(|p| (p.start, p.end()))
            .collect();
        intervals.sort_unstable();
        if let Some(w) = intervals.windows(2).find(|w| w[0].1 > w[1].0) {
            return Err(violation(format!(
                "exclusivity on {}: [{}, {}) and [{}, {}) overlap",
                platform.processing_elements[pe], w[0].0, w[0].1, w[1].0, w[1].1
            )));
        }
    }

    // routing consistency and causal ordering
    let mut routed: Vec<RoutedTransfer> = Vec::new();
    let mut by_pair: HashMap<(&str, &str, &str), &ScheduledTransfer> = HashMap::new();
    for t in &solution.transfers {
        by_pair.insert((t.channel.as_str(), t.sender.as_str(), t.receiver.as_str()), t);
    }
    for (i, e) in network.edges.iter().enumerate() {
        let (src, dst) = (&placements[e.src], &placements[e.dst]);
        let mut ready = src.end();
        if e.kind == DependencyKind::Data {
            let channel = e.channel.as_deref().unwrap_or_default();
            let sender = model.jobs[e.src].identifier();
            let receiver = model.jobs[e.dst].identifier();
            let t = by_pair
                .get(&(channel, sender.as_str(), receiver.as_str()))
                .ok_or_else(|| {
                    violation(format!("routing: no transfer from {} to {}", sender, receiver))
                })?;
            if t.tokens != e.volume {
                return Err(violation(format!(
                    "conservation: {} tokens reported from {} to {} instead of {}",
                    t.tokens, sender, receiver, e.volume
                )));
            }
            if src.pe == dst.pe {
                if t.routed_volume != 0 || !t.hops.is_empty() {
                    return Err(violation(format!(
                        "routing: same element transfer from {} to {} uses the network",
                        sender, receiver
                    )));
                }
            } else {
                if t.routed_volume != e.volume || t.hops.is_empty() {
                    return Err(violation(format!(
                        "routing: {} of {} tokens routed from {} to {}",
                        t.routed_volume, e.volume, sender, receiver
                    )));
                }
                let mut previous = platform.processing_elements[src.pe].as_str();
                let mut hops = Vec::with_capacity(t.hops.len());
                for h in &t.hops {
                    let unit = *cu_index.get(h.communication_unit.as_str()).ok_or_else(|| {
                        violation(format!("routing: unknown unit {}", h.communication_unit))
                    })?;
                    if !platform.neighbours_of(previous).contains(&h.communication_unit.as_str()) {
                        return Err(violation(format!(
                            "routing: {} is not adjacent to {}",
                            h.communication_unit, previous
                        )));
                    }
                    let expected = e
                        .volume
                        .checked_mul(c.transfer_cost_of(channel, &h.communication_unit)?);
                    if Some(h.duration) != expected || h.start < ready {
                        return Err(violation(format!(
                            "routing: hop on {} from {} to {} is mistimed",
                            h.communication_unit, sender, receiver
                        )));
                    }
                    ready = h.start.saturating_add(h.duration);
                    previous = h.communication_unit.as_str();
                    hops.push(Hop {
                        unit,
                        start: h.start,
                        duration: h.duration,
                    });
                }
                let last = platform.processing_elements[dst.pe].as_str();
                if !platform.neighbours_of(previous).contains(&last) {
                    return Err(violation(format!(
                        "routing: route from {} to {} does not reach {}",
                        sender, receiver, last
                    )));
                }
                routed.push(RoutedTransfer {
                    edge: i,
                    volume: t.routed_volume,
                    hops,
                    arrival: ready,
                });
            }
        }
        if dst.start < ready {
            return Err(violation(format!(
                "causality: {} starts at {} before its input is ready at {}",
                model.jobs[e.dst].identifier(),
                dst.start,
                ready
            )));
        }
    }

    // network capacity
    for (u, cu) in platform.communication_units.iter().enumerate() {
        let cap = platform.max_transfers_of(cu)? as usize;
        let hops: Vec<(u64, u64)> = routed
            .iter()
            .flat_map(|t| t.hops.iter())
            .filter(|h| h.unit == u && h.duration > 0)
            .map(|h| (h.start, h.start.saturating_add(h.duration)))
            .collect();
        for (s, _) in &hops {
            let concurrent = hops.iter().filter(|(a, b)| a <= s && s < b).count();
            if concurrent > cap {
                return Err(violation(format!(
                    "capacity of {}: {} transfers at time {}",
                    cu, concurrent, s
                )));
            }
        }
    }

    // buffers
    let starts: Vec<u64> = placements.iter().map(|p| p.start).collect();
    let durations: Vec<u64> = placements.iter().map(|p| p.duration).collect();
    verify_buffer_occupancy(model, &starts, &durations).map_err(|e| violation(e.to_string()))?;

    // objectives
    let capacities: Vec<u32> = platform
        .communication_units
        .iter()
        .map(|cu| platform.max_transfers_of(cu).unwrap_or(0))
        .collect();
    let evaluation = evaluate(
        &network,
        &placements,
        &routed,
        platform.processing_elements.len(),
        &capacities,
    );
    if evaluation.objectives != solution.objectives {
        return Err(violation(format!(
            "objectives: reported {:?} but the schedule yields {:?}",
            solution.objectives, evaluation.objectives
        )));
    }
    if solution.objectives.throughput > solution.objectives.latency {
        return Err(violation(format!(
            "objectives: throughput {} above latency {}",
            solution.objectives.throughput, solution.objectives.latency
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_models::chain;

    fn pipelined_on_one_core() -> (SDFToMultiCoreCharacterizedJobs, JobSchedulingSolution) {
        let model = chain(2, 1, 0);
        let network = TokenFlowNetwork::new(&model).unwrap();
        let placements = vec![
            Placement { pe: 0, start: 0, duration: 1 },
            Placement { pe: 0, start: 1, duration: 1 },
        ];
        let transfers = vec![RoutedTransfer {
            edge: 0,
            volume: 0,
            hops: vec![],
            arrival: 1,
        }];
        let weights = ObjectiveWeights { throughput: 1, latency: 1 };
        let sol = JobSchedulingSolution::from_assignment(
            &model,
            &network,
            &placements,
            &transfers,
            &weights,
        );
        (model, sol)
    }

    #[test]
    fn assembled_solution_verifies() {
        let (model, sol) = pipelined_on_one_core();
        assert_eq!(sol.objectives, Objectives { throughput: 2, latency: 2 });
        assert_eq!(sol.cost, 4);
        assert_eq!(sol.actor_throughputs["a"], 2);
        assert_eq!(sol.mapping()["a_1"], "p0");
        assert_eq!(sol.status, SearchStatus::BudgetExhausted);
        assert!(verify(&model, &sol).is_ok());
    }

    #[test]
    fn overlapping_jobs_are_rejected() {
        let (model, mut sol) = pipelined_on_one_core();
        sol.schedule.get_mut("b_1").unwrap().start = 0;
        assert!(matches!(verify(&model, &sol), Err(SynthesisError::Infeasible(_))));
    }

    #[test]
    fn cross_processor_tokens_need_a_route() {
        let (model, mut sol) = pipelined_on_one_core();
        sol.schedule.get_mut("b_1").unwrap().processing_element = "p1".to_string();
        match verify(&model, &sol) {
            Err(SynthesisError::Infeasible(msg)) => assert!(msg.contains("routing")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn misreported_objectives_are_rejected() {
        let (model, mut sol) = pipelined_on_one_core();
        sol.objectives.throughput = 1;
        assert!(matches!(verify(&model, &sol), Err(SynthesisError::Infeasible(_))));
    }
}
