use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::{graph::NodeIndex, Graph};
use schemars::JsonSchema;
use sdfsyde_core::{
    headers::DecisionModelHeader, impl_decision_model_conversion,
    impl_decision_model_standard_parts, DecisionModel, SynthesisError,
};
use serde::{Deserialize, Serialize};

use crate::sdf::{self, FiringDependency};

/// Topology rates bigger than this in magnitude are rejected; keeps every
/// rational manipulation of the balance equations far from overflow.
pub const MAX_TOPOLOGY_RATE: i64 = 1 << 24;

/// WCETs and per-token transfer times above this are rejected, so that one transfer of
/// the tokens a rate allows still fits in 64 bits.
pub const MAX_TIME: u64 = 1 << 32;

fn malformed(msg: String) -> SynthesisError {
    SynthesisError::MalformedModel(msg)
}

fn check_identifiers(kind: &str, ids: &[String]) -> Result<(), SynthesisError> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.is_empty() {
            return Err(malformed(format!("empty {} identifier", kind)));
        }
        if !seen.insert(id.as_str()) {
            return Err(malformed(format!("duplicated {} identifier '{}'", kind, id)));
        }
    }
    Ok(())
}

/// Decision model for synchronous dataflow graphs.
///
/// The topology is kept as a sparse balance matrix: `topology[channel][actor]` is the
/// number of tokens the actor produces (positive) or consumes (negative) on the channel
/// per firing. Missing entries are zero. A channel has at most one producer and at most
/// one consumer; a channel with no entry at all is a self-loop whose net exchange is zero,
/// hence it never carries any volume.
///
/// Every channel has a capacity, i.e. the maximum number of tokens it can hold at any
/// instant, and a number of initial tokens, also known as delays.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, JsonSchema)]
pub struct SDFApplication {
    pub actors_identifiers: Vec<String>,
    pub channels_identifiers: Vec<String>,
    pub topology: HashMap<String, HashMap<String, i64>>,
    pub channel_capacities: HashMap<String, u64>,
    pub channel_initial_tokens: HashMap<String, u64>,
}

impl_decision_model_conversion!(SDFApplication);
impl DecisionModel for SDFApplication {
    impl_decision_model_standard_parts!(SDFApplication);

    fn header(&self) -> DecisionModelHeader {
        let mut elems: BTreeSet<String> = BTreeSet::new();
        elems.extend(self.actors_identifiers.iter().map(|x| x.to_owned()));
        elems.extend(self.channels_identifiers.iter().map(|x| x.to_owned()));
        for c in &self.channels_identifiers {
            if let Some((p, prod)) = self.producer_of(c) {
                elems.insert(format!("{}={}:{}-{}:{}", prod, p, "", c, ""));
            }
            if let Some((k, cons)) = self.consumer_of(c) {
                elems.insert(format!("{}={}:{}-{}:{}", cons, c, "", k, ""));
            }
        }
        DecisionModelHeader {
            category: self.category(),
            body_path: None,
            covered_elements: elems,
        }
    }
}

impl SDFApplication {
    /// The signed rate of `actor` on `channel`, zero when absent.
    pub fn rate(&self, channel: &str, actor: &str) -> i64 {
        self.topology
            .get(channel)
            .and_then(|row| row.get(actor))
            .copied()
            .unwrap_or(0)
    }

    /// The producing actor of a channel and its production rate.
    pub fn producer_of(&self, channel: &str) -> Option<(&str, u64)> {
        self.actors_identifiers
            .iter()
            .map(|a| (a.as_str(), self.rate(channel, a)))
            .find(|(_, r)| *r > 0)
            .map(|(a, r)| (a, r as u64))
    }

    /// The consuming actor of a channel and its consumption rate.
    pub fn consumer_of(&self, channel: &str) -> Option<(&str, u64)> {
        self.actors_identifiers
            .iter()
            .map(|a| (a.as_str(), self.rate(channel, a)))
            .find(|(_, r)| *r < 0)
            .map(|(a, r)| (a, r.unsigned_abs()))
    }

    pub fn capacity_of(&self, channel: &str) -> Result<u64, SynthesisError> {
        self.channel_capacities
            .get(channel)
            .copied()
            .ok_or_else(|| malformed(format!("no capacity for channel '{}'", channel)))
    }

    pub fn initial_tokens_of(&self, channel: &str) -> Result<u64, SynthesisError> {
        self.channel_initial_tokens
            .get(channel)
            .copied()
            .ok_or_else(|| malformed(format!("no initial tokens for channel '{}'", channel)))
    }

    pub fn validate(&self) -> Result<(), SynthesisError> {
        check_identifiers("actor", &self.actors_identifiers)?;
        check_identifiers("channel", &self.channels_identifiers)?;
        for (c, row) in &self.topology {
            if !self.channels_identifiers.contains(c) {
                return Err(malformed(format!("topology row for unknown channel '{}'", c)));
            }
            for (a, r) in row {
                if !self.actors_identifiers.contains(a) {
                    return Err(malformed(format!(
                        "topology of channel '{}' references unknown actor '{}'",
                        c, a
                    )));
                }
                if r.unsigned_abs() > MAX_TOPOLOGY_RATE as u64 {
                    return Err(malformed(format!(
                        "rate {} of actor '{}' on channel '{}' is out of range",
                        r, a, c
                    )));
                }
            }
            let producers = row.values().filter(|r| **r > 0).count();
            let consumers = row.values().filter(|r| **r < 0).count();
            if producers > 1 || consumers > 1 {
                return Err(malformed(format!(
                    "channel '{}' has {} producers and {} consumers, at most one of each is allowed",
                    c, producers, consumers
                )));
            }
        }
        for c in &self.channels_identifiers {
            self.capacity_of(c)?;
            self.initial_tokens_of(c)?;
        }
        for c in self
            .channel_capacities
            .keys()
            .chain(self.channel_initial_tokens.keys())
        {
            if !self.channels_identifiers.contains(c) {
                return Err(malformed(format!("channel table references unknown channel '{}'", c)));
            }
        }
        Ok(())
    }

    /// The actors as nodes and the channels connecting them as edges.
    pub fn actors_graph(&self) -> (Graph<&str, &str>, HashMap<&str, NodeIndex>) {
        let mut graph: Graph<&str, &str> = Graph::new();
        let mut nodes = HashMap::new();
        for a in &self.actors_identifiers {
            nodes.insert(a.as_str(), graph.add_node(a.as_str()));
        }
        for c in &self.channels_identifiers {
            if let (Some((p, _)), Some((k, _))) = (self.producer_of(c), self.consumer_of(c)) {
                graph.add_edge(nodes[p], nodes[k], c.as_str());
            }
        }
        (graph, nodes)
    }

    pub fn repetition_vector(&self) -> Option<HashMap<String, u64>> {
        sdf::compute_repetition_vector(self)
    }

    /// The largest number of tokens a single actor moves through a channel in one iteration.
    pub fn max_tokens(&self, repetition_vector: &HashMap<String, u64>) -> u64 {
        self.channels_identifiers
            .iter()
            .flat_map(|c| {
                self.actors_identifiers.iter().map(move |a| {
                    repetition_vector.get(a).copied().unwrap_or(0) * self.rate(c, a).unsigned_abs()
                })
            })
            .max()
            .unwrap_or(0)
    }
}

/// Decision model for analysed synchronous dataflow graphs.
///
/// Aside from the same information in the original SDF application,
/// it also includes liveness information like its repetition vector and a
/// periodic admissible sequential schedule.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, JsonSchema)]
pub struct AnalysedSDFApplication {
    pub sdf_application: SDFApplication,
    pub repetition_vector: HashMap<String, u64>,
    pub periodic_admissible_static_schedule: Vec<String>,
}

impl_decision_model_conversion!(AnalysedSDFApplication);
impl DecisionModel for AnalysedSDFApplication {
    impl_decision_model_standard_parts!(AnalysedSDFApplication);

    fn header(&self) -> DecisionModelHeader {
        DecisionModelHeader {
            category: self.category(),
            body_path: None,
            covered_elements: self.sdf_application.header().covered_elements,
        }
    }
}

/// A decision model for a multiprocessor whose processing elements talk through an
/// explicit network of communication units.
///
/// The adjacency given by `topology_srcs` and `topology_dsts` is undirected and may join
/// processing elements and communication units in any combination. Transfers between two
/// processing elements always go through at least one communication unit. Every
/// communication unit serves at most `communication_units_max_transfers` transfers at the
/// same time; a unit with zero capacity cannot carry anything.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, JsonSchema)]
pub struct CommunicatingMultiCore {
    pub processing_elements: Vec<String>,
    pub communication_units: Vec<String>,
    pub topology_srcs: Vec<String>,
    pub topology_dsts: Vec<String>,
    pub communication_units_max_transfers: HashMap<String, u32>,
}

impl_decision_model_conversion!(CommunicatingMultiCore);
impl DecisionModel for CommunicatingMultiCore {
    impl_decision_model_standard_parts!(CommunicatingMultiCore);

    fn header(&self) -> DecisionModelHeader {
        let mut elems: BTreeSet<String> = BTreeSet::new();
        elems.extend(self.processing_elements.iter().map(|x| x.to_owned()));
        elems.extend(self.communication_units.iter().map(|x| x.to_owned()));
        for (src, dst) in self.topology_srcs.iter().zip(self.topology_dsts.iter()) {
            elems.insert(format!("{}={}:{}-{}:{}", "interconnect", src, "", dst, ""));
        }
        DecisionModelHeader {
            category: self.category(),
            body_path: None,
            covered_elements: elems,
        }
    }
}

impl CommunicatingMultiCore {
    pub fn is_unit(&self, id: &str) -> bool {
        self.processing_elements.iter().any(|p| p == id)
            || self.communication_units.iter().any(|c| c == id)
    }

    pub fn is_processing_element(&self, id: &str) -> bool {
        self.processing_elements.iter().any(|p| p == id)
    }

    pub fn max_transfers_of(&self, cu: &str) -> Result<u32, SynthesisError> {
        self.communication_units_max_transfers
            .get(cu)
            .copied()
            .ok_or_else(|| malformed(format!("no capacity for communication unit '{}'", cu)))
    }

    /// All units directly reachable from `unit`, in declaration order.
    pub fn neighbours_of(&self, unit: &str) -> Vec<&str> {
        let mut neighs: BTreeSet<&str> = BTreeSet::new();
        for (src, dst) in self.topology_srcs.iter().zip(self.topology_dsts.iter()) {
            if src == unit {
                neighs.insert(dst.as_str());
            }
            if dst == unit {
                neighs.insert(src.as_str());
            }
        }
        self.processing_elements
            .iter()
            .chain(self.communication_units.iter())
            .map(|x| x.as_str())
            .filter(|x| neighs.contains(x))
            .collect()
    }

    pub fn validate(&self) -> Result<(), SynthesisError> {
        if self.processing_elements.is_empty() {
            return Err(malformed("the platform has no processing element".to_string()));
        }
        let all: Vec<String> = self
            .processing_elements
            .iter()
            .chain(self.communication_units.iter())
            .cloned()
            .collect();
        check_identifiers("platform unit", &all)?;
        if self.topology_srcs.len() != self.topology_dsts.len() {
            return Err(malformed(format!(
                "interconnect has {} sources but {} destinations",
                self.topology_srcs.len(),
                self.topology_dsts.len()
            )));
        }
        for (src, dst) in self.topology_srcs.iter().zip(self.topology_dsts.iter()) {
            if !self.is_unit(src) || !self.is_unit(dst) {
                return Err(malformed(format!(
                    "interconnect link {} - {} references an unknown unit",
                    src, dst
                )));
            }
        }
        for cu in &self.communication_units {
            self.max_transfers_of(cu)?;
        }
        Ok(())
    }
}

/// Timing characterisation of an application on a platform.
///
/// `worst_case_execution_times[actor][pe]` is the WCET of one firing and
/// `per_token_transfer_times[channel][cu]` the time one token of the channel takes to
/// cross the communication unit.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, JsonSchema)]
pub struct InstrumentedTimes {
    pub worst_case_execution_times: HashMap<String, HashMap<String, u64>>,
    pub per_token_transfer_times: HashMap<String, HashMap<String, u64>>,
}

impl_decision_model_conversion!(InstrumentedTimes);
impl DecisionModel for InstrumentedTimes {
    impl_decision_model_standard_parts!(InstrumentedTimes);

    fn header(&self) -> DecisionModelHeader {
        let mut elems: BTreeSet<String> = BTreeSet::new();
        for (a, pes) in &self.worst_case_execution_times {
            for pe in pes.keys() {
                elems.insert(format!("{}={}:{}-{}:{}", "wcet", a, "", pe, ""));
            }
        }
        for (c, cus) in &self.per_token_transfer_times {
            for cu in cus.keys() {
                elems.insert(format!("{}={}:{}-{}:{}", "wcct", c, "", cu, ""));
            }
        }
        DecisionModelHeader {
            category: self.category(),
            body_path: None,
            covered_elements: elems,
        }
    }
}

/// The complete input of the schedule synthesis: an application, a platform, their
/// timing characterisation and optional mapping affinities.
///
/// An actor without an entry in `actor_affinities` may run on any processing element.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, JsonSchema)]
pub struct SDFToMultiCoreCharacterized {
    pub sdf_application: SDFApplication,
    pub platform: CommunicatingMultiCore,
    pub wcet: HashMap<String, HashMap<String, u64>>,
    pub transfer_costs: HashMap<String, HashMap<String, u64>>,
    #[serde(default)]
    pub actor_affinities: HashMap<String, HashSet<String>>,
}

impl_decision_model_conversion!(SDFToMultiCoreCharacterized);
impl DecisionModel for SDFToMultiCoreCharacterized {
    impl_decision_model_standard_parts!(SDFToMultiCoreCharacterized);

    fn header(&self) -> DecisionModelHeader {
        let mut elems: BTreeSet<String> = BTreeSet::new();
        elems.extend(self.sdf_application.header().covered_elements);
        elems.extend(self.platform.header().covered_elements);
        for a in &self.sdf_application.actors_identifiers {
            for pe in &self.platform.processing_elements {
                elems.insert(format!("{}={}:{}-{}:{}", "wcet", a, "", pe, ""));
            }
        }
        for c in &self.sdf_application.channels_identifiers {
            for cu in &self.platform.communication_units {
                elems.insert(format!("{}={}:{}-{}:{}", "wcct", c, "", cu, ""));
            }
        }
        DecisionModelHeader {
            category: self.category(),
            body_path: None,
            covered_elements: elems,
        }
    }
}

impl SDFToMultiCoreCharacterized {
    pub fn wcet_of(&self, actor: &str, pe: &str) -> Result<u64, SynthesisError> {
        self.wcet
            .get(actor)
            .and_then(|row| row.get(pe))
            .copied()
            .ok_or_else(|| malformed(format!("no WCET for actor '{}' on '{}'", actor, pe)))
    }

    pub fn transfer_cost_of(&self, channel: &str, cu: &str) -> Result<u64, SynthesisError> {
        self.transfer_costs
            .get(channel)
            .and_then(|row| row.get(cu))
            .copied()
            .ok_or_else(|| {
                malformed(format!("no transfer cost for channel '{}' on '{}'", channel, cu))
            })
    }

    /// The processing elements an actor may be mapped to, in platform order.
    pub fn admissible_processing_elements(&self, actor: &str) -> Vec<&str> {
        let affinity = self.actor_affinities.get(actor);
        self.platform
            .processing_elements
            .iter()
            .filter(|pe| affinity.map(|a| a.contains(*pe)).unwrap_or(true))
            .map(|pe| pe.as_str())
            .collect()
    }

    pub fn validate(&self) -> Result<(), SynthesisError> {
        self.sdf_application.validate()?;
        self.platform.validate()?;
        for a in &self.sdf_application.actors_identifiers {
            for pe in &self.platform.processing_elements {
                self.wcet_of(a, pe)?;
            }
        }
        for (a, row) in &self.wcet {
            if !self.sdf_application.actors_identifiers.contains(a) {
                return Err(malformed(format!("WCET table references unknown actor '{}'", a)));
            }
            if let Some(pe) = row.keys().find(|pe| !self.platform.is_processing_element(pe)) {
                return Err(malformed(format!(
                    "WCET table references unknown processing element '{}'",
                    pe
                )));
            }
        }
        for c in &self.sdf_application.channels_identifiers {
            for cu in &self.platform.communication_units {
                self.transfer_cost_of(c, cu)?;
            }
        }
        for (a, row) in &self.wcet {
            if let Some((pe, t)) = row.iter().find(|(_, t)| **t > MAX_TIME) {
                return Err(malformed(format!(
                    "WCET {} of actor '{}' on '{}' is out of range",
                    t, a, pe
                )));
            }
        }
        for (c, row) in &self.transfer_costs {
            if let Some((cu, t)) = row.iter().find(|(_, t)| **t > MAX_TIME) {
                return Err(malformed(format!(
                    "transfer time {} of channel '{}' on '{}' is out of range",
                    t, c, cu
                )));
            }
        }
        for (c, row) in &self.transfer_costs {
            if !self.sdf_application.channels_identifiers.contains(c) {
                return Err(malformed(format!(
                    "transfer cost table references unknown channel '{}'",
                    c
                )));
            }
            if let Some(cu) = row
                .keys()
                .find(|cu| !self.platform.communication_units.contains(cu))
            {
                return Err(malformed(format!(
                    "transfer cost table references unknown communication unit '{}'",
                    cu
                )));
            }
        }
        for (a, pes) in &self.actor_affinities {
            if !self.sdf_application.actors_identifiers.contains(a) {
                return Err(malformed(format!("affinity of unknown actor '{}'", a)));
            }
            if pes.is_empty() {
                return Err(malformed(format!("actor '{}' has an empty affinity", a)));
            }
            if let Some(pe) = pes.iter().find(|pe| !self.platform.is_processing_element(pe)) {
                return Err(malformed(format!(
                    "affinity of actor '{}' references unknown processing element '{}'",
                    a, pe
                )));
            }
        }
        Ok(())
    }
}

/// One firing of an actor. Firings are numbered from 1.
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Clone, JsonSchema)]
pub struct Job {
    pub actor: String,
    pub firing: u64,
}

impl Job {
    pub fn identifier(&self) -> String {
        format!("{}_{}", self.actor, self.firing)
    }
}

/// The characterised problem expanded into jobs, one per firing of the analysed
/// iteration, together with the static token assignment between them.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, JsonSchema)]
pub struct SDFToMultiCoreCharacterizedJobs {
    pub characterized: SDFToMultiCoreCharacterized,
    pub repetition_vector: HashMap<String, u64>,
    pub jobs: Vec<Job>,
    pub dependencies: Vec<FiringDependency>,
    pub max_tokens: u64,
}

impl_decision_model_conversion!(SDFToMultiCoreCharacterizedJobs);
impl DecisionModel for SDFToMultiCoreCharacterizedJobs {
    impl_decision_model_standard_parts!(SDFToMultiCoreCharacterizedJobs);

    fn header(&self) -> DecisionModelHeader {
        let mut elems = self.characterized.header().covered_elements;
        elems.extend(self.jobs.iter().map(|j| j.identifier()));
        DecisionModelHeader {
            category: self.category(),
            body_path: None,
            covered_elements: elems,
        }
    }
}

impl SDFToMultiCoreCharacterizedJobs {
    /// Validates, analyses and expands a characterised problem.
    ///
    /// Fails with `MalformedModel` for structural problems, `Infeasible` for
    /// inconsistent rates and `InfeasibleTokenFlow` when the buffers cannot sustain
    /// one iteration.
    pub fn from_characterized(
        characterized: SDFToMultiCoreCharacterized,
    ) -> Result<SDFToMultiCoreCharacterizedJobs, SynthesisError> {
        characterized.validate()?;
        let app = &characterized.sdf_application;
        let repetition_vector = app.repetition_vector().ok_or_else(|| {
            SynthesisError::Infeasible(
                "the application rates are inconsistent, no repetition vector exists".to_string(),
            )
        })?;
        let jobs: Vec<Job> = app
            .actors_identifiers
            .iter()
            .flat_map(|a| {
                let q = repetition_vector.get(a).copied().unwrap_or(0);
                (1..=q).map(move |k| Job {
                    actor: a.to_owned(),
                    firing: k,
                })
            })
            .collect();
        let dependencies = sdf::firing_dependencies(app, &repetition_vector)?;
        let max_tokens = app.max_tokens(&repetition_vector);
        Ok(SDFToMultiCoreCharacterizedJobs {
            characterized,
            repetition_vector,
            jobs,
            dependencies,
            max_tokens,
        })
    }
}
