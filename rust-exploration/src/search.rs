//! Depth-first branch and bound over job placements with Luby restarts.
//!
//! Every node branches on which eligible job runs next, on the processing element it
//! runs on and on the candidate routes carrying its incoming tokens. Each choice starts
//! the transfers and the job as early as the partial schedule allows. Jobs with the
//! fewest candidates are tried first. A descent that ends under its node budget has
//! thus gone through every dispatch order, mapping and route choice of earliest-start
//! scheduling, and either found the best such schedule or proven that none exists.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use rayon::prelude::*;
use schemars::JsonSchema;
use sdfsyde_common::{models::SDFToMultiCoreCharacterizedJobs, sdf::DependencyKind};
use sdfsyde_core::SynthesisError;
use serde::{Deserialize, Serialize};

use crate::{
    flow::TokenFlowNetwork,
    mapping::{CumulativeTimeline, MappingTable, Timeline},
    routing::{RoutedTransfer, RoutingTable},
    solution::{verify, JobSchedulingSolution},
    timing::{lower_bound, ObjectiveWeights, Placement},
    SearchConfiguration,
};

/// How a successful search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SearchStatus {
    /// The whole space was explored; the best solution cannot be improved by this search.
    Complete,
    /// Restarts, time, solution count or cancellation stopped the search first.
    BudgetExhausted,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub status: SearchStatus,
    pub best: JobSchedulingSolution,
    /// Every published solution, each strictly cheaper than the previous one.
    pub improvements: Vec<JobSchedulingSolution>,
    pub nodes: u64,
    pub restarts: u64,
}

/// The `i`-th element, from 1, of the Luby sequence 1 1 2 1 1 2 4 1 1 2 ...
pub fn luby(i: u64) -> u64 {
    let mut i = i.max(1);
    loop {
        let mut k = 1;
        while (1u64 << k) - 1 < i {
            k += 1;
        }
        if (1u64 << k) - 1 == i {
            return 1u64 << (k - 1);
        }
        i -= (1u64 << (k - 1)) - 1;
    }
}

#[derive(Debug, Clone)]
struct State {
    placements: Vec<Option<Placement>>,
    transfers: Vec<Option<RoutedTransfer>>,
    pes: Vec<Timeline>,
    units: Vec<CumulativeTimeline>,
    placed: usize,
}

#[derive(Debug, Clone)]
struct Candidate {
    job: usize,
    placement: Placement,
    transfers: Vec<RoutedTransfer>,
}

/// The incoming transfers of a job being routed towards one processing element.
struct Inbound {
    job: usize,
    pe: usize,
    duration: u64,
    routed: Vec<RoutedTransfer>,
    found: Vec<Candidate>,
    last_error: Option<SynthesisError>,
}

enum Descent {
    Exhausted,
    Stopped,
}

enum ValueOrder {
    WarmStart,
    Indexed,
    Shuffled(StdRng),
}

impl ValueOrder {
    fn for_descent(config: &SearchConfiguration, restart: u64, worker: usize) -> ValueOrder {
        if restart <= 1 {
            if config.warm_start {
                ValueOrder::WarmStart
            } else {
                ValueOrder::Indexed
            }
        } else {
            let seed = config.seed
                ^ restart.wrapping_mul(0x9E37_79B9_7F4A_7C15)
                ^ (worker as u64).rotate_left(32);
            ValueOrder::Shuffled(StdRng::seed_from_u64(seed))
        }
    }

    /// Orders the candidates of one job: earliest start first, ties to the warm start
    /// hint, to the processing element order or to a seeded shuffle.
    fn sort(&mut self, table: &MappingTable, job: usize, candidates: &mut [Candidate]) {
        match self {
            ValueOrder::WarmStart => {
                let hint = table.round_robin_hint(job);
                candidates.sort_by_key(|c| {
                    (
                        c.placement.start,
                        Some(c.placement.pe) != hint,
                        c.placement.pe,
                    )
                });
            }
            ValueOrder::Indexed => {
                candidates.sort_by_key(|c| (c.placement.start, c.placement.pe));
            }
            ValueOrder::Shuffled(rng) => {
                candidates.shuffle(rng);
                candidates.sort_by_key(|c| c.placement.start);
            }
        }
    }
}

/// State shared by every worker of a search.
struct Incumbent {
    best_cost: AtomicU64,
    best: Mutex<Option<JobSchedulingSolution>>,
    improvements: Mutex<Vec<JobSchedulingSolution>>,
    found: AtomicU64,
    nodes: AtomicU64,
    budget_hit: AtomicBool,
    cancel: Arc<AtomicBool>,
    deadline: Option<Instant>,
    max_sols: u64,
    last_pruning: Mutex<Option<SynthesisError>>,
}

impl Incumbent {
    fn externally_stopped(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
            || self.deadline.map(|d| Instant::now() >= d).unwrap_or(false)
            || (self.max_sols > 0 && self.found.load(Ordering::Relaxed) >= self.max_sols)
    }

    fn should_stop(&self) -> bool {
        self.budget_hit.load(Ordering::Relaxed) || self.externally_stopped()
    }

    fn record_pruning(&self, e: SynthesisError) {
        let mut last = self.last_pruning.lock().unwrap_or_else(PoisonError::into_inner);
        *last = Some(e);
    }

    /// Best-of compare and swap: only a strictly cheaper solution replaces the incumbent.
    fn publish(&self, solution: JobSchedulingSolution) -> bool {
        let cost = solution.cost;
        let mut current = self.best_cost.load(Ordering::SeqCst);
        loop {
            if cost >= current {
                return false;
            }
            match self
                .best_cost
                .compare_exchange(current, cost, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        let mut best = self.best.lock().unwrap_or_else(PoisonError::into_inner);
        if best.as_ref().map(|b| cost < b.cost).unwrap_or(true) {
            debug!(
                "new incumbent with throughput {}, latency {} and cost {}",
                solution.objectives.throughput, solution.objectives.latency, cost
            );
            self.improvements
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(solution.clone());
            *best = Some(solution);
            self.found.fetch_add(1, Ordering::SeqCst);
        }
        true
    }
}

struct Problem<'a> {
    model: &'a SDFToMultiCoreCharacterizedJobs,
    network: TokenFlowNetwork,
    table: MappingTable,
    routing: RoutingTable,
    capacities: Vec<u32>,
    weights: ObjectiveWeights,
}

impl<'a> Problem<'a> {
    fn new(
        model: &'a SDFToMultiCoreCharacterizedJobs,
        config: &SearchConfiguration,
    ) -> Result<Problem<'a>, SynthesisError> {
        let platform = &model.characterized.platform;
        let capacities = platform
            .communication_units
            .iter()
            .map(|cu| platform.max_transfers_of(cu))
            .collect::<Result<Vec<u32>, SynthesisError>>()?;
        let problem = Problem {
            model,
            network: TokenFlowNetwork::new(model)?,
            table: MappingTable::new(model)?,
            routing: RoutingTable::new(&model.characterized, config.max_routes_per_pair)?,
            capacities,
            weights: config.weights,
        };
        let horizon = problem.horizon().ok_or_else(|| {
            SynthesisError::MalformedModel(
                "the jobs and transfers together overflow the time range".to_string(),
            )
        })?;
        debug!("every schedule ends by {}", horizon);
        Ok(problem)
    }

    /// Every job at its longest and every transfer at its longest in the network, back to
    /// back. Earliest starts never lie beyond it. `None` when it overflows.
    fn horizon(&self) -> Option<u64> {
        let mut horizon: u64 = 0;
        for row in &self.table.durations {
            horizon = horizon.checked_add(row.iter().flatten().max().copied().unwrap_or(0))?;
        }
        for e in self.network.edges.iter().filter(|e| e.kind == DependencyKind::Data) {
            let channel = e.channel.as_deref().unwrap_or_default();
            horizon = horizon.checked_add(self.routing.longest_transfer(channel, e.volume)?)?;
        }
        Some(horizon)
    }

    fn pe_count(&self) -> usize {
        self.model.characterized.platform.processing_elements.len()
    }

    fn initial_state(&self) -> State {
        State {
            placements: vec![None; self.model.jobs.len()],
            transfers: vec![None; self.network.edges.len()],
            pes: vec![Timeline::new(); self.pe_count()],
            units: self
                .capacities
                .iter()
                .map(|c| CumulativeTimeline::new(*c))
                .collect(),
            placed: 0,
        }
    }

    fn is_eligible(&self, state: &State, job: usize) -> bool {
        state.placements[job].is_none()
            && self.network.predecessors[job]
                .iter()
                .all(|e| state.placements[self.network.edges[*e].src].is_some())
    }

    /// Adds a candidate for every combination of candidate routes of the incoming
    /// transfers from the `k`-th one on. Transfers are routed one after the other and
    /// stay reserved while the next ones are routed.
    fn route_inbound(&self, state: &mut State, inbound: &mut Inbound, k: usize, release: u64) {
        let Some(&ei) = self.network.predecessors[inbound.job].get(k) else {
            inbound.found.push(Candidate {
                job: inbound.job,
                placement: Placement {
                    pe: inbound.pe,
                    start: state.pes[inbound.pe].earliest_fit(release, inbound.duration),
                    duration: inbound.duration,
                },
                transfers: inbound.routed.clone(),
            });
            return;
        };
        let e = &self.network.edges[ei];
        let Some(src) = state.placements[e.src] else {
            inbound.last_error = Some(SynthesisError::NoFeasibleMapping(format!(
                "{} has unplaced predecessors",
                self.model.jobs[inbound.job].identifier()
            )));
            return;
        };
        if e.kind != DependencyKind::Data {
            self.route_inbound(state, inbound, k + 1, release.max(src.end()));
            return;
        }
        if src.pe == inbound.pe {
            inbound.routed.push(RoutedTransfer::local(ei, src.end()));
            self.route_inbound(state, inbound, k + 1, release.max(src.end()));
            inbound.routed.pop();
            return;
        }
        let channel = e.channel.as_deref().unwrap_or_default();
        let routes = self.routing.routes(src.pe, inbound.pe);
        if routes.is_empty() {
            inbound.last_error = Some(self.routing.unroutable(channel, src.pe, inbound.pe));
        }
        for route in routes {
            let routed = self
                .routing
                .route_via(&state.units, channel, ei, e.volume, route, src.end());
            let t = match routed {
                Ok(Some(t)) if RoutingTable::commit(&mut state.units, &t) => t,
                Ok(_) => {
                    inbound.last_error = Some(self.routing.unroutable(channel, src.pe, inbound.pe));
                    continue;
                }
                Err(err) => {
                    inbound.last_error = Some(err);
                    continue;
                }
            };
            let arrival = t.arrival;
            inbound.routed.push(t);
            self.route_inbound(state, inbound, k + 1, release.max(arrival));
            if let Some(t) = inbound.routed.pop() {
                RoutingTable::release(&mut state.units, &t);
            }
        }
    }

    /// Every way of extending the partial schedule by one job. Jobs come by fewest
    /// candidates, then by earliest possible start, then by index; the candidates of one
    /// job follow `order`.
    fn branch(
        &self,
        state: &mut State,
        order: &mut ValueOrder,
    ) -> Result<Vec<Candidate>, SynthesisError> {
        let mut groups: Vec<((usize, u64, usize), Vec<Candidate>)> = Vec::new();
        for job in 0..self.model.jobs.len() {
            if !self.is_eligible(state, job) {
                continue;
            }
            let mut inbound = Inbound {
                job,
                pe: 0,
                duration: 0,
                routed: Vec::new(),
                found: Vec::new(),
                last_error: None,
            };
            for pe in self.table.admissible(job) {
                let Some(duration) = self.table.duration(job, pe) else {
                    continue;
                };
                inbound.pe = pe;
                inbound.duration = duration;
                self.route_inbound(state, &mut inbound, 0, 0);
            }
            let Inbound {
                mut found,
                last_error,
                ..
            } = inbound;
            // placing other jobs first never makes an eligible job fit
            if found.is_empty() {
                return Err(last_error.unwrap_or_else(|| {
                    SynthesisError::NoFeasibleMapping(format!(
                        "{} fits on no processing element",
                        self.model.jobs[job].identifier()
                    ))
                }));
            }
            let earliest = found.iter().map(|c| c.placement.start).min().unwrap_or(0);
            order.sort(&self.table, job, &mut found);
            groups.push(((found.len(), earliest, job), found));
        }
        if groups.is_empty() {
            return Err(SynthesisError::NoFeasibleMapping(
                "no job is ready to be placed".to_string(),
            ));
        }
        groups.sort_by_key(|(key, _)| *key);
        Ok(groups.into_iter().flat_map(|(_, c)| c).collect())
    }

    fn apply(&self, state: &mut State, c: &Candidate) -> bool {
        if state.pes[c.placement.pe]
            .reserve(c.placement.start, c.placement.duration)
            .is_err()
        {
            return false;
        }
        for (i, t) in c.transfers.iter().enumerate() {
            if !RoutingTable::commit(&mut state.units, t) {
                for undo in c.transfers[..i].iter().rev() {
                    RoutingTable::release(&mut state.units, undo);
                }
                state.pes[c.placement.pe].release(c.placement.start, c.placement.duration);
                return false;
            }
            state.transfers[t.edge] = Some(t.to_owned());
        }
        state.placements[c.job] = Some(c.placement);
        state.placed += 1;
        true
    }

    fn undo(&self, state: &mut State, c: &Candidate) {
        for t in c.transfers.iter().rev() {
            RoutingTable::release(&mut state.units, t);
            state.transfers[t.edge] = None;
        }
        state.pes[c.placement.pe].release(c.placement.start, c.placement.duration);
        state.placements[c.job] = None;
        state.placed -= 1;
    }

    fn offer(&self, state: &State, incumbent: &Incumbent) {
        let placements: Vec<Placement> = state.placements.iter().flatten().copied().collect();
        let transfers: Vec<RoutedTransfer> = state.transfers.iter().flatten().cloned().collect();
        let solution = JobSchedulingSolution::from_assignment(
            self.model,
            &self.network,
            &placements,
            &transfers,
            &self.weights,
        );
        if solution.cost >= incumbent.best_cost.load(Ordering::SeqCst) {
            return;
        }
        match verify(self.model, &solution) {
            Ok(_) => {
                incumbent.publish(solution);
            }
            Err(e) => warn!("Discarding a candidate schedule that failed verification: {}", e),
        }
    }

    fn descend(
        &self,
        state: &mut State,
        incumbent: &Incumbent,
        budget: u64,
        order: &mut ValueOrder,
    ) -> Descent {
        if incumbent.should_stop() {
            return Descent::Stopped;
        }
        if incumbent.nodes.fetch_add(1, Ordering::Relaxed) >= budget {
            incumbent.budget_hit.store(true, Ordering::Relaxed);
            return Descent::Stopped;
        }
        if state.placed == self.model.jobs.len() {
            self.offer(state, incumbent);
            return Descent::Exhausted;
        }
        let best_cost = incumbent.best_cost.load(Ordering::SeqCst);
        if best_cost != u64::MAX {
            let bound = lower_bound(
                &self.network,
                &self.table,
                &state.placements,
                &state.transfers,
                self.pe_count(),
                &self.capacities,
            );
            if self.weights.cost(&bound) >= best_cost {
                return Descent::Exhausted;
            }
        }
        let candidates = match self.branch(state, order) {
            Ok(c) => c,
            Err(e) => {
                incumbent.record_pruning(e);
                return Descent::Exhausted;
            }
        };
        for c in &candidates {
            if !self.apply(state, c) {
                continue;
            }
            let result = self.descend(state, incumbent, budget, order);
            self.undo(state, c);
            if let Descent::Stopped = result {
                return Descent::Stopped;
            }
        }
        Descent::Exhausted
    }

    /// One descent from the root, its first decision split among the workers. Returns
    /// whether the whole space was explored.
    fn run_descent(
        &self,
        initial: &State,
        incumbent: &Incumbent,
        budget: u64,
        restart: u64,
        config: &SearchConfiguration,
        pool: Option<&rayon::ThreadPool>,
    ) -> bool {
        let mut root = initial.clone();
        if root.placed == self.model.jobs.len() {
            self.offer(&root, incumbent);
            return true;
        }
        incumbent.nodes.fetch_add(1, Ordering::Relaxed);
        let mut order = ValueOrder::for_descent(config, restart, 0);
        let candidates = match self.branch(&mut root, &mut order) {
            Ok(c) => c,
            Err(e) => {
                incumbent.record_pruning(e);
                return true;
            }
        };
        let explore = |(worker, c): (usize, &Candidate)| -> bool {
            let mut state = root.clone();
            if !self.apply(&mut state, c) {
                return true;
            }
            let mut order = ValueOrder::for_descent(config, restart, worker);
            matches!(
                self.descend(&mut state, incumbent, budget, &mut order),
                Descent::Exhausted
            )
        };
        match pool {
            Some(pool) => pool.install(|| {
                candidates
                    .par_iter()
                    .enumerate()
                    .map(explore)
                    .collect::<Vec<bool>>()
                    .into_iter()
                    .all(|x| x)
            }),
            None => candidates.iter().enumerate().all(explore),
        }
    }
}

/// Runs the restart loop of the search and keeps the best schedule found.
pub struct SearchDriver {
    config: SearchConfiguration,
    cancel: Arc<AtomicBool>,
}

impl SearchDriver {
    pub fn new(config: SearchConfiguration) -> SearchDriver {
        SearchDriver {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Setting the returned flag stops the search at the next node; the best complete
    /// schedule found until then is still returned.
    pub fn cancellation_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn run(
        &self,
        model: &SDFToMultiCoreCharacterizedJobs,
    ) -> Result<SearchOutcome, SynthesisError> {
        let problem = Problem::new(model, &self.config).map_err(|e| e.escalate())?;
        let incumbent = Incumbent {
            best_cost: AtomicU64::new(u64::MAX),
            best: Mutex::new(None),
            improvements: Mutex::new(Vec::new()),
            found: AtomicU64::new(0),
            nodes: AtomicU64::new(0),
            budget_hit: AtomicBool::new(false),
            cancel: self.cancel.clone(),
            deadline: if self.config.total_timeout > 0 {
                Some(Instant::now() + Duration::from_secs(self.config.total_timeout))
            } else {
                None
            },
            max_sols: self.config.max_sols,
            last_pruning: Mutex::new(None),
        };
        let pool = if self.config.parallel_workers > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.parallel_workers)
                .build()
            {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(
                        "Could not start {} search workers, searching sequentially: {}",
                        self.config.parallel_workers, e
                    );
                    None
                }
            }
        } else {
            None
        };
        let initial = problem.initial_state();
        let resources = (problem.pe_count() + problem.capacities.len()) as u64;
        let jobs = (model.jobs.len() as u64).max(1);
        let mut status = SearchStatus::BudgetExhausted;
        let mut nodes = 0;
        let mut restarts = 0;
        for i in 1..=self.config.max_restarts + 1 {
            let budget = luby(i)
                .saturating_mul(self.config.restart_base_factor.max(1))
                .saturating_mul(jobs)
                .saturating_mul(resources);
            debug!("descent {} with a budget of {} nodes", i, budget);
            incumbent.nodes.store(0, Ordering::Relaxed);
            incumbent.budget_hit.store(false, Ordering::Relaxed);
            let exhausted =
                problem.run_descent(&initial, &incumbent, budget, i, &self.config, pool.as_ref());
            nodes += incumbent.nodes.load(Ordering::Relaxed).min(budget);
            if exhausted {
                status = SearchStatus::Complete;
                break;
            }
            if incumbent.externally_stopped() {
                break;
            }
            restarts += 1;
        }
        let best = incumbent
            .best
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let mut improvements = incumbent
            .improvements
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        match best {
            Some(mut best) => {
                if status == SearchStatus::Complete {
                    best.status = status;
                    if let Some(last) = improvements.last_mut() {
                        last.status = status;
                    }
                }
                info!(
                    "search ended {:?} after {} nodes and {} restarts with throughput {} and \
                     latency {}",
                    status, nodes, restarts, best.objectives.throughput, best.objectives.latency
                );
                Ok(SearchOutcome {
                    status,
                    best,
                    improvements,
                    nodes,
                    restarts,
                })
            }
            None if status == SearchStatus::Complete => {
                info!(
                    "search space exhausted after {} nodes without a feasible schedule",
                    nodes
                );
                let reason = incumbent
                    .last_pruning
                    .into_inner()
                    .unwrap_or_else(PoisonError::into_inner);
                Err(match reason {
                    Some(e) => e.escalate(),
                    None => SynthesisError::Infeasible(
                        "no mapping satisfies every constraint".to_string(),
                    ),
                })
            }
            None => {
                info!("search stopped after {} nodes without a feasible schedule", nodes);
                Err(SynthesisError::BudgetExhausted)
            }
        }
    }
}
