//! Objective evaluation of complete assignments and lower bounds of partial ones.

use schemars::JsonSchema;
use sdfsyde_common::sdf::DependencyKind;
use serde::{Deserialize, Serialize};

use crate::{flow::TokenFlowNetwork, mapping::MappingTable, routing::RoutedTransfer};

/// Where and when a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Placement {
    pub pe: usize,
    pub start: u64,
    pub duration: u64,
}

impl Placement {
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.duration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Objectives {
    pub throughput: u64,
    pub latency: u64,
}

/// Non-negative weights of the minimised cost `throughput * w_th + latency * w_lat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ObjectiveWeights {
    pub throughput: u64,
    pub latency: u64,
}

impl ObjectiveWeights {
    pub fn cost(&self, objectives: &Objectives) -> u64 {
        self.throughput
            .saturating_mul(objectives.throughput)
            .saturating_add(self.latency.saturating_mul(objectives.latency))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub objectives: Objectives,
    pub job_throughputs: Vec<u64>,
}

fn div_ceil(a: u64, b: u64) -> u64 {
    if b == 0 {
        0
    } else {
        a / b + u64::from(a % b != 0)
    }
}

/// Loads of every communication unit: the time it is busy divided by how many
/// transfers it serves at once.
pub fn unit_loads<'a, I>(transfers: I, capacities: &[u32]) -> Vec<u64>
where
    I: IntoIterator<Item = &'a RoutedTransfer>,
{
    let mut busy = vec![0u64; capacities.len()];
    for t in transfers {
        for h in &t.hops {
            busy[h.unit] = busy[h.unit].saturating_add(h.duration);
        }
    }
    busy.iter()
        .zip(capacities.iter())
        .map(|(b, c)| div_ceil(*b, *c as u64))
        .collect()
}

pub fn processor_loads<'a, I>(placements: I, pe_count: usize) -> Vec<u64>
where
    I: IntoIterator<Item = &'a Placement>,
{
    let mut loads = vec![0u64; pe_count];
    for p in placements {
        loads[p.pe] = loads[p.pe].saturating_add(p.duration);
    }
    loads
}

/// Evaluates a complete assignment.
///
/// A job's throughput is the load of its processing element, raised by the load of every
/// communication unit its outgoing transfers cross. Jobs exchanging tokens across
/// processing elements share the largest of their throughputs, since one cannot sustain a
/// faster period than the other. The latency is the last completion time.
pub fn evaluate(
    network: &TokenFlowNetwork,
    placements: &[Placement],
    transfers: &[RoutedTransfer],
    pe_count: usize,
    unit_capacities: &[u32],
) -> Evaluation {
    let pe_loads = processor_loads(placements, pe_count);
    let cu_loads = unit_loads(transfers, unit_capacities);
    let mut th: Vec<u64> = placements.iter().map(|p| pe_loads[p.pe]).collect();
    for t in transfers {
        let src = network.edges[t.edge].src;
        for h in &t.hops {
            th[src] = th[src].max(cu_loads[h.unit]);
        }
    }
    let cross: Vec<(usize, usize)> = network
        .edges
        .iter()
        .filter(|e| e.kind == DependencyKind::Data && placements[e.src].pe != placements[e.dst].pe)
        .map(|e| (e.src, e.dst))
        .collect();
    let mut changed = true;
    while changed {
        changed = false;
        for (s, d) in &cross {
            let m = th[*s].max(th[*d]);
            if th[*s] != m || th[*d] != m {
                th[*s] = m;
                th[*d] = m;
                changed = true;
            }
        }
    }
    Evaluation {
        objectives: Objectives {
            throughput: th.iter().copied().max().unwrap_or(0),
            latency: placements.iter().map(|p| p.end()).max().unwrap_or(0),
        },
        job_throughputs: th,
    }
}

/// Objectives no completion of a partial assignment can beat.
///
/// Unplaced jobs are assumed to run on their fastest processing element as soon as their
/// predecessors finish, with free communication. The throughput bound also spreads the
/// whole workload evenly over every processing element.
pub fn lower_bound(
    network: &TokenFlowNetwork,
    table: &MappingTable,
    placements: &[Option<Placement>],
    transfers: &[Option<RoutedTransfer>],
    pe_count: usize,
    unit_capacities: &[u32],
) -> Objectives {
    let mut finish = vec![0u64; placements.len()];
    for &j in &network.topological_order {
        finish[j] = match placements[j] {
            Some(p) => p.end(),
            None => {
                let est = network.predecessors[j]
                    .iter()
                    .map(|e| finish[network.edges[*e].src])
                    .max()
                    .unwrap_or(0);
                est.saturating_add(table.min_duration(j))
            }
        };
    }
    let placed_loads = processor_loads(placements.iter().flatten(), pe_count);
    let cu_loads = unit_loads(transfers.iter().flatten(), unit_capacities);
    let workload: u64 = placements
        .iter()
        .enumerate()
        .map(|(j, p)| p.map(|p| p.duration).unwrap_or_else(|| table.min_duration(j)))
        .sum();
    let longest_job = (0..placements.len())
        .map(|j| table.min_duration(j))
        .max()
        .unwrap_or(0);
    Objectives {
        throughput: placed_loads
            .into_iter()
            .chain(cu_loads)
            .chain([longest_job, div_ceil(workload, pe_count as u64)])
            .max()
            .unwrap_or(0),
        latency: finish.into_iter().max().unwrap_or(0),
    }
}
