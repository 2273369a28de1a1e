//! Static analysis of synchronous dataflow applications: the balance equations, the
//! firing-level token assignment of one iteration and the sequential schedule derived
//! from it.

use std::collections::{BTreeMap, HashMap, VecDeque};

use petgraph::{
    algo::toposort,
    visit::EdgeRef,
    Direction::{Incoming, Outgoing},
    Graph,
};
use schemars::JsonSchema;
use sdfsyde_core::SynthesisError;
use serde::{Deserialize, Serialize};

use crate::models::{Job, SDFApplication};

fn gcd(a: i128, b: i128) -> i128 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn lcm(a: i128, b: i128) -> i128 {
    if a == 0 || b == 0 {
        return 0;
    }
    (a / gcd(a, b)) * b
}

fn reduce((num, den): (i128, i128)) -> (i128, i128) {
    let g = gcd(num, den).max(1);
    (num / g, den / g)
}

fn div_ceil(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

/// Solves the balance equations of the application.
///
/// Each weakly connected component of actors is solved independently, starting from a
/// rate of one, and scaled to the smallest positive integer solution. Actors touching no
/// channel fire once. Returns `None` when the rates are inconsistent, including channels
/// with a producer but no consumer or the other way around.
pub fn compute_repetition_vector(app: &SDFApplication) -> Option<HashMap<String, u64>> {
    for c in &app.channels_identifiers {
        if app.producer_of(c).is_some() != app.consumer_of(c).is_some() {
            return None;
        }
    }
    let (graph, _) = app.actors_graph();
    let mut fractions: HashMap<_, (i128, i128)> = HashMap::new();
    let mut result: HashMap<String, u64> = HashMap::new();
    for start in graph.node_indices() {
        if fractions.contains_key(&start) {
            continue;
        }
        fractions.insert(start, (1, 1));
        let mut component = vec![start];
        let mut queue = VecDeque::from([start]);
        while let Some(n) = queue.pop_front() {
            let (num, den) = fractions[&n];
            let mut discovered = Vec::new();
            for e in graph.edges_directed(n, Outgoing) {
                let c = *e.weight();
                let (_, prod) = app.producer_of(c)?;
                let (_, cons) = app.consumer_of(c)?;
                discovered.push((e.target(), reduce((num * prod as i128, den * cons as i128))));
            }
            for e in graph.edges_directed(n, Incoming) {
                let c = *e.weight();
                let (_, prod) = app.producer_of(c)?;
                let (_, cons) = app.consumer_of(c)?;
                discovered.push((e.source(), reduce((num * cons as i128, den * prod as i128))));
            }
            for (other, frac) in discovered {
                if let Some(existing) = fractions.get(&other) {
                    if *existing != frac {
                        return None;
                    }
                } else {
                    fractions.insert(other, frac);
                    component.push(other);
                    queue.push_back(other);
                }
            }
        }
        let den_lcm = component
            .iter()
            .map(|n| fractions[n].1)
            .fold(1, lcm);
        let scaled: Vec<i128> = component
            .iter()
            .map(|n| fractions[n].0 * (den_lcm / fractions[n].1))
            .collect();
        let num_gcd = scaled.iter().copied().fold(0, gcd).max(1);
        for (n, q) in component.iter().zip(scaled.iter()) {
            let q = u64::try_from(q / num_gcd).ok()?;
            result.insert(graph[*n].to_string(), q);
        }
    }
    Some(result)
}

/// Why one firing has to finish before another one starts.
#[derive(Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Clone, Copy, JsonSchema)]
pub enum DependencyKind {
    /// The consumer needs tokens produced by the source firing.
    Data,
    /// The producer needs buffer space freed by the source firing.
    Space,
    /// Consecutive firings of the same actor.
    Order,
}

/// A precedence between two firings of the same iteration, carrying the number of
/// tokens that flow along it.
#[derive(Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Clone, JsonSchema)]
pub struct FiringDependency {
    pub kind: DependencyKind,
    pub channel: Option<String>,
    pub src: Job,
    pub dst: Job,
    pub volume: u64,
}

/// Assigns every token of one iteration to the firing that produces it and the firing
/// that consumes it, returning the resulting precedences.
///
/// Tokens in a channel are consumed in order. The first `initial` tokens are available
/// from the start; any later one comes from a producer firing of the same iteration.
/// A producer reserves space for its output when it starts and a consumer frees it when
/// it ends, so producer firing `n` waits for the consumer firing that brings the channel
/// back under its capacity.
///
/// Fails with `InfeasibleTokenFlow` when a channel can never hold what a single firing
/// moves, or when one iteration cannot fit in the buffer at all.
pub fn firing_dependencies(
    app: &SDFApplication,
    repetition_vector: &HashMap<String, u64>,
) -> Result<Vec<FiringDependency>, SynthesisError> {
    let mut deps = Vec::new();
    for c in &app.channels_identifiers {
        let (p, prod, k, cons) = match (app.producer_of(c), app.consumer_of(c)) {
            (Some((p, prod)), Some((k, cons))) => (p, prod, k, cons),
            (None, None) => continue,
            _ => {
                return Err(SynthesisError::InfeasibleTokenFlow(format!(
                    "channel '{}' is not balanced within an iteration",
                    c
                )))
            }
        };
        let cap = app.capacity_of(c)?;
        let init = app.initial_tokens_of(c)?;
        if init > cap || prod > cap || cons > cap {
            return Err(SynthesisError::InfeasibleTokenFlow(format!(
                "channel '{}' with capacity {} cannot hold {} initial tokens, productions of {} or consumptions of {}",
                c, cap, init, prod, cons
            )));
        }
        let q_p = repetition_vector.get(p).copied().unwrap_or(0);
        let q_k = repetition_vector.get(k).copied().unwrap_or(0);
        if q_p * prod != q_k * cons {
            return Err(SynthesisError::InfeasibleTokenFlow(format!(
                "channel '{}' receives {} tokens but delivers {} per iteration",
                c,
                q_p * prod,
                q_k * cons
            )));
        }
        let mut volumes: BTreeMap<(u64, u64), u64> = BTreeMap::new();
        for m in 1..=q_k {
            for token in ((m - 1) * cons + 1)..=(m * cons) {
                if token > init {
                    let n = div_ceil(token - init, prod);
                    *volumes.entry((n, m)).or_insert(0) += 1;
                }
            }
        }
        for ((n, m), volume) in volumes {
            deps.push(FiringDependency {
                kind: DependencyKind::Data,
                channel: Some(c.to_owned()),
                src: Job {
                    actor: p.to_owned(),
                    firing: n,
                },
                dst: Job {
                    actor: k.to_owned(),
                    firing: m,
                },
                volume,
            });
        }
        for n in 1..=q_p {
            let needed = init + n * prod;
            if needed > cap {
                let r = div_ceil(needed - cap, cons);
                if r > q_k {
                    return Err(SynthesisError::InfeasibleTokenFlow(format!(
                        "firing {} of '{}' overflows channel '{}' within the iteration",
                        n, p, c
                    )));
                }
                deps.push(FiringDependency {
                    kind: DependencyKind::Space,
                    channel: Some(c.to_owned()),
                    src: Job {
                        actor: k.to_owned(),
                        firing: r,
                    },
                    dst: Job {
                        actor: p.to_owned(),
                        firing: n,
                    },
                    volume: 0,
                });
            }
        }
    }
    for a in &app.actors_identifiers {
        let q = repetition_vector.get(a).copied().unwrap_or(0);
        for n in 1..q {
            deps.push(FiringDependency {
                kind: DependencyKind::Order,
                channel: None,
                src: Job {
                    actor: a.to_owned(),
                    firing: n,
                },
                dst: Job {
                    actor: a.to_owned(),
                    firing: n + 1,
                },
                volume: 0,
            });
        }
    }
    Ok(deps)
}

/// A sequential order of the jobs respecting every dependency, or `None` when the
/// dependencies are cyclic, i.e. the application deadlocks with its buffers.
pub fn sequential_job_order(jobs: &[Job], deps: &[FiringDependency]) -> Option<Vec<Job>> {
    let mut graph: Graph<&Job, ()> = Graph::new();
    let nodes: HashMap<&Job, _> = jobs.iter().map(|j| (j, graph.add_node(j))).collect();
    for d in deps {
        if let (Some(s), Some(t)) = (nodes.get(&d.src), nodes.get(&d.dst)) {
            graph.add_edge(*s, *t, ());
        }
    }
    toposort(&graph, None)
        .ok()
        .map(|order| order.into_iter().map(|n| graph[n].to_owned()).collect())
}

/// A periodic admissible sequential schedule, as a list of actor firings, if any.
pub fn periodic_admissible_static_schedule(
    app: &SDFApplication,
    repetition_vector: &HashMap<String, u64>,
) -> Option<Vec<String>> {
    let jobs: Vec<Job> = app
        .actors_identifiers
        .iter()
        .flat_map(|a| {
            (1..=repetition_vector.get(a).copied().unwrap_or(0)).map(move |k| Job {
                actor: a.to_owned(),
                firing: k,
            })
        })
        .collect();
    let deps = firing_dependencies(app, repetition_vector).ok()?;
    sequential_job_order(&jobs, &deps).map(|order| order.into_iter().map(|j| j.actor).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::pipeline_application;

    fn set_rate(app: &mut SDFApplication, c: &str, a: &str, r: i64) {
        app.topology
            .entry(c.to_string())
            .or_default()
            .insert(a.to_string(), r);
    }

    #[test]
    fn multirate_pipeline_is_scaled_to_integers() {
        let mut app = pipeline_application(6, 0);
        set_rate(&mut app, "c", "a", 2);
        set_rate(&mut app, "c", "b", -3);
        let q = compute_repetition_vector(&app).unwrap();
        assert_eq!(q["a"], 3);
        assert_eq!(q["b"], 2);
    }

    #[test]
    fn inconsistent_cycle_has_no_repetition_vector() {
        let mut app = pipeline_application(4, 0);
        app.channels_identifiers.push("back".to_string());
        app.channel_capacities.insert("back".to_string(), 4);
        app.channel_initial_tokens.insert("back".to_string(), 2);
        set_rate(&mut app, "back", "b", 2);
        set_rate(&mut app, "back", "a", -1);
        assert_eq!(compute_repetition_vector(&app), None);
    }

    #[test]
    fn dangling_producer_is_inconsistent() {
        let mut app = pipeline_application(4, 0);
        app.topology.get_mut("c").unwrap().remove("b");
        assert_eq!(compute_repetition_vector(&app), None);
    }

    #[test]
    fn disconnected_actors_fire_once() {
        let mut app = pipeline_application(1, 0);
        app.actors_identifiers.push("lonely".to_string());
        let q = compute_repetition_vector(&app).unwrap();
        assert_eq!(q["lonely"], 1);
        assert_eq!(q["a"], 1);
    }

    #[test]
    fn initial_tokens_feed_the_first_consumption() {
        let app = pipeline_application(1, 1);
        let q = compute_repetition_vector(&app).unwrap();
        let deps = firing_dependencies(&app, &q).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].kind, DependencyKind::Space);
        assert_eq!(deps[0].src.actor, "b");
        assert_eq!(deps[0].dst.actor, "a");
        assert_eq!(
            periodic_admissible_static_schedule(&app, &q),
            Some(vec!["b".to_string(), "a".to_string()])
        );
    }

    #[test]
    fn data_volumes_follow_token_order() {
        let mut app = pipeline_application(6, 0);
        set_rate(&mut app, "c", "a", 2);
        set_rate(&mut app, "c", "b", -3);
        let q = compute_repetition_vector(&app).unwrap();
        let deps = firing_dependencies(&app, &q).unwrap();
        let data: Vec<(u64, u64, u64)> = deps
            .iter()
            .filter(|d| d.kind == DependencyKind::Data)
            .map(|d| (d.src.firing, d.dst.firing, d.volume))
            .collect();
        // tokens 1..=3 go to b_1 and 4..=6 to b_2, a produces two per firing
        assert_eq!(data, vec![(1, 1, 2), (2, 1, 1), (2, 2, 1), (3, 2, 2)]);
        let total: u64 = deps.iter().map(|d| d.volume).sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn zero_capacity_is_infeasible() {
        let app = pipeline_application(0, 0);
        let q = compute_repetition_vector(&app).unwrap();
        assert!(matches!(
            firing_dependencies(&app, &q),
            Err(SynthesisError::InfeasibleTokenFlow(_))
        ));
        assert_eq!(periodic_admissible_static_schedule(&app, &q), None);
    }

    #[test]
    fn tight_cycle_deadlocks() {
        let mut app = pipeline_application(1, 0);
        app.channels_identifiers.push("back".to_string());
        app.channel_capacities.insert("back".to_string(), 1);
        app.channel_initial_tokens.insert("back".to_string(), 0);
        set_rate(&mut app, "back", "b", 1);
        set_rate(&mut app, "back", "a", -1);
        let q = compute_repetition_vector(&app).unwrap();
        assert_eq!(periodic_admissible_static_schedule(&app, &q), None);
    }
}
