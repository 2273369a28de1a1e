use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};

use sdfsyde_common::models::{
    CommunicatingMultiCore, SDFApplication, SDFToMultiCoreCharacterized,
    SDFToMultiCoreCharacterizedJobs,
};
use sdfsyde_core::SynthesisError;
use sdfsyde_exploration::{
    synthesize, verify, ObjectiveWeights, SearchConfiguration, SearchConfigurationBuilder,
    SearchStatus,
};

fn s(x: &str) -> String {
    x.to_string()
}

fn config(workers: usize) -> SearchConfiguration {
    SearchConfigurationBuilder::default()
        .weights(ObjectiveWeights {
            throughput: 1,
            latency: 1,
        })
        .parallel_workers(workers)
        .build()
        .unwrap()
}

fn application(
    actors: &[&str],
    channels: &[(&str, &str, i64, &str, i64, u64, u64)],
) -> SDFApplication {
    let mut topology: HashMap<String, HashMap<String, i64>> = HashMap::new();
    let mut capacities = HashMap::new();
    let mut initial = HashMap::new();
    for (c, p, prod, k, cons, cap, init) in channels {
        topology.insert(
            s(c),
            HashMap::from([(s(p), *prod), (s(k), -*cons)]),
        );
        capacities.insert(s(c), *cap);
        initial.insert(s(c), *init);
    }
    SDFApplication {
        actors_identifiers: actors.iter().map(|a| s(a)).collect(),
        channels_identifiers: channels.iter().map(|c| s(c.0)).collect(),
        topology,
        channel_capacities: capacities,
        channel_initial_tokens: initial,
    }
}

fn platform(pes: &[&str], cus: &[(&str, u32)], links: &[(&str, &str)]) -> CommunicatingMultiCore {
    CommunicatingMultiCore {
        processing_elements: pes.iter().map(|p| s(p)).collect(),
        communication_units: cus.iter().map(|(c, _)| s(c)).collect(),
        topology_srcs: links.iter().map(|(a, _)| s(a)).collect(),
        topology_dsts: links.iter().map(|(_, b)| s(b)).collect(),
        communication_units_max_transfers: cus.iter().map(|(c, m)| (s(c), *m)).collect(),
    }
}

fn characterize(
    app: SDFApplication,
    plat: CommunicatingMultiCore,
    wcet: &[(&str, &[u64])],
) -> SDFToMultiCoreCharacterized {
    let wcet = wcet
        .iter()
        .map(|(a, times)| {
            (
                s(a),
                plat.processing_elements
                    .iter()
                    .cloned()
                    .zip(times.iter().copied())
                    .collect(),
            )
        })
        .collect();
    let transfer_costs = app
        .channels_identifiers
        .iter()
        .map(|c| {
            (
                c.to_owned(),
                plat.communication_units
                    .iter()
                    .map(|u| (u.to_owned(), 1))
                    .collect(),
            )
        })
        .collect();
    SDFToMultiCoreCharacterized {
        sdf_application: app,
        platform: plat,
        wcet,
        transfer_costs,
        actor_affinities: HashMap::new(),
    }
}

fn two_cores_on_a_bus() -> CommunicatingMultiCore {
    platform(
        &["p0", "p1"],
        &[("bus", 1)],
        &[("p0", "bus"), ("bus", "p1")],
    )
}

/// Three actors with different rates on three heterogeneous cores and two interconnects.
fn multirate_problem() -> SDFToMultiCoreCharacterized {
    let app = application(
        &["a", "b", "c"],
        &[
            ("ab", "a", 2, "b", 1, 4, 0),
            ("bc", "b", 1, "c", 2, 2, 0),
        ],
    );
    let plat = platform(
        &["p0", "p1", "p2"],
        &[("bus", 2), ("link", 1)],
        &[("p0", "bus"), ("p1", "bus"), ("p2", "bus"), ("p1", "link"), ("link", "p2")],
    );
    characterize(
        app,
        plat,
        &[("a", &[2, 3, 3]), ("b", &[2, 2, 1]), ("c", &[1, 2, 2])],
    )
}

#[test]
fn scenario_a_single_token_loop_pipelines_over_two_cores() {
    let model = characterize(
        application(&["a", "b"], &[("c", "a", 1, "b", 1, 1, 1)]),
        two_cores_on_a_bus(),
        &[("a", &[1, 1]), ("b", &[1, 1])],
    );
    let outcome = synthesize(&model, &config(1)).unwrap();
    assert_eq!(outcome.status, SearchStatus::Complete);
    assert_eq!(outcome.best.objectives.throughput, 1);
    assert_eq!(outcome.best.objectives.latency, 2);
    assert_eq!(outcome.best.cost, 3);
    // the only token is an initial one, nothing crosses the network
    assert!(outcome.best.transfers.is_empty());
    let mapping = outcome.best.mapping();
    assert_ne!(mapping["a_1"], mapping["b_1"]);
}

#[test]
fn scenario_b_zero_capacity_is_infeasible() {
    let model = characterize(
        application(&["a", "b"], &[("c", "a", 1, "b", 1, 0, 0)]),
        two_cores_on_a_bus(),
        &[("a", &[1, 1]), ("b", &[1, 1])],
    );
    assert!(matches!(
        synthesize(&model, &config(1)),
        Err(SynthesisError::Infeasible(_))
    ));
}

#[test]
fn scenario_c_three_jobs_on_one_core_run_back_to_back() {
    let model = characterize(
        application(&["x", "y", "z"], &[]),
        platform(&["p0"], &[], &[]),
        &[("x", &[2]), ("y", &[3]), ("z", &[4])],
    );
    let outcome = synthesize(&model, &config(1)).unwrap();
    assert_eq!(outcome.best.objectives.latency, 9);
    let mut intervals: Vec<(u64, u64)> = outcome
        .best
        .schedule
        .values()
        .map(|j| (j.start, j.start + j.duration))
        .collect();
    intervals.sort_unstable();
    assert_eq!(intervals.len(), 3);
    assert!(intervals.windows(2).all(|w| w[0].1 <= w[1].0));
    assert!(outcome.best.objectives.throughput <= outcome.best.objectives.latency);
}

#[test]
fn scenario_d_unconnected_cores_are_unroutable_hence_infeasible() {
    let mut model = characterize(
        application(&["a", "b"], &[("c", "a", 1, "b", 1, 1, 0)]),
        platform(&["p0", "p1"], &[], &[]),
        &[("a", &[1, 1]), ("b", &[1, 1])],
    );
    model
        .actor_affinities
        .insert(s("a"), HashSet::from([s("p0")]));
    model
        .actor_affinities
        .insert(s("b"), HashSet::from([s("p1")]));
    match synthesize(&model, &config(1)) {
        Err(SynthesisError::Infeasible(msg)) => assert!(msg.contains("no route")),
        other => panic!("unexpected {:?}", other.map(|o| o.best)),
    }
}

#[test]
fn malformed_models_are_rejected_before_search() {
    let mut model = multirate_problem();
    model.wcet.get_mut("a").unwrap().remove("p2");
    assert!(matches!(
        synthesize(&model, &config(1)),
        Err(SynthesisError::MalformedModel(_))
    ));
}

#[test]
fn inconsistent_rates_are_infeasible() {
    let model = characterize(
        application(
            &["a", "b"],
            &[("ab", "a", 1, "b", 1, 2, 0), ("ba", "b", 2, "a", 1, 2, 1)],
        ),
        two_cores_on_a_bus(),
        &[("a", &[1, 1]), ("b", &[1, 1])],
    );
    assert!(matches!(
        synthesize(&model, &config(1)),
        Err(SynthesisError::Infeasible(_))
    ));
}

#[test]
fn solutions_satisfy_every_invariant() {
    let model = multirate_problem();
    let outcome = synthesize(&model, &config(1)).unwrap();
    let jobs = SDFToMultiCoreCharacterizedJobs::from_characterized(model).unwrap();
    assert!(verify(&jobs, &outcome.best).is_ok());
    let best = &outcome.best;
    assert!(best.objectives.throughput <= best.objectives.latency);
    for t in &best.transfers {
        let same = best.schedule[&t.sender].processing_element
            == best.schedule[&t.receiver].processing_element;
        if same {
            assert_eq!(t.routed_volume, 0);
            assert!(t.hops.is_empty());
        } else {
            assert_eq!(t.routed_volume, t.tokens);
            assert!(!t.hops.is_empty());
        }
    }
    // every token produced in the iteration is consumed in it
    let ab: u64 = best
        .transfers
        .iter()
        .filter(|t| t.channel == "ab")
        .map(|t| t.tokens)
        .sum();
    assert_eq!(ab, 2);
    for th in best.actor_throughputs.values() {
        assert!(*th <= best.objectives.throughput);
    }
}

#[test]
fn same_seed_reproduces_the_same_cost() {
    let model = multirate_problem();
    let first = synthesize(&model, &config(1)).unwrap();
    let second = synthesize(&model, &config(1)).unwrap();
    assert_eq!(first.best.cost, second.best.cost);
    assert_eq!(first.best, second.best);
}

#[test]
fn parallel_workers_agree_with_sequential_search() {
    let model = multirate_problem();
    let sequential = synthesize(&model, &config(1)).unwrap();
    let parallel = synthesize(&model, &config(4)).unwrap();
    assert_eq!(sequential.status, SearchStatus::Complete);
    assert_eq!(parallel.status, SearchStatus::Complete);
    assert_eq!(sequential.best.cost, parallel.best.cost);
}

/// Thirteen unrelated actors on three identical cores: some core runs five of them, which
/// no bound proves before most dispatch orders are tried.
fn thirteen_jobs_on_three_cores() -> SDFToMultiCoreCharacterized {
    let names: Vec<String> = (0..13).map(|i| format!("x{}", i)).collect();
    let actors: Vec<&str> = names.iter().map(|n| n.as_str()).collect();
    let times: &[u64] = &[2, 2, 2];
    let wcet: Vec<(&str, &[u64])> = actors.iter().map(|a| (*a, times)).collect();
    characterize(
        application(&actors, &[]),
        platform(&["p0", "p1", "p2"], &[], &[]),
        &wcet,
    )
}

#[test]
fn solution_limit_stops_early() {
    let model = multirate_problem();
    let mut c = config(1);
    c.max_sols = 1;
    let outcome = synthesize(&model, &c).unwrap();
    assert_eq!(outcome.status, SearchStatus::BudgetExhausted);
    assert_eq!(outcome.best.status, SearchStatus::BudgetExhausted);
    assert_eq!(outcome.improvements.len(), 1);
    let jobs = SDFToMultiCoreCharacterizedJobs::from_characterized(model).unwrap();
    assert!(verify(&jobs, &outcome.best).is_ok());
}

#[test]
fn timeout_returns_the_best_schedule_so_far() {
    let model = thirteen_jobs_on_three_cores();
    let mut c = config(1);
    c.total_timeout = 1;
    c.restart_base_factor = u64::MAX;
    c.max_restarts = 0;
    let began = Instant::now();
    let outcome = synthesize(&model, &c).unwrap();
    let elapsed = began.elapsed();
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(30));
    assert_eq!(outcome.status, SearchStatus::BudgetExhausted);
    let jobs = SDFToMultiCoreCharacterizedJobs::from_characterized(model).unwrap();
    assert!(verify(&jobs, &outcome.best).is_ok());
    assert_eq!(outcome.best.objectives.latency, 10);
}

#[test]
fn dispatch_order_is_searched_for_the_best_latency() {
    // x and y share p0 and only y feeds z on p1: y has to run before x
    let mut model = characterize(
        application(&["x", "y", "z"], &[("yz", "y", 1, "z", 1, 1, 0)]),
        two_cores_on_a_bus(),
        &[("x", &[1, 1]), ("y", &[5, 5]), ("z", &[5, 5])],
    );
    for (actor, pe) in [("x", "p0"), ("y", "p0"), ("z", "p1")] {
        model.actor_affinities.insert(s(actor), HashSet::from([s(pe)]));
    }
    let mut c = config(1);
    c.weights = ObjectiveWeights {
        throughput: 0,
        latency: 1,
    };
    let outcome = synthesize(&model, &c).unwrap();
    assert_eq!(outcome.status, SearchStatus::Complete);
    assert_eq!(outcome.best.status, SearchStatus::Complete);
    assert_eq!(outcome.best.objectives.latency, 11);
    let schedule = &outcome.best.schedule;
    assert_eq!((schedule["y_1"].start, schedule["x_1"].start), (0, 5));
    assert_eq!(schedule["z_1"].start, 6);
    assert_eq!(outcome.best.transfers[0].hops[0].start, 5);
}

#[test]
fn oversized_transfer_times_are_malformed() {
    let mut model = characterize(
        application(&["a", "b"], &[("c", "a", 2, "b", 2, 2, 0)]),
        two_cores_on_a_bus(),
        &[("a", &[1, 1]), ("b", &[1, 1])],
    );
    model
        .transfer_costs
        .get_mut("c")
        .unwrap()
        .insert(s("bus"), u64::MAX / 2 + 1);
    assert!(matches!(
        synthesize(&model, &config(1)),
        Err(SynthesisError::MalformedModel(_))
    ));
}

#[test]
fn heavier_latency_weight_never_worsens_latency() {
    let model = multirate_problem();
    let balanced = synthesize(&model, &config(1)).unwrap();
    let mut c = config(1);
    c.weights = ObjectiveWeights {
        throughput: 0,
        latency: 1,
    };
    let latency_only = synthesize(&model, &c).unwrap();
    assert!(latency_only.best.objectives.latency <= balanced.best.objectives.latency);
}
