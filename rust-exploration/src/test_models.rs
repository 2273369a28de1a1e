use std::collections::HashMap;

use sdfsyde_common::models::{
    CommunicatingMultiCore, SDFApplication, SDFToMultiCoreCharacterized,
    SDFToMultiCoreCharacterizedJobs,
};

fn s(x: &str) -> String {
    x.to_string()
}

/// `n` processing elements all attached to a single bus serving one transfer at a time.
pub fn bus_platform(n: usize) -> CommunicatingMultiCore {
    let pes: Vec<String> = (0..n).map(|i| format!("p{}", i)).collect();
    CommunicatingMultiCore {
        topology_srcs: pes.clone(),
        topology_dsts: vec![s("bus"); n],
        processing_elements: pes,
        communication_units: vec![s("bus")],
        communication_units_max_transfers: HashMap::from([(s("bus"), 1)]),
    }
}

/// Two processing elements joined by a direct link and by a two-router detour.
pub fn mesh_platform() -> CommunicatingMultiCore {
    CommunicatingMultiCore {
        processing_elements: vec![s("p0"), s("p1")],
        communication_units: vec![s("direct"), s("r0"), s("r1")],
        topology_srcs: vec![s("p0"), s("direct"), s("p0"), s("r0"), s("r1")],
        topology_dsts: vec![s("direct"), s("p1"), s("r0"), s("r1"), s("p1")],
        communication_units_max_transfers: HashMap::from([
            (s("direct"), 1),
            (s("r0"), 1),
            (s("r1"), 1),
        ]),
    }
}

/// Actor `a` producing `prod` tokens per firing into channel `c`, consumed `cons` at a
/// time by actor `b`, with unit WCETs and unit transfer costs.
pub fn characterized_with_rates(
    prod: i64,
    cons: i64,
    capacity: u64,
    initial: u64,
    platform: CommunicatingMultiCore,
) -> SDFToMultiCoreCharacterized {
    let app = SDFApplication {
        actors_identifiers: vec![s("a"), s("b")],
        channels_identifiers: vec![s("c")],
        topology: HashMap::from([(
            s("c"),
            HashMap::from([(s("a"), prod), (s("b"), -cons)]),
        )]),
        channel_capacities: HashMap::from([(s("c"), capacity)]),
        channel_initial_tokens: HashMap::from([(s("c"), initial)]),
    };
    let wcet = app
        .actors_identifiers
        .iter()
        .map(|a| {
            (
                a.to_owned(),
                platform
                    .processing_elements
                    .iter()
                    .map(|p| (p.to_owned(), 1))
                    .collect(),
            )
        })
        .collect();
    let transfer_costs = HashMap::from([(
        s("c"),
        platform
            .communication_units
            .iter()
            .map(|u| (u.to_owned(), 1))
            .collect(),
    )]);
    SDFToMultiCoreCharacterized {
        sdf_application: app,
        platform,
        wcet,
        transfer_costs,
        actor_affinities: HashMap::new(),
    }
}

/// The unit-rate pipeline `a -> b` on `n` processing elements sharing a bus.
pub fn chain(n: usize, capacity: u64, initial: u64) -> SDFToMultiCoreCharacterizedJobs {
    SDFToMultiCoreCharacterizedJobs::from_characterized(characterized_with_rates(
        1,
        1,
        capacity,
        initial,
        bus_platform(n),
    ))
    .expect("valid pipeline")
}

/// The multirate pipeline `a -> b` on two processing elements sharing a bus.
pub fn with_rates(
    prod: i64,
    cons: i64,
    capacity: u64,
    initial: u64,
) -> SDFToMultiCoreCharacterizedJobs {
    SDFToMultiCoreCharacterizedJobs::from_characterized(characterized_with_rates(
        prod,
        cons,
        capacity,
        initial,
        bus_platform(2),
    ))
    .expect("valid multirate pipeline")
}

/// `n` unrelated actors lasting 2 on every one of `pes` processing elements sharing a bus.
pub fn independent(n: usize, pes: usize) -> SDFToMultiCoreCharacterizedJobs {
    let platform = bus_platform(pes);
    let actors: Vec<String> = (0..n).map(|i| format!("x{}", i)).collect();
    let wcet = actors
        .iter()
        .map(|a| {
            (
                a.to_owned(),
                platform
                    .processing_elements
                    .iter()
                    .map(|p| (p.to_owned(), 2))
                    .collect(),
            )
        })
        .collect();
    SDFToMultiCoreCharacterizedJobs::from_characterized(SDFToMultiCoreCharacterized {
        sdf_application: SDFApplication {
            actors_identifiers: actors,
            channels_identifiers: vec![],
            topology: HashMap::new(),
            channel_capacities: HashMap::new(),
            channel_initial_tokens: HashMap::new(),
        },
        platform,
        wcet,
        transfer_costs: HashMap::new(),
        actor_affinities: HashMap::new(),
    })
    .expect("valid independent actors")
}
