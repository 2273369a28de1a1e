use std::{
    cmp::Ordering,
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
};

use log::{debug, warn};
use sdfsyde_core::{
    objectives_to_string, DecisionModel, ExplorationConfiguration, ExplorationSolution, Explorer,
    SynthesisError,
};

/// Pareto comparison of two objective vectors to be minimised.
///
/// `Less` means `lhs` dominates `rhs`. Vectors over different objectives are incomparable.
pub fn pareto_dominance_partial_cmp(
    lhs: &BTreeMap<String, f64>,
    rhs: &BTreeMap<String, f64>,
) -> Option<Ordering> {
    if lhs.len() != rhs.len() || lhs.keys().any(|k| !rhs.contains_key(k)) {
        return None;
    }
    let mut less = false;
    let mut greater = false;
    for (k, v) in lhs {
        match v.partial_cmp(&rhs[k])? {
            Ordering::Less => less = true,
            Ordering::Greater => greater = true,
            Ordering::Equal => {}
        }
    }
    match (less, greater) {
        (false, false) => Some(Ordering::Equal),
        (true, false) => Some(Ordering::Less),
        (false, true) => Some(Ordering::Greater),
        (true, true) => None,
    }
}

/// Keeps only the solutions no other one dominates, first come first kept among equals.
pub fn compute_pareto_solutions(sols: Vec<ExplorationSolution>) -> Vec<ExplorationSolution> {
    let mut front: Vec<ExplorationSolution> = Vec::new();
    for (m, objs) in sols {
        if front.iter().any(|(_, o)| {
            matches!(
                pareto_dominance_partial_cmp(o, &objs),
                Some(Ordering::Less) | Some(Ordering::Equal)
            )
        }) {
            continue;
        }
        front.retain(|(_, o)| pareto_dominance_partial_cmp(&objs, o) != Some(Ordering::Less));
        front.push((m, objs));
    }
    front
}

/// Runs every explorer on the same decision model in parallel and merges what they find
/// into one non-dominated set.
///
/// An explorer that proves the model infeasible makes the whole exploration fail, since
/// every explorer works on the same model; other errors are only reported.
pub fn explore_cooperatively(
    m: Arc<dyn DecisionModel>,
    explorers: &[Arc<dyn Explorer>],
    currrent_solutions: Vec<ExplorationSolution>,
    exploration_configuration: ExplorationConfiguration,
) -> Result<Vec<ExplorationSolution>, SynthesisError> {
    let shared_solutions = Mutex::new(compute_pareto_solutions(currrent_solutions));
    let failures: Mutex<Vec<SynthesisError>> = Mutex::new(Vec::new());
    rayon::scope(|s| {
        for explorer in explorers {
            let m_cloned = m.clone();
            let shared = &shared_solutions;
            let failures = &failures;
            s.spawn(move |_| {
                let previous = shared
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                match explorer.explore(m_cloned, &previous, exploration_configuration) {
                    Ok(found) => {
                        let mut sols = shared.lock().unwrap_or_else(PoisonError::into_inner);
                        for (solved, objs) in found {
                            let dominated = sols
                                .iter()
                                .any(|(_, y)| {
                                    matches!(
                                        pareto_dominance_partial_cmp(y, &objs),
                                        Some(Ordering::Less) | Some(Ordering::Equal)
                                    )
                                });
                            if dominated {
                                continue;
                            }
                            debug!(
                                "{} found a new solution with objectives: {}.",
                                explorer.unique_identifier(),
                                objectives_to_string(&objs)
                            );
                            sols.retain(|(_, y)| {
                                pareto_dominance_partial_cmp(&objs, y) != Some(Ordering::Less)
                            });
                            sols.push((solved, objs));
                        }
                    }
                    Err(e) => {
                        warn!("{} failed: {}", explorer.unique_identifier(), e);
                        failures
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(e);
                    }
                }
            });
        }
    });
    let solutions = shared_solutions
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner);
    let failures = failures.into_inner().unwrap_or_else(PoisonError::into_inner);
    if let Some(i) = failures
        .iter()
        .position(|e| matches!(e, SynthesisError::Infeasible(_)))
    {
        return Err(failures.into_iter().nth(i).unwrap_or(SynthesisError::BudgetExhausted));
    }
    if solutions.is_empty() {
        if let Some(e) = failures.into_iter().next() {
            return Err(e);
        }
    }
    Ok(solutions)
}
