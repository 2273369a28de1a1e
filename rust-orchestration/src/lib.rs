pub mod exploration;
pub mod identification;

use std::sync::Arc;

use log::{debug, info};
use sdfsyde_blueprints::{load_decision_models, write_solutions, SynthesisArgs};
use sdfsyde_common::models::{SDFToMultiCoreCharacterized, SDFToMultiCoreCharacterizedJobs};
use sdfsyde_core::{
    compute_dominant_biddings, DecisionModel, ExplorationSolution, Explorer, SynthesisError,
};
use sdfsyde_exploration::{JobSchedulingSolution, SDFJobSchedulingExplorer};

pub use exploration::{
    compute_pareto_solutions, explore_cooperatively, pareto_dominance_partial_cmp,
};
pub use identification::{compute_dominant_decision_models, identification_procedure};

/// The reason no identified model could be explored, found by expanding the characterised
/// problems that identification left unexpanded.
fn explain_unexplorable(identified: &[Arc<dyn DecisionModel>]) -> SynthesisError {
    let has_jobs = identified
        .iter()
        .any(|m| SDFToMultiCoreCharacterizedJobs::try_from(m.as_ref()).is_ok());
    if !has_jobs {
        for m in identified {
            if let Ok(c) = SDFToMultiCoreCharacterized::try_from(m.as_ref()) {
                if let Err(e) = SDFToMultiCoreCharacterizedJobs::from_characterized(c) {
                    return e.escalate();
                }
            }
        }
    }
    SynthesisError::MalformedModel(
        "the inputs do not form a complete application, platform and timing characterisation"
            .to_string(),
    )
}

/// Identifies, explores and writes out the solutions of the problem given in `args`.
pub fn run(args: &SynthesisArgs) -> Result<Vec<ExplorationSolution>, SynthesisError> {
    let search = args.search_configuration()?;
    let exploration = args.exploration_configuration()?;
    if args.inputs.is_empty() {
        return Err(SynthesisError::MalformedModel(
            "no input decision model given".to_string(),
        ));
    }
    let inputs = load_decision_models(&args.inputs)?;
    info!("Read {} input decision models", inputs.len());
    let identified = identification_procedure(&sdfsyde_common::identification_rules(), inputs);
    let dominant = compute_dominant_decision_models(&identified);
    info!(
        "Identified {} decision models, {} of them dominant",
        identified.len(),
        dominant.len()
    );
    let explorers: Vec<Arc<dyn Explorer>> = vec![Arc::new(SDFJobSchedulingExplorer::new(search))];
    let mut solutions = Vec::new();
    let mut explored_any = false;
    for m in &dominant {
        let bids: Vec<_> = explorers.iter().map(|e| e.bid(m.clone())).collect();
        let Some((idx, bid)) = compute_dominant_biddings(bids.iter()) else {
            debug!("No explorer bids for {}", m.category());
            continue;
        };
        info!("Exploring {} with {}", m.category(), bid.explorer_unique_identifier);
        explored_any = true;
        solutions.extend(explore_cooperatively(
            m.clone(),
            &explorers[idx..=idx],
            Vec::new(),
            exploration,
        )?);
    }
    if !explored_any {
        return Err(explain_unexplorable(&identified));
    }
    let solutions = compute_pareto_solutions(solutions);
    if solutions.is_empty() {
        return Err(SynthesisError::BudgetExhausted);
    }
    for (m, _) in &solutions {
        if let Ok(s) = JobSchedulingSolution::try_from(m.as_ref()) {
            debug!("Keeping a {:?} solution of cost {}", s.status, s.cost);
        }
    }
    write_solutions(&args.output_path, &solutions)?;
    info!(
        "Finished exploration with {} solutions written to {}",
        solutions.len(),
        args.output_path.display()
    );
    Ok(solutions)
}
