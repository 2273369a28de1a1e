use std::sync::Arc;

use log::debug;
use sdfsyde_core::DecisionModel;

use crate::{
    models::{
        AnalysedSDFApplication, CommunicatingMultiCore, InstrumentedTimes, SDFApplication,
        SDFToMultiCoreCharacterized, SDFToMultiCoreCharacterizedJobs,
    },
    sdf::periodic_admissible_static_schedule,
};

fn push_if_new(
    decision_models: &[Arc<dyn DecisionModel>],
    new_models: &mut Vec<Arc<dyn DecisionModel>>,
    potential: Arc<dyn DecisionModel>,
) {
    if !decision_models.contains(&potential) && !new_models.contains(&potential) {
        new_models.push(potential);
    }
}

pub fn identify_analysed_sdf_application(
    decision_models: &[Arc<dyn DecisionModel>],
) -> Vec<Arc<dyn DecisionModel>> {
    let mut identified = Vec::new();
    for m in decision_models {
        if let Ok(sdf_application) = SDFApplication::try_from(m.as_ref()) {
            if sdf_application.validate().is_err() {
                continue;
            }
            if let Some(repetition_vector) = sdf_application.repetition_vector() {
                if let Some(schedule) =
                    periodic_admissible_static_schedule(&sdf_application, &repetition_vector)
                {
                    let potential = Arc::new(AnalysedSDFApplication {
                        sdf_application,
                        repetition_vector,
                        periodic_admissible_static_schedule: schedule,
                    });
                    push_if_new(decision_models, &mut identified, potential);
                } else {
                    debug!("SDF application deadlocks with its buffer capacities");
                }
            } else {
                debug!("SDF application has inconsistent rates");
            }
        }
    }
    identified
}

pub fn identify_characterized_from_parts(
    decision_models: &[Arc<dyn DecisionModel>],
) -> Vec<Arc<dyn DecisionModel>> {
    let mut identified = Vec::new();
    let apps: Vec<SDFApplication> = decision_models
        .iter()
        .flat_map(|m| SDFApplication::try_from(m.as_ref()).ok())
        .collect();
    let plats: Vec<CommunicatingMultiCore> = decision_models
        .iter()
        .flat_map(|m| CommunicatingMultiCore::try_from(m.as_ref()).ok())
        .collect();
    let times: Vec<InstrumentedTimes> = decision_models
        .iter()
        .flat_map(|m| InstrumentedTimes::try_from(m.as_ref()).ok())
        .collect();
    for app in &apps {
        for plat in &plats {
            for t in &times {
                let potential = SDFToMultiCoreCharacterized {
                    sdf_application: app.to_owned(),
                    platform: plat.to_owned(),
                    wcet: t.worst_case_execution_times.to_owned(),
                    transfer_costs: t.per_token_transfer_times.to_owned(),
                    actor_affinities: Default::default(),
                };
                match potential.validate() {
                    Ok(_) => push_if_new(decision_models, &mut identified, Arc::new(potential)),
                    Err(e) => debug!("Could not characterise application on platform: {}", e),
                }
            }
        }
    }
    identified
}

pub fn identify_characterized_jobs(
    decision_models: &[Arc<dyn DecisionModel>],
) -> Vec<Arc<dyn DecisionModel>> {
    let mut identified = Vec::new();
    for m in decision_models {
        if let Ok(characterized) = SDFToMultiCoreCharacterized::try_from(m.as_ref()) {
            match SDFToMultiCoreCharacterizedJobs::from_characterized(characterized) {
                Ok(jobs) => push_if_new(decision_models, &mut identified, Arc::new(jobs)),
                Err(e) => debug!("Could not expand characterised model into jobs: {}", e),
            }
        }
    }
    identified
}
