pub mod irules;
pub mod models;
pub mod sdf;

use std::{path::Path, sync::Arc};

use sdfsyde_core::{
    decision_models_schemas_gen, load_decision_model, DecisionModel, IdentificationRule,
    SynthesisError,
};

pub use irules::*;
pub use models::*;

/// The identification rules of the common decision models.
pub fn identification_rules() -> Vec<IdentificationRule> {
    vec![
        identify_analysed_sdf_application,
        identify_characterized_from_parts,
        identify_characterized_jobs,
    ]
}

pub fn decision_models_schemas() -> Vec<String> {
    decision_models_schemas_gen![
        SDFApplication,
        AnalysedSDFApplication,
        CommunicatingMultiCore,
        InstrumentedTimes,
        SDFToMultiCoreCharacterized,
        SDFToMultiCoreCharacterizedJobs
    ]
}

/// Loads a decision model file whose category is not known beforehand.
///
/// The categories are tried from the most to the least specific one, so that a body
/// containing a whole characterised problem is never mistaken for one of its parts.
pub fn load_known_decision_model(path: &Path) -> Result<Arc<dyn DecisionModel>, SynthesisError> {
    if let Ok(m) = load_decision_model::<SDFToMultiCoreCharacterizedJobs>(path) {
        return Ok(Arc::new(m));
    }
    if let Ok(m) = load_decision_model::<SDFToMultiCoreCharacterized>(path) {
        return Ok(Arc::new(m));
    }
    if let Ok(m) = load_decision_model::<AnalysedSDFApplication>(path) {
        return Ok(Arc::new(m));
    }
    if let Ok(m) = load_decision_model::<SDFApplication>(path) {
        return Ok(Arc::new(m));
    }
    if let Ok(m) = load_decision_model::<CommunicatingMultiCore>(path) {
        return Ok(Arc::new(m));
    }
    load_decision_model::<InstrumentedTimes>(path).map(|m| Arc::new(m) as Arc<dyn DecisionModel>)
}
