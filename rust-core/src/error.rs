//! Error taxonomy shared by every crate of the workspace.
//!
//! The variants fall into three groups. `MalformedModel` is raised before any
//! search starts and is fatal. `InfeasibleTokenFlow`, `NoFeasibleMapping` and
//! `UnroutableTransfer` are local pruning signals produced by the engines and
//! consumed by the search driver through backtracking. `Infeasible` and
//! `BudgetExhausted` are terminal and user visible.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Structural or validation failure of the input model.
    #[error("malformed model: {0}")]
    MalformedModel(String),

    /// Token conservation or a channel capacity cannot be satisfied.
    #[error("infeasible token flow: {0}")]
    InfeasibleTokenFlow(String),

    /// No processing element can host a job under precedence and exclusivity.
    #[error("no feasible mapping: {0}")]
    NoFeasibleMapping(String),

    /// No connected path of communication units joins the two processing elements.
    #[error("no route for channel {channel} from {src} to {dst}")]
    UnroutableTransfer {
        channel: String,
        src: String,
        dst: String,
    },

    /// The whole decision space was exhausted without a feasible assignment.
    #[error("infeasible: {0}")]
    Infeasible(String),

    /// The exploration budget ran out before any feasible solution was found.
    #[error("exploration budget exhausted before a feasible solution was found")]
    BudgetExhausted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl SynthesisError {
    /// Whether the error is a local failure that backtracking can recover from.
    pub fn is_pruning_signal(&self) -> bool {
        matches!(
            self,
            SynthesisError::InfeasibleTokenFlow(_)
                | SynthesisError::NoFeasibleMapping(_)
                | SynthesisError::UnroutableTransfer { .. }
        )
    }

    /// Escalates a pruning signal that was proven globally into `Infeasible`.
    pub fn escalate(self) -> SynthesisError {
        if self.is_pruning_signal() {
            SynthesisError::Infeasible(self.to_string())
        } else {
            self
        }
    }
}

impl From<serde_json::Error> for SynthesisError {
    fn from(e: serde_json::Error) -> Self {
        SynthesisError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for SynthesisError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        SynthesisError::Serialization(e.to_string())
    }
}

impl From<ciborium::de::Error<std::io::Error>> for SynthesisError {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        SynthesisError::Serialization(e.to_string())
    }
}

impl From<derive_builder::UninitializedFieldError> for SynthesisError {
    fn from(e: derive_builder::UninitializedFieldError) -> Self {
        SynthesisError::MalformedModel(format!(
            "configuration field '{}' has no value",
            e.field_name()
        ))
    }
}
