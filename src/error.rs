use crate::types::OpId;
use thiserror::Error;

/// Everything that can go wrong while assembling the model.
///
/// Construction is all-or-nothing: any of these aborts the build, since a
/// partially constrained model would solve to a wrong answer. Infeasibility
/// is not represented here — it is a legitimate solver outcome reported
/// through [`crate::SolveStatus`].
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("operation {op} has no eligible workers")]
    NoEligibleWorkers { op: OpId },

    #[error("operation {op} has no eligible stations")]
    NoEligibleStations { op: OpId },

    #[error("worker {worker} has no eligible stations")]
    WorkerWithoutStations { worker: String },

    #[error("worker {worker} has no eligible operations")]
    WorkerWithoutOperations { worker: String },

    #[error("station {station} has no eligible machines")]
    StationWithoutMachines { station: String },

    #[error("station {station} has no line index")]
    MissingStationIndex { station: String },

    #[error("operation {op} does not belong to any part")]
    OperationWithoutPart { op: OpId },

    #[error("precedence edge references unknown part {part}")]
    UnknownPart { part: String },

    #[error("precedence graph has no sink part (cycle between parts)")]
    CyclicPrecedence,

    #[error("fixed assignment references unknown {what} {id}")]
    UnknownFixedReference { what: &'static str, id: String },

    #[error("no processing time for operation {op} and worker {worker}")]
    MissingProcessingTime { op: String, worker: String },

    #[error("{what} must be finite and positive, got {value}")]
    InvalidBound { what: &'static str, value: f64 },

    #[error("objective terms must be built before solving")]
    ObjectiveNotBuilt,
}
