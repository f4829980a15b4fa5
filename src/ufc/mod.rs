//! Universal Flag Configuration: wire model and the evaluation of flags against it.
mod assignment;
mod eval;
mod models;
mod rules;

pub use assignment::AssignmentValue;
pub use eval::EvaluationResult;
pub use models::*;
