//! Policy evaluation for Warden governance decisions.
//!
//! Turns a detected prompt into a reproducible [`Decision`](warden_types::Decision)
//! by walking an ordered rule list (first match wins), applying safe
//! defaults, gating on autonomy mode, and scoring risk.

pub mod builtin;
pub mod evaluator;
pub mod risk;

pub use evaluator::{evaluate, Explanation, PolicyEvaluator, PromptContext};
pub use risk::RiskClassifier;
