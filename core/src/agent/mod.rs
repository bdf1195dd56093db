pub mod chain;
pub mod context;
pub mod parallel;
pub mod parse;
pub mod refine;
pub mod registry;
pub mod route;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use chain::{ChainOutput, ChainStep, PromptChain, StepOutput};
pub use context::{Context, DEFAULT_MAX_TOOL_TURNS};
pub use parallel::{Parallel, ParallelOutput, ParallelTask, Strategy, TaskOutput};
pub use refine::{
    Attempt, Evaluation, Evaluator, EvaluatorOptimizer, ModelEvaluator, ModelOptimizer,
    Optimizer, RefineConfig, Refinement, Termination,
};
pub use registry::ToolRegistry;
pub use route::{ModelRoute, Route, RouteDecision, RouteHandler, Routed, Router};
