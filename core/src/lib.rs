pub mod agent;
pub mod config;
pub mod error;
pub mod media;
pub mod providers;
pub mod tools;
pub mod traits;

pub use agent::{
    Attempt, ChainStep, Context, Evaluation, Evaluator, EvaluatorOptimizer, ModelEvaluator,
    ModelOptimizer, ModelRoute, Optimizer, Parallel, ParallelTask, PromptChain, RefineConfig,
    Refinement, RouteHandler, Router, Strategy, Termination, ToolRegistry,
};
pub use config::Config;
pub use error::{Error, Result};
pub use media::{ContentPart, Location, MediaKind, MediaMeta, MediaSource};
pub use providers::{OpenAIProvider, create_provider};
pub use tools::{RespondTool, ShellTool};
pub use traits::*;
