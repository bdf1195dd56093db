//! Error kinds surfaced by the orchestration core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The model (or a remote tool) could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// The model API answered with a structured failure.
    #[error("provider error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Provider {
        status: Option<u16>,
        message: String,
    },

    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("tool-calling loop exceeded {turns} turns without a final answer")]
    LoopExceeded { turns: usize },

    /// Evaluator output that carries no usable score. The refinement loop
    /// recovers from this one; it never escapes `EvaluatorOptimizer::run`.
    #[error("malformed evaluation: {0}")]
    MalformedEvaluation(String),

    /// A prompt-chain step produced output its validator refused.
    #[error("chain step '{step}' output was rejected")]
    StepRejected { step: String },

    /// The router picked a route that does not exist and no default is set.
    #[error("no route named '{0}'")]
    UnknownRoute(String),

    #[error("invalid media reference: {0}")]
    InvalidMedia(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn provider(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Provider {
            status,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::provider(e.status().map(|s| s.as_u16()), e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}
