//! Evaluator-optimizer refinement.
//!
//! An optimizer drafts an answer, an evaluator scores it against a set of
//! criteria, and the optimizer tries again with that feedback until the
//! evaluator accepts a draft or the iteration budget runs out.

use crate::agent::Context;
use crate::agent::parse::extract_json_values;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEGRADED_PREVIEW_CHARS: usize = 200;

pub const DEFAULT_OPTIMIZER_PROMPT: &str = "You produce high-quality responses to user requests. \
If you are given feedback on a previous response, use it to write an improved response. \
Reply with the response only.";

pub const DEFAULT_EVALUATOR_PROMPT: &str = "You critically assess how well a response \
answers a request. Be honest and specific about what should be improved.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineConfig {
    pub max_iterations: usize,
    /// Minimum score, in [0, 1], at which a candidate is accepted.
    pub threshold: f64,
    pub criteria: Vec<String>,
    pub optimizer_prompt: String,
    pub evaluator_prompt: String,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            threshold: 0.8,
            criteria: vec![],
            optimizer_prompt: DEFAULT_OPTIMIZER_PROMPT.to_string(),
            evaluator_prompt: DEFAULT_EVALUATOR_PROMPT.to_string(),
        }
    }
}

impl RefineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations < 1 {
            return Err(Error::InvalidConfig(
                "max_iterations must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(Error::InvalidConfig(format!(
                "threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        Ok(())
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_criteria(mut self, criteria: Vec<String>) -> Self {
        self.criteria = criteria;
        self
    }

    /// Evaluator system prompt: the base prompt, the criteria, and the reply
    /// format the score is parsed from.
    pub fn evaluator_system_prompt(&self) -> String {
        let mut prompt = self.evaluator_prompt.clone();

        if !self.criteria.is_empty() {
            prompt.push_str("\n\nEvaluate the response against these criteria:\n");
            for (i, criterion) in self.criteria.iter().enumerate() {
                prompt.push_str(&format!("{}. {}\n", i + 1, criterion));
            }
        }

        prompt.push_str(&format!(
            "\n\nReply with a single JSON object and nothing else:\n\
             {{\"score\": <number between 0 and 1>, \"accept\": <true|false>, \
             \"feedback\": \"<what to improve>\"}}\n\
             Set \"accept\" to true only when the response needs no further work (score >= {}).",
            self.threshold
        ));
        prompt
    }
}

/// Evaluator verdict on one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub score: f64,
    #[serde(default)]
    pub accept: bool,
    #[serde(default)]
    pub feedback: String,
    /// Set when the evaluator's reply could not be read and this verdict is
    /// a zero-score stand-in.
    #[serde(default)]
    pub degraded: bool,
}

impl Evaluation {
    pub fn new(score: f64, accept: bool, feedback: impl Into<String>) -> Self {
        Self {
            score,
            accept,
            feedback: feedback.into(),
            degraded: false,
        }
    }

    /// Zero-score verdict used when the evaluator reply is unusable.
    pub fn degraded(reason: &str) -> Self {
        Self {
            score: 0.0,
            accept: false,
            feedback: format!(
                "The evaluation of this response could not be read ({reason}). \
                 Review the response against the request and improve it."
            ),
            degraded: true,
        }
    }

    /// Reads the first JSON object in `text` that carries a numeric `score`.
    ///
    /// Scores in (1, 10] are taken as a ten-point scale. `accept` defaults to
    /// false and `feedback` may also be named `reasoning`.
    pub fn parse(text: &str) -> Result<Self> {
        let value = extract_json_values(text)
            .into_iter()
            .find(|v| v.get("score").is_some_and(|s| s.is_number()))
            .ok_or_else(|| {
                Error::MalformedEvaluation(format!(
                    "no JSON object with a numeric score in: {}",
                    preview(text)
                ))
            })?;

        let raw = value["score"].as_f64().unwrap_or(f64::NAN);
        let score = match raw {
            s if (0.0..=1.0).contains(&s) => s,
            s if s > 1.0 && s <= 10.0 => s / 10.0,
            s => {
                return Err(Error::MalformedEvaluation(format!(
                    "score {s} is out of range"
                )));
            }
        };

        let accept = value
            .get("accept")
            .or_else(|| value.get("passes"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let feedback = value
            .get("feedback")
            .or_else(|| value.get("reasoning"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(Self::new(score, accept, feedback))
    }
}

fn preview(text: &str) -> String {
    let head: String = text.chars().take(DEGRADED_PREVIEW_CHARS).collect();
    if head.len() < text.len() {
        format!("{head}...")
    } else {
        head
    }
}

/// One generate + evaluate pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub iteration: usize,
    pub candidate: String,
    pub evaluation: Evaluation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Accepted,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refinement {
    pub final_output: String,
    pub final_score: f64,
    pub iterations: usize,
    pub accepted: bool,
    pub termination: Termination,
    pub history: Vec<Attempt>,
}

/// Produces a candidate for `input`, improving on `previous` when given.
#[async_trait]
pub trait Optimizer: Send + Sync {
    async fn optimize(&self, input: &str, previous: Option<&Attempt>) -> Result<String>;
}

/// Scores a candidate. Return `Error::MalformedEvaluation` for replies that
/// carry no usable score; the loop substitutes a degraded verdict.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, input: &str, candidate: &str) -> Result<Evaluation>;
}

#[async_trait]
impl<F> Optimizer for F
where
    F: Fn(&str, Option<&Attempt>) -> Result<String> + Send + Sync,
{
    async fn optimize(&self, input: &str, previous: Option<&Attempt>) -> Result<String> {
        self(input, previous)
    }
}

#[async_trait]
impl<F> Evaluator for F
where
    F: Fn(&str, &str) -> Result<Evaluation> + Send + Sync,
{
    async fn evaluate(&self, input: &str, candidate: &str) -> Result<Evaluation> {
        self(input, candidate)
    }
}

/// Drafts candidates with a single chat turn on a fresh fork of `context`.
pub struct ModelOptimizer {
    context: Context,
}

impl ModelOptimizer {
    pub fn new(context: &Context, system_prompt: impl Into<String>) -> Self {
        let mut context = context.fork();
        context.set_system_prompt(system_prompt);
        Self { context }
    }

    fn prompt(input: &str, previous: Option<&Attempt>) -> String {
        match previous {
            None => input.to_string(),
            Some(attempt) => format!(
                "Request:\n{}\n\nPrevious response:\n{}\n\nFeedback (score {:.2}):\n{}\n\n\
                 Write an improved response to the request.",
                input, attempt.candidate, attempt.evaluation.score, attempt.evaluation.feedback
            ),
        }
    }
}

#[async_trait]
impl Optimizer for ModelOptimizer {
    async fn optimize(&self, input: &str, previous: Option<&Attempt>) -> Result<String> {
        let mut context = self.context.fork();
        let response = context.chat(&Self::prompt(input, previous), &[]).await?;
        Ok(response.text.unwrap_or_default())
    }
}

/// Scores candidates with a single chat turn and parses the JSON verdict.
pub struct ModelEvaluator {
    context: Context,
}

impl ModelEvaluator {
    pub fn new(context: &Context, system_prompt: impl Into<String>) -> Self {
        let mut context = context.fork();
        context.set_system_prompt(system_prompt);
        Self { context }
    }
}

#[async_trait]
impl Evaluator for ModelEvaluator {
    async fn evaluate(&self, input: &str, candidate: &str) -> Result<Evaluation> {
        let mut context = self.context.fork();
        let prompt = format!("Request:\n{input}\n\nResponse to evaluate:\n{candidate}");
        let response = context.chat(&prompt, &[]).await?;
        Evaluation::parse(response.text_or_empty())
    }
}

pub struct EvaluatorOptimizer {
    optimizer: Arc<dyn Optimizer>,
    evaluator: Arc<dyn Evaluator>,
    config: RefineConfig,
}

impl EvaluatorOptimizer {
    pub fn new(
        optimizer: Arc<dyn Optimizer>,
        evaluator: Arc<dyn Evaluator>,
        config: RefineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            optimizer,
            evaluator,
            config,
        })
    }

    /// Both roles driven by the model behind `context`.
    pub fn from_context(context: &Context, config: RefineConfig) -> Result<Self> {
        Self::with_contexts(context, context, config)
    }

    /// Optimizer and evaluator on separate contexts, e.g. different models.
    pub fn with_contexts(
        optimizer: &Context,
        evaluator: &Context,
        config: RefineConfig,
    ) -> Result<Self> {
        let optimizer = Arc::new(ModelOptimizer::new(optimizer, config.optimizer_prompt.clone()));
        let evaluator = Arc::new(ModelEvaluator::new(
            evaluator,
            config.evaluator_system_prompt(),
        ));
        Self::new(optimizer, evaluator, config)
    }

    pub fn with_optimizer(mut self, optimizer: Arc<dyn Optimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn config(&self) -> &RefineConfig {
        &self.config
    }

    pub async fn run(&self, input: &str) -> Result<Refinement> {
        let mut history: Vec<Attempt> = Vec::with_capacity(self.config.max_iterations);

        for iteration in 1..=self.config.max_iterations {
            let candidate = self.optimizer.optimize(input, history.last()).await?;

            let evaluation = match self.evaluator.evaluate(input, &candidate).await {
                Ok(evaluation) => evaluation,
                Err(Error::MalformedEvaluation(reason)) => {
                    warn!(iteration, %reason, "Evaluator reply unusable, scoring 0");
                    Evaluation::degraded(&reason)
                }
                Err(e) => return Err(e),
            };

            debug!(
                iteration,
                score = evaluation.score,
                accept = evaluation.accept,
                "Candidate evaluated"
            );

            let accepted = evaluation.accept || evaluation.score >= self.config.threshold;
            history.push(Attempt {
                iteration,
                candidate,
                evaluation,
            });

            if accepted {
                return Ok(self.finish(history, Termination::Accepted));
            }
        }

        Ok(self.finish(history, Termination::Exhausted))
    }

    fn finish(&self, history: Vec<Attempt>, termination: Termination) -> Refinement {
        let chosen = match termination {
            Termination::Accepted => history.last(),
            // Highest score; later attempts win ties.
            Termination::Exhausted => history
                .iter()
                .max_by(|a, b| a.evaluation.score.total_cmp(&b.evaluation.score)),
        };
        let (final_output, final_score) = chosen
            .map(|a| (a.candidate.clone(), a.evaluation.score))
            .unwrap_or_default();

        info!(
            iterations = history.len(),
            ?termination,
            score = final_score,
            "Refinement finished"
        );

        Refinement {
            final_output,
            final_score,
            iterations: history.len(),
            accepted: termination == Termination::Accepted,
            termination,
            history,
        }
    }
}
