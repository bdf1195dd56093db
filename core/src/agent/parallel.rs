//! Parallelization.
//!
//! Independent model calls over the same input run concurrently, each on
//! its own fork of the context. Sectioning joins the outputs of distinct
//! subtasks; voting asks the same question several times and keeps the
//! answer most replies agree on.

use crate::agent::Context;
use crate::error::{Error, Result};
use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_VOTING_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Sectioning,
    Voting,
}

pub type TaskPrompt = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// One concurrent call. An empty system prompt keeps the context's own.
#[derive(Clone)]
pub struct ParallelTask {
    pub name: String,
    pub system_prompt: String,
    prompt: Option<TaskPrompt>,
}

impl ParallelTask {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            prompt: None,
        }
    }

    /// Builds the user message from the input instead of sending it as is.
    pub fn with_prompt(
        mut self,
        prompt: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.prompt = Some(Arc::new(prompt));
        self
    }

    pub fn prompt_for(&self, input: &str) -> String {
        match &self.prompt {
            Some(prompt) => prompt(input),
            None => input.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub name: String,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelOutput {
    pub answer: String,
    /// Task outputs in task order.
    pub outputs: Vec<TaskOutput>,
    /// Share of votes behind `answer`. Only set for voting.
    pub agreement: Option<f64>,
    pub consensus: bool,
}

pub struct Parallel {
    context: Context,
    strategy: Strategy,
    tasks: Vec<ParallelTask>,
    voting_threshold: f64,
}

impl Parallel {
    pub fn new(context: &Context, strategy: Strategy) -> Self {
        Self {
            context: context.fork(),
            strategy,
            tasks: vec![],
            voting_threshold: DEFAULT_VOTING_THRESHOLD,
        }
    }

    pub fn with_task(mut self, task: ParallelTask) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn add_task(&mut self, task: ParallelTask) {
        self.tasks.push(task);
    }

    /// Adds `count` copies of `task`, named `<name>-1` and up.
    pub fn with_voters(mut self, task: ParallelTask, count: usize) -> Self {
        for i in 1..=count {
            let mut voter = task.clone();
            voter.name = format!("{}-{i}", task.name);
            self.tasks.push(voter);
        }
        self
    }

    /// Least share of votes the winning answer needs for consensus.
    pub fn with_voting_threshold(mut self, threshold: f64) -> Self {
        self.voting_threshold = threshold;
        self
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn tasks(&self) -> &[ParallelTask] {
        &self.tasks
    }

    /// Runs all tasks at once. The first failing task fails the run.
    pub async fn run(&self, input: &str) -> Result<ParallelOutput> {
        if self.tasks.is_empty() {
            return Err(Error::InvalidConfig("parallel run has no tasks".into()));
        }
        if !(self.voting_threshold > 0.0 && self.voting_threshold <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "voting threshold must be in (0, 1], got {}",
                self.voting_threshold
            )));
        }

        let calls = self.tasks.iter().map(|task| async move {
            let mut context = self.context.fork();
            if !task.system_prompt.is_empty() {
                context.set_system_prompt(task.system_prompt.clone());
            }
            let response = context.chat(&task.prompt_for(input), &[]).await?;
            debug!(task = %task.name, "Parallel task finished");
            Ok::<_, Error>(TaskOutput {
                name: task.name.clone(),
                output: response.text.unwrap_or_default(),
            })
        });
        let outputs = try_join_all(calls).await?;

        let result = match self.strategy {
            Strategy::Sectioning => ParallelOutput {
                answer: sections(&outputs),
                outputs,
                agreement: None,
                consensus: true,
            },
            Strategy::Voting => {
                let (answer, agreement) = majority(&outputs);
                let consensus = agreement >= self.voting_threshold;
                if !consensus {
                    warn!(agreement, threshold = self.voting_threshold, "No voting consensus");
                }
                ParallelOutput {
                    answer,
                    outputs,
                    agreement: Some(agreement),
                    consensus,
                }
            }
        };
        info!(tasks = result.outputs.len(), strategy = ?self.strategy, "Parallel run finished");
        Ok(result)
    }
}

fn sections(outputs: &[TaskOutput]) -> String {
    outputs
        .iter()
        .map(|o| format!("## {}\n\n{}", o.name, o.output.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Votes compare case-folded text with whitespace collapsed. Ties go to the
/// answer seen first.
fn majority(outputs: &[TaskOutput]) -> (String, f64) {
    let mut tally: Vec<(String, &str, usize)> = vec![];
    for output in outputs {
        let key = output
            .output
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        match tally.iter_mut().find(|(k, _, _)| *k == key) {
            Some((_, _, votes)) => *votes += 1,
            None => tally.push((key, output.output.trim(), 1)),
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for (_, answer, votes) in &tally {
        if best.is_none_or(|(_, top)| *votes > top) {
            best = Some((*answer, *votes));
        }
    }
    match best {
        Some((answer, votes)) => (answer.to_string(), votes as f64 / outputs.len() as f64),
        None => (String::new(), 0.0),
    }
}
