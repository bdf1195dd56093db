//! Prompt chaining.
//!
//! A task is split into ordered steps. Each step is one model call whose
//! prompt is rendered from the original input and the previous step's
//! output, with an optional gate and rewrite between steps.

use crate::agent::Context;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub type StepValidator = Arc<dyn Fn(&str) -> bool + Send + Sync>;
pub type StepTransform = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// One link of a [`PromptChain`].
///
/// `{input}` in the template is replaced by the chain input and `{context}`
/// by the previous step's output (the input itself for the first step). A
/// template using neither placeholder gets the previous output appended.
#[derive(Clone)]
pub struct ChainStep {
    pub name: String,
    pub prompt_template: String,
    pub use_tools: bool,
    validator: Option<StepValidator>,
    transform: Option<StepTransform>,
}

impl ChainStep {
    pub fn new(name: impl Into<String>, prompt_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt_template: prompt_template.into(),
            use_tools: false,
            validator: None,
            transform: None,
        }
    }

    /// Stops the chain with `Error::StepRejected` when `validator` returns
    /// false for this step's reply.
    pub fn with_validator(
        mut self,
        validator: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Rewrites this step's reply before it is handed to the next step.
    pub fn with_transform(
        mut self,
        transform: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Run this step through the tool loop instead of a plain chat.
    pub fn with_tools(mut self, use_tools: bool) -> Self {
        self.use_tools = use_tools;
        self
    }

    pub fn render(&self, input: &str, previous: &str) -> String {
        let template = &self.prompt_template;
        if !template.contains("{input}") && !template.contains("{context}") {
            return format!("{template}\n\n{previous}");
        }
        template
            .replace("{input}", input)
            .replace("{context}", previous)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    pub name: String,
    pub prompt: String,
    pub response: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainOutput {
    /// Last step's reply, after its transform.
    pub final_output: String,
    pub steps: Vec<StepOutput>,
}

pub struct PromptChain {
    context: Context,
    steps: Vec<ChainStep>,
}

impl PromptChain {
    pub fn new(context: &Context) -> Self {
        Self {
            context: context.fork(),
            steps: vec![],
        }
    }

    pub fn with_step(mut self, step: ChainStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn add_step(&mut self, step: ChainStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[ChainStep] {
        &self.steps
    }

    /// Runs every step in order on a fresh fork of the context. Provider
    /// errors and rejected steps end the chain.
    pub async fn run(&self, input: &str) -> Result<ChainOutput> {
        if self.steps.is_empty() {
            return Err(Error::InvalidConfig("prompt chain has no steps".into()));
        }

        let mut previous = input.to_string();
        let mut outputs = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            let prompt = step.render(input, &previous);
            let mut context = self.context.fork();
            let reply = if step.use_tools {
                context.chat_with_tools(&prompt, &[]).await?
            } else {
                context.chat(&prompt, &[]).await?
            };
            let response = reply.text.unwrap_or_default();
            debug!(step = %step.name, chars = response.len(), "Chain step finished");

            if let Some(validator) = &step.validator
                && !validator(&response)
            {
                warn!(step = %step.name, "Chain step output rejected");
                return Err(Error::StepRejected {
                    step: step.name.clone(),
                });
            }

            previous = match &step.transform {
                Some(transform) => transform(&response),
                None => response.clone(),
            };
            outputs.push(StepOutput {
                name: step.name.clone(),
                prompt,
                response,
            });
        }

        info!(steps = outputs.len(), "Prompt chain finished");
        Ok(ChainOutput {
            final_output: previous,
            steps: outputs,
        })
    }
}
