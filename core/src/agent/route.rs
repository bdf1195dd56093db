//! Routing.
//!
//! A router model classifies each input into one of the registered routes
//! and the input is handed to that route's handler. Inputs the router
//! cannot place go to the default handler when one is set.

use crate::agent::Context;
use crate::agent::parse::extract_json_values;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_ROUTER_PROMPT: &str =
    "You are a router. Pick the single route that best fits the user's request.";

/// The router's verdict for one input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub route: String,
    #[serde(default)]
    pub reasoning: String,
}

/// Handles the inputs classified into one route.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(&self, input: &str, decision: &RouteDecision) -> Result<String>;
}

#[async_trait]
impl<F> RouteHandler for F
where
    F: Fn(&str, &RouteDecision) -> Result<String> + Send + Sync,
{
    async fn handle(&self, input: &str, decision: &RouteDecision) -> Result<String> {
        self(input, decision)
    }
}

/// Answers with a single chat turn under its own system prompt.
pub struct ModelRoute {
    context: Context,
}

impl ModelRoute {
    pub fn new(context: &Context, system_prompt: impl Into<String>) -> Self {
        let mut context = context.fork();
        context.set_system_prompt(system_prompt);
        Self { context }
    }
}

#[async_trait]
impl RouteHandler for ModelRoute {
    async fn handle(&self, input: &str, _decision: &RouteDecision) -> Result<String> {
        let mut context = self.context.fork();
        let response = context.chat(input, &[]).await?;
        Ok(response.text.unwrap_or_default())
    }
}

pub struct Route {
    pub name: String,
    pub description: String,
    handler: Arc<dyn RouteHandler>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Routed {
    /// Name of the route that handled the input, `None` for the default.
    pub route: Option<String>,
    pub decision: RouteDecision,
    pub output: String,
}

pub struct Router {
    context: Context,
    router_prompt: String,
    routes: Vec<Route>,
    default: Option<Arc<dyn RouteHandler>>,
}

impl Router {
    pub fn new(context: &Context) -> Self {
        Self {
            context: context.fork(),
            router_prompt: DEFAULT_ROUTER_PROMPT.to_string(),
            routes: vec![],
            default: None,
        }
    }

    pub fn with_router_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.router_prompt = prompt.into();
        self
    }

    /// Route names are unique, compared without case.
    pub fn add_route(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        handler: Arc<dyn RouteHandler>,
    ) -> Result<()> {
        let name = name.into();
        if self.find(&name).is_some() {
            return Err(Error::InvalidConfig(format!("duplicate route '{name}'")));
        }
        self.routes.push(Route {
            name,
            description: description.into(),
            handler,
        });
        Ok(())
    }

    pub fn with_route(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        handler: Arc<dyn RouteHandler>,
    ) -> Result<Self> {
        self.add_route(name, description, handler)?;
        Ok(self)
    }

    pub fn with_default(mut self, handler: Arc<dyn RouteHandler>) -> Self {
        self.default = Some(handler);
        self
    }

    pub fn route_names(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.name.as_str()).collect()
    }

    fn find(&self, name: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.name.eq_ignore_ascii_case(name))
    }

    pub fn system_prompt(&self) -> String {
        let mut prompt = self.router_prompt.clone();
        prompt.push_str("\n\nRoutes:\n");
        for route in &self.routes {
            prompt.push_str(&format!("- {}: {}\n", route.name, route.description));
        }
        prompt.push_str(
            "\nRespond with JSON only, in the form \
             {\"route\": \"<route name>\", \"reasoning\": \"<one sentence>\"}.",
        );
        prompt
    }

    /// Asks the router model which route fits `input`. The decision is not
    /// checked against the registered routes.
    pub async fn classify(&self, input: &str) -> Result<RouteDecision> {
        let mut context = self.context.fork();
        context.set_system_prompt(self.system_prompt());
        let response = context.chat(input, &[]).await?;
        let decision = parse_decision(response.text_or_empty());
        debug!(route = %decision.route, "Router decision");
        Ok(decision)
    }

    pub async fn run(&self, input: &str) -> Result<Routed> {
        if self.routes.is_empty() && self.default.is_none() {
            return Err(Error::InvalidConfig("router has no routes".into()));
        }

        let decision = self.classify(input).await?;
        let (route, handler) = match self.find(&decision.route) {
            Some(route) => (Some(route.name.clone()), &route.handler),
            None => match &self.default {
                Some(handler) => {
                    warn!(route = %decision.route, "Unknown route, using default handler");
                    (None, handler)
                }
                None => return Err(Error::UnknownRoute(decision.route)),
            },
        };

        let output = handler.handle(input, &decision).await?;
        info!(route = route.as_deref().unwrap_or("default"), "Input routed");
        Ok(Routed {
            route,
            decision,
            output,
        })
    }
}

/// Reads `{"route": ..}` from the reply, or takes a bare route name.
fn parse_decision(text: &str) -> RouteDecision {
    for value in extract_json_values(text) {
        if let Some(route) = value.get("route").and_then(|r| r.as_str()) {
            let reasoning = value
                .get("reasoning")
                .or_else(|| value.get("reason"))
                .and_then(|r| r.as_str())
                .unwrap_or_default();
            return RouteDecision {
                route: route.trim().to_string(),
                reasoning: reasoning.to_string(),
            };
        }
    }
    RouteDecision {
        route: text.trim().trim_matches(|c: char| c == '"' || c == '`').trim().to_string(),
        reasoning: String::new(),
    }
}
