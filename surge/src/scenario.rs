//! Scenario definitions and their compilation into an action arena.
use crate::action::{
    Action, ActionError, ActionId, Conditional, Exec, Pause, Predicate, RequestAction,
};
use crate::session::Session;
use std::sync::Arc;
use std::time::Duration;
use surge_core::ValidationError;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

const EXIT: ActionId = 0;

/// A compiled, immutable action chain shared by every user of a scenario.
#[derive(Debug)]
pub struct Scenario {
    name: Arc<str>,
    actions: Vec<Action>,
    entry: ActionId,
    abort_on_failure: Option<bool>,
}

impl Scenario {
    pub fn builder(name: impl Into<String>) -> ScenarioBuilder {
        ScenarioBuilder {
            name: name.into(),
            abort_on_failure: None,
        }
    }

    pub fn new(name: impl Into<String>, chain: Chain) -> Result<Self, ValidationError> {
        Self::builder(name).build(chain)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        self.name.clone()
    }

    pub fn entry(&self) -> ActionId {
        self.entry
    }

    pub fn action(&self, id: ActionId) -> &Action {
        // NOTE: Ids are only ever produced by the compiler below, so they are in range.
        &self.actions[id]
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entry == EXIT
    }

    /// Scenario level override of the run wide abort policy.
    pub fn abort_on_failure(&self) -> Option<bool> {
        self.abort_on_failure
    }
}

pub struct ScenarioBuilder {
    name: String,
    abort_on_failure: Option<bool>,
}

impl ScenarioBuilder {
    pub fn abort_on_failure(mut self, abort: bool) -> Self {
        self.abort_on_failure = Some(abort);
        self
    }

    pub fn build(self, chain: Chain) -> Result<Scenario, ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyScenarioName);
        }

        let mut actions = vec![Action::Exit];
        let entry = compile(chain.steps, EXIT, &mut actions);
        debug!(
            "Compiled scenario {} into {} actions",
            self.name,
            actions.len()
        );

        Ok(Scenario {
            name: Arc::from(self.name),
            actions,
            entry,
            abort_on_failure: self.abort_on_failure,
        })
    }
}

enum Step {
    Request(RequestAction),
    Pause(Pause),
    Exec(Exec),
    Branch {
        branches: Vec<(Predicate, Vec<Step>)>,
        otherwise: Vec<Step>,
    },
    Exit,
}

/// An ordered list of steps. Branch bodies are chains themselves.
#[derive(Default)]
pub struct Chain {
    steps: Vec<Step>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(mut self, request: RequestAction) -> Self {
        self.steps.push(Step::Request(request));
        self
    }

    pub fn pause(mut self, dur: Duration) -> Self {
        self.steps.push(Step::Pause(Pause::Fixed(dur)));
        self
    }

    pub fn pause_between(mut self, min: Duration, max: Duration) -> Self {
        self.steps.push(Step::Pause(Pause::Uniform { min, max }));
        self
    }

    pub fn exec<F>(mut self, func: F) -> Self
    where
        F: Fn(&Session) -> Result<Session, ActionError> + Send + Sync + 'static,
    {
        self.steps.push(Step::Exec(Exec::new(func)));
        self
    }

    pub fn do_if(self, predicate: Predicate, then: Chain) -> Self {
        self.do_if_or_else(predicate, then, Chain::new())
    }

    pub fn do_if_or_else(mut self, predicate: Predicate, then: Chain, otherwise: Chain) -> Self {
        self.steps.push(Step::Branch {
            branches: vec![(predicate, then.steps)],
            otherwise: otherwise.steps,
        });
        self
    }

    /// Runs the first chain whose predicate holds, else `otherwise`.
    pub fn switch(mut self, branches: Vec<(Predicate, Chain)>, otherwise: Chain) -> Self {
        self.steps.push(Step::Branch {
            branches: branches
                .into_iter()
                .map(|(predicate, chain)| (predicate, chain.steps))
                .collect(),
            otherwise: otherwise.steps,
        });
        self
    }

    pub fn exit_here(mut self) -> Self {
        self.steps.push(Step::Exit);
        self
    }

    pub fn exit_here_if(self, predicate: Predicate) -> Self {
        self.do_if(predicate, Chain::new().exit_here())
    }

    pub fn exit_here_if_failed(self) -> Self {
        self.exit_here_if(Predicate::is_failed())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Compiles back to front so every `next` already exists when referenced.
fn compile(steps: Vec<Step>, mut next: ActionId, actions: &mut Vec<Action>) -> ActionId {
    for step in steps.into_iter().rev() {
        next = match step {
            Step::Request(request) => push(actions, Action::Request { request, next }),
            Step::Pause(pause) => push(actions, Action::Pause { pause, next }),
            Step::Exec(exec) => push(actions, Action::Exec { exec, next }),
            Step::Branch {
                branches,
                otherwise,
            } => {
                let otherwise = compile(otherwise, next, actions);
                let branches = branches
                    .into_iter()
                    .map(|(predicate, steps)| (predicate, compile(steps, next, actions)))
                    .collect();
                push(
                    actions,
                    Action::Conditional(Conditional {
                        branches,
                        otherwise,
                    }),
                )
            }
            Step::Exit => EXIT,
        };
    }
    next
}

fn push(actions: &mut Vec<Action>, action: Action) -> ActionId {
    actions.push(action);
    actions.len() - 1
}
