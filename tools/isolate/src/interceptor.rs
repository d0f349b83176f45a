//! The assertion capability handed to code under test.
//!
//! An `AssertionContext` either runs assertions for real against a reporter
//! (parent mode) or records them for later replay (child mode). Code calling
//! through it cannot tell the difference except for the `Deferred` verdict.

use crate::assertions::LIBRARY_CONTEXT;
use crate::errors::IsolateError;
use crate::registry::OverrideRegistry;
use crate::reporter::TestReporter;
use crate::types::{CallSite, CapturedCall, ExecutionMode, Target, Verdict, DEFAULT_CALLER};
use serde::Serialize;
use serde_json::Value;
use std::panic::Location;

enum Dispatch<'r> {
    Live(&'r mut dyn TestReporter),
    Capture(Vec<CapturedCall>),
}

pub struct AssertionContext<'r> {
    registry: &'r OverrideRegistry,
    caller: String,
    dispatch: Dispatch<'r>,
}

impl<'r> AssertionContext<'r> {
    pub fn live(registry: &'r OverrideRegistry, reporter: &'r mut dyn TestReporter) -> Self {
        Self {
            registry,
            caller: DEFAULT_CALLER.to_string(),
            dispatch: Dispatch::Live(reporter),
        }
    }

    pub fn capturing(registry: &'r OverrideRegistry) -> Self {
        Self {
            registry,
            caller: DEFAULT_CALLER.to_string(),
            dispatch: Dispatch::Capture(Vec::new()),
        }
    }

    /// Names the calling context; typed helpers resolve through it first.
    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = caller.into();
        self
    }

    pub fn set_caller(&mut self, caller: impl Into<String>) {
        self.caller = caller.into();
    }

    pub fn caller(&self) -> &str {
        &self.caller
    }

    pub fn mode(&self) -> ExecutionMode {
        match self.dispatch {
            Dispatch::Live(_) => ExecutionMode::Parent,
            Dispatch::Capture(_) => ExecutionMode::Child,
        }
    }

    pub fn pending(&self) -> &[CapturedCall] {
        match &self.dispatch {
            Dispatch::Live(_) => &[],
            Dispatch::Capture(pending) => pending,
        }
    }

    pub fn take_pending(&mut self) -> Vec<CapturedCall> {
        match &mut self.dispatch {
            Dispatch::Live(_) => Vec::new(),
            Dispatch::Capture(pending) => std::mem::take(pending),
        }
    }

    /// Calls `context::name` with `args`, attributing it to the caller's location.
    #[track_caller]
    pub fn invoke(
        &mut self,
        context: &str,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Verdict, IsolateError> {
        let site = CallSite::from_location(&self.caller, Location::caller());
        self.invoke_at(Target::new(context, name), site, args)
    }

    pub fn invoke_at(
        &mut self,
        target: Target,
        site: CallSite,
        args: Vec<Value>,
    ) -> Result<Verdict, IsolateError> {
        let intercepted = self.registry.original(&target).cloned();
        match (&mut self.dispatch, intercepted) {
            (Dispatch::Capture(pending), Some(_)) => {
                pending.push(CapturedCall::new(target, site, args));
                Ok(Verdict::Deferred)
            }
            (Dispatch::Capture(_), None) => {
                if self.registry.namespaces().lookup(&target).is_some() {
                    Err(IsolateError::NotIntercepted(target.to_string()))
                } else {
                    Err(IsolateError::UnknownFunction(target.to_string()))
                }
            }
            (Dispatch::Live(reporter), Some(original)) => {
                original(&mut **reporter, &site, &args).map(Verdict::from)
            }
            (Dispatch::Live(reporter), None) => {
                let function = self
                    .registry
                    .namespaces()
                    .lookup(&target)
                    .cloned()
                    .ok_or_else(|| IsolateError::UnknownFunction(target.to_string()))?;
                function(&mut **reporter, &site, &args).map(Verdict::from)
            }
        }
    }

    #[track_caller]
    pub fn ok(&mut self, cond: bool, name: &str) -> Result<Verdict, IsolateError> {
        let location = Location::caller();
        self.helper(location, "ok", vec![Value::Bool(cond), name.into()])
    }

    #[track_caller]
    pub fn is<G: Serialize, E: Serialize>(
        &mut self,
        got: G,
        expected: E,
        name: &str,
    ) -> Result<Verdict, IsolateError> {
        let location = Location::caller();
        let args = vec![plain(&got)?, plain(&expected)?, name.into()];
        self.helper(location, "is", args)
    }

    #[track_caller]
    pub fn isnt<G: Serialize, E: Serialize>(
        &mut self,
        got: G,
        unexpected: E,
        name: &str,
    ) -> Result<Verdict, IsolateError> {
        let location = Location::caller();
        let args = vec![plain(&got)?, plain(&unexpected)?, name.into()];
        self.helper(location, "isnt", args)
    }

    #[track_caller]
    pub fn is_deeply<G: Serialize, E: Serialize>(
        &mut self,
        got: G,
        expected: E,
        name: &str,
    ) -> Result<Verdict, IsolateError> {
        let location = Location::caller();
        let args = vec![plain(&got)?, plain(&expected)?, name.into()];
        self.helper(location, "is_deeply", args)
    }

    #[track_caller]
    pub fn cmp_ok<G: Serialize, E: Serialize>(
        &mut self,
        got: G,
        op: &str,
        expected: E,
        name: &str,
    ) -> Result<Verdict, IsolateError> {
        let location = Location::caller();
        let args = vec![plain(&got)?, op.into(), plain(&expected)?, name.into()];
        self.helper(location, "cmp_ok", args)
    }

    #[track_caller]
    pub fn contains<H: Serialize, N: Serialize>(
        &mut self,
        haystack: H,
        needle: N,
        name: &str,
    ) -> Result<Verdict, IsolateError> {
        let location = Location::caller();
        let args = vec![plain(&haystack)?, plain(&needle)?, name.into()];
        self.helper(location, "contains", args)
    }

    #[track_caller]
    pub fn pass(&mut self, name: &str) -> Result<Verdict, IsolateError> {
        let location = Location::caller();
        self.helper(location, "pass", vec![name.into()])
    }

    #[track_caller]
    pub fn fail(&mut self, name: &str) -> Result<Verdict, IsolateError> {
        let location = Location::caller();
        self.helper(location, "fail", vec![name.into()])
    }

    fn helper(
        &mut self,
        location: &Location<'_>,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Verdict, IsolateError> {
        let site = CallSite::from_location(&self.caller, location);
        let target = self.resolve(name);
        self.invoke_at(target, site, args)
    }

    /// A name imported into the caller's own context wins over the library.
    fn resolve(&self, name: &str) -> Target {
        let local = Target::new(&self.caller, name);
        if self.registry.namespaces().lookup(&local).is_some() {
            local
        } else {
            Target::new(LIBRARY_CONTEXT, name)
        }
    }
}

fn plain<T: Serialize>(value: &T) -> Result<Value, IsolateError> {
    serde_json::to_value(value)
        .map_err(|e| IsolateError::Assertion(format!("argument is not plain data: {e}")))
}
