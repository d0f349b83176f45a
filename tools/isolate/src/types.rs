use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::panic::Location;

pub const DEFAULT_CALLER: &str = "main";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Target {
    pub context: String,
    pub name: String,
}

impl Target {
    pub fn new(context: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.context, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    pub caller: String,
    pub file: String,
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

impl CallSite {
    pub fn from_location(caller: &str, location: &Location<'_>) -> Self {
        Self {
            caller: caller.to_string(),
            file: location.file().to_string(),
            line: location.line(),
            column: location.column(),
        }
    }

    #[track_caller]
    pub fn here(caller: &str) -> Self {
        Self::from_location(caller, Location::caller())
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} line {}", self.file, self.line)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallDetail {
    pub call_site: CallSite,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapturedCall {
    pub target: Target,
    pub detail: CallDetail,
}

impl CapturedCall {
    pub fn new(target: Target, call_site: CallSite, args: Vec<Value>) -> Self {
        Self {
            target,
            detail: CallDetail { call_site, args },
        }
    }

    pub fn call_site(&self) -> &CallSite {
        &self.detail.call_site
    }

    pub fn args(&self) -> &[Value] {
        &self.detail.args
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Parent,
    Child,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parent => "parent",
            Self::Child => "child",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
    Deferred,
}

impl From<bool> for Verdict {
    fn from(passed: bool) -> Self {
        if passed {
            Self::Pass
        } else {
            Self::Fail
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    Exited(i32),
    Signaled(i32),
    Unreaped,
}

impl ChildExit {
    pub fn success(self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit status {code}"),
            Self::Signaled(signal) => write!(f, "killed by signal {signal}"),
            Self::Unreaped => write!(f, "unknown status (child could not be reaped)"),
        }
    }
}
