use thiserror::Error;

#[derive(Debug, Error)]
pub enum IsolateError {
    #[error("io error: {0}")]
    Io(String),
    #[error("spawn error: {0}")]
    Spawn(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("truncated message: {0}")]
    Truncated(String),
    #[error("child timed out after {0}ms")]
    Timeout(u64),
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("not intercepted: {0}")]
    NotIntercepted(String),
    #[error("assertion error: {0}")]
    Assertion(String),
    #[error("replay aborted: {0}")]
    ReplayAborted(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
}
