use crate::errors::IsolateError;
use crate::logging::DEFAULT_DISK_BUDGET_BYTES;
use crate::replay::ReplayPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub timeout_ms: Option<u64>,
    pub capture_dir: Option<PathBuf>,
    pub on_error: Option<ReplayPolicy>,
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IsolateConfig {
    pub isolation: IsolationConfig,
    pub replay: ReplayConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IsolationConfig {
    pub timeout_ms: Option<u64>,
    pub capture_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplayConfig {
    pub on_error: ReplayPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub path: Option<PathBuf>,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl Default for IsolateConfig {
    fn default() -> Self {
        Self {
            isolation: IsolationConfig {
                timeout_ms: None,
                capture_dir: None,
            },
            replay: ReplayConfig {
                on_error: ReplayPolicy::Continue,
            },
            logging: LoggingConfig {
                path: None,
                max_payload_bytes: 4096,
                budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
            },
        }
    }
}

impl IsolateConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.isolation.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialIsolateConfig {
    isolation: Option<PartialIsolationConfig>,
    replay: Option<PartialReplayConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialIsolationConfig {
    timeout_ms: Option<u64>,
    capture_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialReplayConfig {
    on_error: Option<ReplayPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

pub fn load_config(
    path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<IsolateConfig, IsolateError> {
    let mut cfg = IsolateConfig::default();

    if let Some(path) = path {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| IsolateError::Io(format!("{}: {e}", path.display())))?;
        merge_partial_config(&mut cfg, parse_partial(&contents)?);
    }

    apply_overrides(&mut cfg, overrides);
    validate_config(&cfg)?;
    Ok(cfg)
}

pub fn parse_config(contents: &str) -> Result<IsolateConfig, IsolateError> {
    let mut cfg = IsolateConfig::default();
    merge_partial_config(&mut cfg, parse_partial(contents)?);
    validate_config(&cfg)?;
    Ok(cfg)
}

fn parse_partial(contents: &str) -> Result<PartialIsolateConfig, IsolateError> {
    toml::from_str(contents).map_err(|e| IsolateError::ConfigParse(e.to_string()))
}

fn merge_partial_config(cfg: &mut IsolateConfig, partial: PartialIsolateConfig) {
    if let Some(isolation) = partial.isolation {
        if let Some(value) = isolation.timeout_ms {
            cfg.isolation.timeout_ms = Some(value);
        }
        if let Some(value) = isolation.capture_dir {
            cfg.isolation.capture_dir = Some(value);
        }
    }

    if let Some(replay) = partial.replay {
        if let Some(value) = replay.on_error {
            cfg.replay.on_error = value;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(value) = logging.path {
            cfg.logging.path = Some(value);
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }
}

fn apply_overrides(cfg: &mut IsolateConfig, overrides: &ConfigOverrides) {
    if let Some(timeout_ms) = overrides.timeout_ms {
        cfg.isolation.timeout_ms = Some(timeout_ms);
    }
    if let Some(dir) = &overrides.capture_dir {
        cfg.isolation.capture_dir = Some(dir.clone());
    }
    if let Some(policy) = overrides.on_error {
        cfg.replay.on_error = policy;
    }
    if let Some(path) = &overrides.log_path {
        cfg.logging.path = Some(path.clone());
    }
}

fn validate_config(cfg: &IsolateConfig) -> Result<(), IsolateError> {
    if cfg.isolation.timeout_ms == Some(0) {
        return Err(IsolateError::InvalidConfig(
            "isolation.timeout_ms must be greater than zero".to_string(),
        ));
    }
    if cfg.logging.max_payload_bytes == 0 {
        return Err(IsolateError::InvalidConfig(
            "logging.max_payload_bytes must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        assert_eq!(parse_config("").expect("parse"), IsolateConfig::default());
    }

    #[test]
    fn partial_sections_merge_over_defaults() {
        let cfg = parse_config(
            r#"
            [isolation]
            timeout_ms = 2500

            [replay]
            on_error = "abort"
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(cfg.replay.on_error, ReplayPolicy::Abort);
        assert_eq!(cfg.logging.max_payload_bytes, 4096);
        assert_eq!(cfg.isolation.capture_dir, None);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = parse_config("[isolation]\ntimeout_ms = 0\n").expect_err("invalid");
        assert_eq!(
            err.to_string(),
            "invalid config: isolation.timeout_ms must be greater than zero"
        );
    }

    #[test]
    fn unknown_keys_and_bad_policies_fail_to_parse() {
        assert!(matches!(
            parse_config("[isolation]\ntimeuot_ms = 5\n"),
            Err(IsolateError::ConfigParse(_))
        ));
        assert!(matches!(
            parse_config("[replay]\non_error = \"retry\"\n"),
            Err(IsolateError::ConfigParse(_))
        ));
    }

    #[test]
    fn overrides_win_over_file_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("isolate.toml");
        std::fs::write(&path, "[isolation]\ntimeout_ms = 100\n").expect("write");
        let overrides = ConfigOverrides {
            timeout_ms: Some(900),
            capture_dir: Some(dir.path().join("captures")),
            on_error: Some(ReplayPolicy::Abort),
            log_path: None,
        };
        let cfg = load_config(Some(&path), &overrides).expect("load");
        assert_eq!(cfg.isolation.timeout_ms, Some(900));
        assert_eq!(cfg.isolation.capture_dir, Some(dir.path().join("captures")));
        assert_eq!(cfg.replay.on_error, ReplayPolicy::Abort);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_config(
            Some(Path::new("/definitely/not/here.toml")),
            &ConfigOverrides::default(),
        )
        .expect_err("missing");
        assert!(matches!(err, IsolateError::Io(_)));
    }
}
