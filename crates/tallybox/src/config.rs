use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const ENV_ENGINE: &str = "TALLYBOX_ENGINE";
pub const ENV_ENGINE_BIN: &str = "TALLYBOX_ENGINE_BIN";
pub const ENV_IMAGE: &str = "TALLYBOX_IMAGE";

pub const DEFAULT_IMAGE: &str = "tallybox-executor";

/// Container engine driving the executor image. The invocation argv is
/// identical for both engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    Docker,
    Podman,
}

impl Engine {
    pub fn as_str(self) -> &'static str {
        match self {
            Engine::Docker => "docker",
            Engine::Podman => "podman",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct EngineParseError {
    value: String,
}

impl fmt::Display for EngineParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid engine {:?} (expected one of: docker, podman)",
            self.value
        )
    }
}

impl std::error::Error for EngineParseError {}

impl FromStr for Engine {
    type Err = EngineParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "docker" => Ok(Engine::Docker),
            "podman" => Ok(Engine::Podman),
            _ => Err(EngineParseError { value: s }),
        }
    }
}

/// Configuration of the external executor: which engine to drive, which
/// image to run, and an optional override of the engine binary itself.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub engine: Engine,
    /// Overrides the engine binary resolved from [`Engine::as_str`]. Useful
    /// when the engine lives outside `PATH` or is substituted in tests.
    pub engine_bin: Option<PathBuf>,
    /// Executor image tag. The image is contractually expected to run the
    /// binary mounted at [`crate::GUEST_BINARY_PATH`] and append one
    /// telemetry line to its stderr stream.
    pub image: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            engine: Engine::Docker,
            engine_bin: None,
            image: DEFAULT_IMAGE.to_string(),
        }
    }
}

impl ExecutorConfig {
    pub fn from_env() -> Result<Self, EngineParseError> {
        Self::from_env_parts(
            std::env::var(ENV_ENGINE).ok(),
            std::env::var_os(ENV_ENGINE_BIN).map(PathBuf::from),
            std::env::var(ENV_IMAGE).ok(),
        )
    }

    fn from_env_parts(
        engine_raw: Option<String>,
        engine_bin: Option<PathBuf>,
        image: Option<String>,
    ) -> Result<Self, EngineParseError> {
        let engine = match engine_raw {
            Some(raw) => raw.parse()?,
            None => Engine::Docker,
        };
        Ok(Self {
            engine,
            engine_bin,
            image: image.unwrap_or_else(|| DEFAULT_IMAGE.to_string()),
        })
    }

    pub(crate) fn engine_command(&self) -> OsString {
        match &self.engine_bin {
            Some(bin) => bin.clone().into_os_string(),
            None => OsString::from(self.engine.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_engine_from_str() {
        assert_eq!(Engine::from_str("docker").unwrap(), Engine::Docker);
        assert_eq!(Engine::from_str("podman").unwrap(), Engine::Podman);
        assert_eq!(Engine::from_str(" Podman ").unwrap(), Engine::Podman);
        assert!(Engine::from_str("lxc").is_err());
    }

    #[test]
    fn env_parts_default_to_docker_and_default_image() {
        let config = ExecutorConfig::from_env_parts(None, None, None).unwrap();
        assert_eq!(config.engine, Engine::Docker);
        assert_eq!(config.image, DEFAULT_IMAGE);
        assert!(config.engine_bin.is_none());
    }

    #[test]
    fn env_parts_override_engine_and_image() {
        let config = ExecutorConfig::from_env_parts(
            Some("podman".to_string()),
            Some(PathBuf::from("/opt/podman")),
            Some("custom-executor".to_string()),
        )
        .unwrap();
        assert_eq!(config.engine, Engine::Podman);
        assert_eq!(config.image, "custom-executor");
        assert_eq!(config.engine_command(), OsString::from("/opt/podman"));
    }

    #[test]
    fn env_parts_reject_unknown_engine() {
        let err = ExecutorConfig::from_env_parts(Some("lxc".to_string()), None, None).unwrap_err();
        assert!(err.to_string().contains("docker, podman"));
    }
}
