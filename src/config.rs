use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestration::swarm::{AllocationStrategy, ConsensusType};
use crate::{tlog_debug, Error, Result};

/// Fixed voting window used when none is configured.
pub const DEFAULT_VOTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Convert a configured number of seconds, rejecting values `Duration`
/// cannot hold.
fn seconds(name: &str, value: f64) -> Result<Duration> {
    if value.is_finite() && value > 0.0 {
        if let Ok(duration) = Duration::try_from_secs_f64(value) {
            return Ok(duration);
        }
    }
    Err(Error::Validation(format!(
        "{} must be a positive number of seconds, got {}",
        name, value
    )))
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub swarm: SwarmSettings,
}

/// Scheduler limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Global cap on outstanding agent calls, also the batch size per round.
    pub max_concurrent_tasks: usize,
    /// Deadline for a single agent call.
    pub default_timeout_secs: f64,
    /// When false, breakers are neither consulted nor updated.
    pub enable_circuit_breaker: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 100,
            default_timeout_secs: 300.0,
            enable_circuit_breaker: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn default_timeout(&self) -> Result<Duration> {
        seconds("orchestrator.default_timeout_secs", self.default_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(Error::Validation(
                "orchestrator.max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        self.default_timeout()?;
        Ok(())
    }
}

/// Per-agent circuit breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: f64,
    pub half_open_max_calls: u32,
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 30.0,
            half_open_max_calls: 3,
            success_threshold: 2,
        }
    }
}

impl BreakerConfig {
    pub fn recovery_timeout(&self) -> Result<Duration> {
        seconds("breaker.recovery_timeout_secs", self.recovery_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err(Error::Validation(
                "breaker thresholds must be at least 1".to_string(),
            ));
        }
        self.recovery_timeout()?;
        Ok(())
    }
}

/// Defaults applied to every swarm built from this config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SwarmSettings {
    pub consensus: ConsensusType,
    pub vote_timeout_secs: f64,
    pub min_agents: usize,
    pub max_agents: usize,
    pub allocation: AllocationStrategy,
}

impl Default for SwarmSettings {
    fn default() -> Self {
        Self {
            consensus: ConsensusType::Majority,
            vote_timeout_secs: DEFAULT_VOTE_TIMEOUT.as_secs_f64(),
            min_agents: 1,
            max_agents: 100,
            allocation: AllocationStrategy::RoundRobin,
        }
    }
}

impl SwarmSettings {
    pub fn vote_timeout(&self) -> Result<Duration> {
        seconds("swarm.vote_timeout_secs", self.vote_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        self.vote_timeout()?;
        if self.min_agents > self.max_agents {
            return Err(Error::Validation(format!(
                "swarm.min_agents ({}) exceeds swarm.max_agents ({})",
                self.min_agents, self.max_agents
            )));
        }
        Ok(())
    }
}

impl Config {
    pub fn home_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".taskmesh"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::home_dir()?.join("taskmesh.toml"))
    }

    /// Load `~/.taskmesh/taskmesh.toml`, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            tlog_debug!("Config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        tlog_debug!("Config::load_from path={}", path.display());
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        tlog_debug!(
            "Config loaded: max_concurrent_tasks={}, timeout={}s, breaker={}",
            config.orchestrator.max_concurrent_tasks,
            config.orchestrator.default_timeout_secs,
            config.orchestrator.enable_circuit_breaker
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        tlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    /// Reject values that would make the scheduler or breaker misbehave.
    pub fn validate(&self) -> Result<()> {
        self.orchestrator.validate()?;
        self.breaker.validate()?;
        self.swarm.validate()
    }
}
