//! Process-wide tunables, loaded from TOML.
//!
//! Follows the `*Input` (all-optional, serde-default) -> `.resolve()` ->
//! concrete `*Config` shape: callers deserialize whatever subset of the
//! file is present, and `resolve()` fills the rest with defaults. This
//! configures the *process* (bounds, log cadence, channel sizing) and is
//! not a stand-in for the administrative control-plane API, which remains
//! out of scope and is invoked as plain Rust method calls on [`crate::Engine`].

use serde::Deserialize;

/// Adjacency ids above this bound are rejected (spec §3, §9: "pragmatic
/// cap, not a guarantee; the source asserts it").
pub const DEFAULT_MAX_ADJACENCY_INDEX: u32 = 65_536;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfigInput {
    pub max_adjacency_index: Option<u32>,
    pub locals_initial_capacity: Option<usize>,
    pub dead_link_log_every: Option<u64>,
    pub command_channel_capacity: Option<usize>,
}

impl EngineConfigInput {
    pub fn resolve(self) -> EngineConfig {
        EngineConfig {
            max_adjacency_index: self.max_adjacency_index.unwrap_or(DEFAULT_MAX_ADJACENCY_INDEX),
            locals_initial_capacity: self.locals_initial_capacity.unwrap_or(1024),
            dead_link_log_every: self.dead_link_log_every.unwrap_or(1000),
            command_channel_capacity: self.command_channel_capacity.unwrap_or(256),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub max_adjacency_index: u32,
    pub locals_initial_capacity: usize,
    pub dead_link_log_every: u64,
    pub command_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfigInput::default().resolve()
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let input: EngineConfigInput = toml::from_str(s)
            .map_err(|e| anyhow::anyhow!("failed to parse engine config: {e}"))?;
        Ok(input.resolve())
    }
}
