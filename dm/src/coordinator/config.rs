//! Coordinator configuration

use eyre::{Result, eyre};
use serde::{Deserialize, Serialize};

/// Runtime limits handed to a coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Max concurrent outbound transfers
    #[serde(default = "default_max_send_slots")]
    pub max_send_slots: usize,

    /// Max concurrent inbound transfers
    #[serde(default = "default_max_receive_slots")]
    pub max_receive_slots: usize,

    /// Peers hold binding objects in a persistent native runtime
    #[serde(default)]
    pub persistent_bindings: bool,
}

fn default_max_send_slots() -> usize {
    5
}

fn default_max_receive_slots() -> usize {
    5
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_send_slots: 5,
            max_receive_slots: 5,
            persistent_bindings: false,
        }
    }
}

impl CoordinatorConfig {
    /// Reject limits no coordinator can run with
    pub fn validate(&self) -> Result<()> {
        if self.max_send_slots == 0 {
            return Err(eyre!("max-send-slots must be at least 1"));
        }
        if self.max_receive_slots == 0 {
            return Err(eyre!("max-receive-slots must be at least 1"));
        }
        Ok(())
    }
}
