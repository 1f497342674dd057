// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// Persistent application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanwerkConfig {
    /// How long discovery collects device events before returning.
    pub discovery_timeout_secs: u64,
    /// Overall deadline for one capture session (open through completion).
    pub session_timeout_secs: u64,
    /// Default capture parameters for new scans.
    pub default_scan: crate::ScanConfig,
}

impl Default for ScanwerkConfig {
    fn default() -> Self {
        Self {
            discovery_timeout_secs: 5,
            session_timeout_secs: 60,
            default_scan: crate::ScanConfig::default(),
        }
    }
}

impl ScanwerkConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// Parse a configuration from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to pretty-printed JSON for on-disk storage.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
