//! The run's target arena. Owns every `Target` and resolves cross-target
//! references (trigger triggerees, lockstep partners) by id lookup
//! instead of raw pointers, so the original tool's cyclic
//! pointer-to-pointer target graph becomes a flat, `Send`-safe
//! collection indexed by a stable id.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::RunConfig;
use crate::error::{Result, XddError};
use crate::run_state::RunState;
use crate::target::Target;

/// Socket addresses for the RAW/E2E network channels, resolved once by the
/// CLI front-end. Kept out of [`RunConfig`] because it isn't run-wide
/// configuration shared by every target the way syncio/max-errors are —
/// it names the two targets this run's RAW/E2E pairing connects.
#[derive(Debug, Clone, Default)]
pub struct NetConfig {
    pub raw_connect: Option<SocketAddr>,
    pub raw_listen: Option<SocketAddr>,
    pub e2e_connect: Option<SocketAddr>,
    pub e2e_listen: Option<SocketAddr>,
}

pub struct Plan {
    targets: Vec<Arc<Target>>,
    pub config: Arc<RunConfig>,
    pub run_state: Arc<RunState>,
    pub net: NetConfig,
}

impl Plan {
    pub fn new(targets: Vec<Arc<Target>>, config: RunConfig) -> Result<Self> {
        Self::with_net(targets, config, NetConfig::default())
    }

    pub fn with_net(targets: Vec<Arc<Target>>, config: RunConfig, net: NetConfig) -> Result<Self> {
        let mut ids: Vec<u32> = targets.iter().map(|t| t.id).collect();
        ids.sort_unstable();
        if ids.windows(2).any(|w| w[0] == w[1]) {
            return Err(XddError::Config("duplicate target id in plan".to_string()));
        }
        let run_state = Arc::new(RunState::new(config.max_errors));
        Ok(Self {
            targets,
            config: Arc::new(config),
            run_state,
            net,
        })
    }

    pub fn targets(&self) -> &[Arc<Target>] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn target(&self, id: u32) -> Option<&Arc<Target>> {
        self.targets.iter().find(|t| t.id == id)
    }
}
