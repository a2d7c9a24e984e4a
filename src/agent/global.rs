//! Process-wide agent accessor.
//!
//! `install` creates the shared instance on first call; later calls validate the new
//! configuration and apply it to the existing instance. `teardown` releases it; stop the
//! agent first.

use super::Agent;
use crate::config::AgentConfig;
use crate::error::AgentError;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

static AGENT: Mutex<Option<Arc<Agent>>> = Mutex::new(None);

pub fn install(config: AgentConfig) -> Result<Arc<Agent>, AgentError> {
    let mut slot = AGENT.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(agent) = slot.as_ref() {
        agent.update_config(config)?;
        return Ok(Arc::clone(agent));
    }
    let agent = Arc::new(Agent::new(config)?);
    *slot = Some(Arc::clone(&agent));
    info!("process-wide agent installed");
    Ok(agent)
}

pub fn get() -> Option<Arc<Agent>> {
    AGENT.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

pub fn teardown() -> Option<Arc<Agent>> {
    let agent = AGENT.lock().unwrap_or_else(PoisonError::into_inner).take();
    if agent.is_some() {
        info!("process-wide agent released");
    }
    agent
}
