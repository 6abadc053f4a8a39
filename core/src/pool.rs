//! Session pool: at most one live transport session per configuration.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Configuration;
use crate::error::ServiceError;
use crate::transport::{Capabilities, EventSink, SessionHandle, Transport};

pub struct SessionPool {
    transport: Arc<dyn Transport>,
    capabilities: Capabilities,
    sessions: HashMap<Configuration, SessionHandle>,
}

impl SessionPool {
    /// Capabilities are read once, here, and fixed for the pool's lifetime.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let capabilities = transport.capabilities();
        Self {
            transport,
            capabilities,
            sessions: HashMap::new(),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Return the live session for `configuration`, evicting a dead one and
    /// building a replacement if needed.
    pub fn session_for(
        &mut self,
        configuration: &Configuration,
        events: &EventSink,
    ) -> Result<SessionHandle, ServiceError> {
        if let Some(session) = self.sessions.get(configuration) {
            if session.is_valid() {
                return Ok(Arc::clone(session));
            }
            debug!("evicting invalidated session {} for {:?}", session.id(), configuration);
            self.sessions.remove(configuration);
        }

        configuration.validate()?;
        let session = self.transport.create_session(configuration, events.clone())?;
        info!("session {} created for {:?}", session.id(), configuration);
        self.sessions
            .insert(configuration.clone(), Arc::clone(&session));
        Ok(session)
    }

    /// Invalidate and forget every session. Returns how many were dropped.
    pub fn invalidate_all(&mut self, graceful: bool) -> usize {
        let count = self.sessions.len();
        for (configuration, session) in self.sessions.drain() {
            info!(
                "invalidating session {} for {:?} (graceful={})",
                session.id(),
                configuration,
                graceful
            );
            session.invalidate(graceful);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
