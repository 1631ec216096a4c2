use crate::command::{Command, Handle};
use crate::config::EngineConfig;
use crate::drivers::DriverKind;
use crate::error::{EdgeError, Result};
use crate::normalize::{Reply, normalize};
use crate::registry::{HandleRegistry, Session};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Routes validated commands to the registry and the backends.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandleRegistry>,
    config: EngineConfig,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Dispatcher {
    pub fn new(config: EngineConfig) -> Self {
        let registry = Arc::new(HandleRegistry::new(config.connect_timeout));
        Self { registry, config }
    }

    /// Share an existing registry, e.g. between several dispatchers.
    pub fn with_registry(config: EngineConfig, registry: Arc<HandleRegistry>) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn dispatch(&self, command: Command) -> Result<Reply> {
        let kind = command.kind();
        debug!(
            cmd = kind.as_str(),
            driver = %command.driver(),
            handle = ?command.handle().map(Handle::get),
            "dispatch"
        );
        let reply = self.route(command).await;
        if let Err(e) = &reply {
            warn!(cmd = kind.as_str(), kind = %e.kind(), error = %e, "command failed");
        }
        reply
    }

    async fn route(&self, command: Command) -> Result<Reply> {
        let kind = command.kind();
        match command {
            Command::Open {
                driver,
                connection_string,
                timeout,
            } => {
                let handle = self.registry.allocate(driver, &connection_string, timeout).await?;
                Ok(Reply::Handle(handle))
            }
            Command::Close { driver, handle } => {
                self.session_for(driver, handle)?;
                self.registry.release(handle).await?;
                Ok(Reply::Closed)
            }
            Command::NonQuery {
                driver,
                handle,
                source,
            }
            | Command::Query {
                driver,
                handle,
                source,
            } => {
                let session = self.session_for(driver, handle)?;
                let statements = session.run(&source, kind).await?;
                Ok(normalize(kind, statements))
            }
        }
    }

    /// Validate a request map and dispatch it.
    pub async fn dispatch_config(&self, config: &Value) -> Result<Reply> {
        let command = Command::from_config(config)?;
        self.dispatch(command).await
    }

    /// Live session for `handle`, provided it was opened with `driver`.
    pub(crate) fn session_for(&self, driver: DriverKind, handle: Handle) -> Result<Session> {
        let session = self.registry.session(handle)?;
        if session.driver() != driver {
            return Err(EdgeError::DriverMismatch {
                handle,
                actual: session.driver(),
                requested: driver,
            });
        }
        Ok(session)
    }
}
