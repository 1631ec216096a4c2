use crate::command::{CommandKind, Handle};
use crate::config::DEFAULT_CONNECT_TIMEOUT;
use crate::drivers::{Connection, DriverKind};
use crate::error::{EdgeError, Result};
use crate::normalize::RawStatement;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A live handle's connection. Clones share the connection; the async lock
/// serializes operations issued against the same handle.
#[derive(Clone)]
pub struct Session {
    handle: Handle,
    driver: DriverKind,
    conn: Arc<tokio::sync::Mutex<Option<Connection>>>,
}

impl Session {
    fn new(handle: Handle, conn: Connection) -> Self {
        Self {
            handle,
            driver: conn.kind(),
            conn: Arc::new(tokio::sync::Mutex::new(Some(conn))),
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn driver(&self) -> DriverKind {
        self.driver
    }

    /// Run `sql` once every earlier operation on this handle has finished.
    /// Queries also report column names of row-returning statements that
    /// came back empty.
    pub async fn run(&self, sql: &str, kind: CommandKind) -> Result<Vec<RawStatement>> {
        let mut guard = self.conn.lock().await;
        // released while we were queued behind another operation
        let conn = guard.as_mut().ok_or(EdgeError::UnknownHandle(self.handle))?;
        Ok(conn.execute(sql, kind == CommandKind::Query).await?)
    }
}

struct Slots {
    sessions: HashMap<Handle, Session>,
    next_id: i32,
}

impl Slots {
    /// Next id not held by a live session; wraps back to 1.
    fn next_free(&mut self) -> Handle {
        loop {
            let id = self.next_id;
            self.next_id = if id == i32::MAX { 1 } else { id + 1 };
            let handle = Handle::from(id);
            if !self.sessions.contains_key(&handle) {
                return handle;
            }
        }
    }
}

/// Maps handles to live backend connections.
pub struct HandleRegistry {
    slots: Mutex<Slots>,
    connect_timeout: Duration,
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl HandleRegistry {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(Slots {
                sessions: HashMap::new(),
                next_id: 1,
            }),
            connect_timeout,
        }
    }

    /// Connect and register the connection. Nothing is registered unless the
    /// backend accepted the connection within the timeout.
    pub async fn allocate(
        &self,
        driver: DriverKind,
        connection_string: &str,
        timeout: Option<Duration>,
    ) -> Result<Handle> {
        let limit = timeout.unwrap_or(self.connect_timeout);
        debug!(%driver, timeout_ms = limit.as_millis() as u64, "opening connection");

        let connecting = Connection::open(driver, connection_string);
        let conn = match tokio::time::timeout(limit, connecting).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                warn!(%driver, error = %e, "connection refused");
                return Err(EdgeError::Connection {
                    driver,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(%driver, timeout_ms = limit.as_millis() as u64, "connection timed out");
                return Err(EdgeError::Connection {
                    driver,
                    reason: format!("timed out after {:?}", limit),
                });
            }
        };

        let handle = {
            let mut slots = self.slots.lock();
            let handle = slots.next_free();
            slots.sessions.insert(handle, Session::new(handle, conn));
            handle
        };
        info!(handle = handle.get(), %driver, "connection opened");
        Ok(handle)
    }

    /// Unregister `handle` and close its connection. Closing twice is an error.
    pub async fn release(&self, handle: Handle) -> Result<()> {
        let session = self
            .slots
            .lock()
            .sessions
            .remove(&handle)
            .ok_or(EdgeError::UnknownHandle(handle))?;

        // waits for an in-flight operation on this handle
        let conn = session.conn.lock().await.take();
        if let Some(conn) = conn {
            if let Err(e) = conn.close().await {
                warn!(handle = handle.get(), error = %e, "backend close failed");
            }
        }
        info!(handle = handle.get(), driver = %session.driver, "connection closed");
        Ok(())
    }

    pub fn session(&self, handle: Handle) -> Result<Session> {
        self.slots
            .lock()
            .sessions
            .get(&handle)
            .cloned()
            .ok_or(EdgeError::UnknownHandle(handle))
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.slots.lock().sessions.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live handles in ascending order.
    pub fn handles(&self) -> Vec<Handle> {
        let mut handles: Vec<Handle> = self.slots.lock().sessions.keys().copied().collect();
        handles.sort();
        handles
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_free_skips_live_ids_and_wraps() {
        let mut slots = Slots {
            sessions: HashMap::new(),
            next_id: i32::MAX,
        };
        assert_eq!(slots.next_free(), Handle::from(i32::MAX));
        assert_eq!(slots.next_free(), Handle::from(1));
    }

    #[tokio::test]
    async fn handles_are_distinct_while_open() {
        let registry = HandleRegistry::default();
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(registry.allocate(DriverKind::Sqlite, ":memory:", None).await.unwrap());
        }
        let mut unique = seen.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), seen.len());
        assert_eq!(registry.handles(), unique);
    }

    #[tokio::test]
    async fn release_twice_fails() {
        let registry = HandleRegistry::default();
        let handle = registry.allocate(DriverKind::Sqlite, ":memory:", None).await.unwrap();
        registry.release(handle).await.unwrap();
        assert!(!registry.contains(handle));
        let err = registry.release(handle).await.unwrap_err();
        assert!(matches!(err, EdgeError::UnknownHandle(h) if h == handle));
    }

    #[tokio::test]
    async fn failed_connect_registers_nothing() {
        let registry = HandleRegistry::default();
        let err = registry
            .allocate(DriverKind::Sqlite, "/nonexistent-dir/nope.db", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EdgeError::Connection { .. }));
        assert!(registry.is_empty());
    }
}
