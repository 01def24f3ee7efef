//! Ephemeral sessions: one-shot virtual connections for stateless requests.
//!
//! A session is created per request, runs exactly one operation on a private
//! worker task, and is disposed as soon as that operation completes. Disposal
//! releases every subscription the session acquired, deregisters it, and
//! returns its capacity permit. Disposal is idempotent and also runs when
//! the request is abandoned before completion.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use resbridge_core::{RequestContext, ResError};
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use super::config::{AuthGate, BridgeConfig};
use super::operation::{ApiOperation, OperationOutput};
use crate::network::{HealthState, InFlightGuard, ShutdownController};
use crate::traits::{Resolver, Subscription};

/// Unique identifier for a session, assigned by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The resolver-facing side of a session.
///
/// Carries the request context and tracks every subscription acquired for
/// the session so they can be released together at disposal.
pub struct SessionScope {
    id: SessionId,
    context: RequestContext,
    tracked: Mutex<Vec<Arc<dyn Subscription>>>,
    disposed: AtomicBool,
}

impl SessionScope {
    #[must_use]
    pub fn new(id: SessionId, context: RequestContext) -> Self {
        Self {
            id,
            context,
            tracked: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Records a subscription to be released at disposal.
    ///
    /// If the session is already disposed the subscription is released
    /// immediately.
    pub fn track(&self, subscription: Arc<dyn Subscription>) {
        let mut tracked = self.tracked.lock();
        if self.disposed.load(Ordering::Acquire) {
            drop(tracked);
            subscription.release();
            return;
        }
        tracked.push(subscription);
    }

    /// Number of subscriptions currently held.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().len()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Releases all tracked subscriptions and marks the scope disposed.
    ///
    /// Returns `false` if the scope was already disposed.
    fn dispose(&self) -> bool {
        let released = {
            let mut tracked = self.tracked.lock();
            if self.disposed.swap(true, Ordering::AcqRel) {
                return false;
            }
            std::mem::take(&mut *tracked)
        };
        for subscription in released {
            subscription.release();
        }
        true
    }
}

impl std::fmt::Debug for SessionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionScope")
            .field("id", &self.id)
            .field("tracked", &self.tracked_count())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

/// Registry entry plus the resources a live session holds.
///
/// Shared by the session handle and its worker; whichever finishes first
/// disposes, and the permit and in-flight guard go back when both are gone.
struct Lease {
    scope: Arc<SessionScope>,
    registry: Arc<DashMap<SessionId, Arc<SessionScope>>>,
    _permit: OwnedSemaphorePermit,
    _in_flight: InFlightGuard,
}

impl Lease {
    fn dispose(&self) {
        if self.scope.dispose() {
            self.registry.remove(&self.scope.id);
            debug!(session = %self.scope.id, "session disposed");
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct Task {
    operation: ApiOperation,
    reply: oneshot::Sender<Result<OperationOutput, ResError>>,
}

/// A one-shot virtual connection bound to a single request.
///
/// [`EphemeralSession::execute`] consumes the session, so at most one
/// operation ever runs on it.
pub struct EphemeralSession {
    lease: Arc<Lease>,
    queue: mpsc::Sender<Task>,
}

impl EphemeralSession {
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.lease.scope.id
    }

    #[must_use]
    pub fn scope(&self) -> &Arc<SessionScope> {
        &self.lease.scope
    }

    /// Enqueues `operation` on the session worker and waits for its result.
    ///
    /// There is no timeout on the wait. The session is disposed before the
    /// result is returned.
    ///
    /// # Errors
    ///
    /// Returns the operation's domain error, or an internal error if the
    /// worker stopped without replying.
    pub async fn execute(self, operation: ApiOperation) -> Result<OperationOutput, ResError> {
        let (reply, done) = oneshot::channel();
        if self.queue.send(Task { operation, reply }).await.is_err() {
            return Err(ResError::internal("session worker is not running"));
        }
        done.await
            .unwrap_or_else(|_| Err(ResError::internal("session worker stopped before replying")))
    }
}

impl Drop for EphemeralSession {
    fn drop(&mut self) {
        self.lease.dispose();
    }
}

impl std::fmt::Debug for EphemeralSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralSession")
            .field("scope", &self.lease.scope)
            .finish_non_exhaustive()
    }
}

/// Creates sessions and enforces the process-wide session capacity.
pub struct SessionManager {
    resolver: Arc<dyn Resolver>,
    config: Arc<BridgeConfig>,
    shutdown: Arc<ShutdownController>,
    permits: Arc<Semaphore>,
    sessions: Arc<DashMap<SessionId, Arc<SessionScope>>>,
    next_id: AtomicU64,
}

impl SessionManager {
    /// Session IDs start at 1.
    #[must_use]
    pub fn new(
        resolver: Arc<dyn Resolver>,
        config: Arc<BridgeConfig>,
        shutdown: Arc<ShutdownController>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_sessions as usize));
        Self {
            resolver,
            config,
            shutdown,
            permits,
            sessions: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Arc<BridgeConfig> {
        &self.config
    }

    /// Opens a session for one request.
    ///
    /// Never waits: at capacity, or once shutdown has begun, this fails
    /// straight away.
    ///
    /// # Errors
    ///
    /// Returns a `system.serviceUnavailable` error when no session can be
    /// opened.
    pub fn create(&self, context: RequestContext) -> Result<EphemeralSession, ResError> {
        if matches!(
            self.shutdown.health_state(),
            HealthState::Draining | HealthState::Stopped
        ) {
            metrics::counter!("resbridge_sessions_total", "outcome" => "draining").increment(1);
            return Err(ResError::service_unavailable());
        }

        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            metrics::counter!("resbridge_sessions_total", "outcome" => "at_capacity").increment(1);
            warn!(
                max_sessions = self.config.max_sessions,
                "session capacity reached, rejecting request"
            );
            return Err(ResError::service_unavailable());
        };

        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let scope = Arc::new(SessionScope::new(id, context));
        self.sessions.insert(id, Arc::clone(&scope));

        let lease = Arc::new(Lease {
            scope,
            registry: Arc::clone(&self.sessions),
            _permit: permit,
            _in_flight: self.shutdown.in_flight_guard(),
        });

        let (queue, rx) = mpsc::channel(1);
        tokio::spawn(run_worker(
            rx,
            Arc::clone(&lease),
            Arc::clone(&self.resolver),
            Arc::clone(&self.config),
        ));

        metrics::counter!("resbridge_sessions_total", "outcome" => "created").increment(1);
        debug!(session = %id, "session created");
        Ok(EphemeralSession { lease, queue })
    }

    /// Number of sessions not yet disposed.
    #[must_use]
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of sessions that could still be opened.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Drains the session queue. Each task runs the optional auth step, then
/// the operation; the session is disposed before the reply is sent.
async fn run_worker(
    mut rx: mpsc::Receiver<Task>,
    lease: Arc<Lease>,
    resolver: Arc<dyn Resolver>,
    config: Arc<BridgeConfig>,
) {
    while let Some(Task { operation, reply }) = rx.recv().await {
        let scope = &lease.scope;
        if reply.is_closed() {
            debug!(session = %scope.id, "caller gone, skipping operation");
            lease.dispose();
            continue;
        }
        debug!(session = %scope.id, op = operation.name(), rid = operation.rid(), "running operation");

        let result = match authenticate(resolver.as_ref(), scope, &config).await {
            Ok(()) => operation.run(resolver.as_ref(), scope, &config).await,
            Err(err) => Err(err),
        };

        lease.dispose();
        // The caller may have gone away; nothing left to deliver to.
        let _ = reply.send(result);
    }
}

/// Runs the configured header-auth action, if any.
///
/// Under [`AuthGate::PassThrough`] the outcome is only logged.
async fn authenticate(
    resolver: &dyn Resolver,
    scope: &SessionScope,
    config: &BridgeConfig,
) -> Result<(), ResError> {
    let Some(auth) = &config.header_auth else {
        return Ok(());
    };

    match resolver.auth(scope, &auth.rid, &auth.action, None).await {
        Ok(_) => {
            debug!(session = %scope.id, "header auth completed");
            Ok(())
        }
        Err(err) => match auth.gate {
            AuthGate::PassThrough => {
                debug!(session = %scope.id, error = %err, "header auth failed, continuing");
                Ok(())
            }
            AuthGate::RequireSuccess => {
                warn!(session = %scope.id, error = %err, "header auth failed, rejecting request");
                Err(err)
            }
        },
    }
}
