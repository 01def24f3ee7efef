//! Scripted resolver and subscription doubles shared by unit tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use resbridge_core::{ResError, ResourceState, Value};
use serde_json::value::RawValue;
use tokio::sync::Notify;

use crate::bridge::session::SessionScope;
use crate::traits::{Resolver, Subscription};

/// Subscription with a fixed state that counts its releases.
pub(crate) struct ScriptedSubscription {
    rid: String,
    state: ResourceState,
    state_reads: AtomicUsize,
    releases: AtomicUsize,
}

impl ScriptedSubscription {
    pub(crate) fn model(rid: &str, fields: &[(&str, &str)]) -> Arc<Self> {
        let fields = fields
            .iter()
            .map(|(key, json)| {
                let raw = RawValue::from_string((*json).to_string()).unwrap();
                ((*key).to_string(), Value::Primitive(raw))
            })
            .collect::<BTreeMap<_, _>>();
        Arc::new(Self {
            rid: rid.to_string(),
            state: ResourceState::Model(fields),
            state_reads: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        })
    }

    pub(crate) fn errored(rid: &str, err: ResError) -> Arc<Self> {
        Arc::new(Self {
            rid: rid.to_string(),
            state: ResourceState::Error(err),
            state_reads: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        })
    }

    pub(crate) fn state_reads(&self) -> usize {
        self.state_reads.load(Ordering::SeqCst)
    }

    pub(crate) fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl Subscription for ScriptedSubscription {
    fn rid(&self) -> &str {
        &self.rid
    }

    fn state(&self) -> ResourceState {
        self.state_reads.fetch_add(1, Ordering::SeqCst);
        self.state.clone()
    }

    fn child(&self, _rid: &str) -> Option<Arc<dyn Subscription>> {
        None
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Resolver returning canned results and logging every call in order.
pub(crate) struct ScriptedResolver {
    events: Mutex<Vec<String>>,
    interactions: AtomicUsize,
    subscription: Mutex<Option<Arc<ScriptedSubscription>>>,
    auth_result: Mutex<Result<Option<serde_json::Value>, ResError>>,
    get_result: Mutex<Result<Option<serde_json::Value>, ResError>>,
    call_result: Mutex<Result<Option<serde_json::Value>, ResError>>,
    create_result: Mutex<Result<String, ResError>>,
    params: Mutex<Vec<Option<String>>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl Default for ScriptedResolver {
    fn default() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            interactions: AtomicUsize::new(0),
            subscription: Mutex::new(None),
            auth_result: Mutex::new(Ok(None)),
            get_result: Mutex::new(Ok(None)),
            call_result: Mutex::new(Ok(None)),
            create_result: Mutex::new(Ok(String::new())),
            params: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        }
    }
}

impl ScriptedResolver {
    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub(crate) fn interactions(&self) -> usize {
        self.interactions.load(Ordering::SeqCst)
    }

    /// Parameters received by `call`/`create`, as raw JSON text.
    pub(crate) fn params(&self) -> Vec<Option<String>> {
        self.params.lock().clone()
    }

    pub(crate) fn set_subscription(&self, subscription: Arc<ScriptedSubscription>) {
        *self.subscription.lock() = Some(subscription);
    }

    pub(crate) fn set_auth_result(&self, result: Result<Option<serde_json::Value>, ResError>) {
        *self.auth_result.lock() = result;
    }

    pub(crate) fn set_get_result(&self, result: Result<Option<serde_json::Value>, ResError>) {
        *self.get_result.lock() = result;
    }

    pub(crate) fn set_call_result(&self, result: Result<Option<serde_json::Value>, ResError>) {
        *self.call_result.lock() = result;
    }

    pub(crate) fn set_create_result(&self, result: Result<String, ResError>) {
        *self.create_result.lock() = result;
    }

    /// Makes `subscribe` and `call` hold until the returned notify fires.
    pub(crate) fn block_calls(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    fn record(&self, event: String) {
        self.interactions.fetch_add(1, Ordering::SeqCst);
        self.events.lock().push(event);
    }
}

#[async_trait]
impl Resolver for ScriptedResolver {
    async fn subscribe(
        &self,
        _scope: &SessionScope,
        rid: &str,
    ) -> Result<Arc<dyn Subscription>, ResError> {
        self.record(format!("subscribe {rid}"));
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let subscription = self.subscription.lock().clone();
        subscription
            .map(|s| s as Arc<dyn Subscription>)
            .ok_or_else(ResError::not_found)
    }

    async fn get_resource(
        &self,
        _scope: &SessionScope,
        rid: &str,
        _api_path: &str,
    ) -> Result<Option<serde_json::Value>, ResError> {
        self.record(format!("get {rid}"));
        self.get_result.lock().clone()
    }

    async fn call(
        &self,
        scope: &SessionScope,
        rid: &str,
        action: &str,
        params: Option<&RawValue>,
    ) -> Result<Option<serde_json::Value>, ResError> {
        self.record(format!("call {rid} {action}"));
        self.params.lock().push(params.map(|p| p.get().to_string()));

        let subscription = self.subscription.lock().clone();
        if let Some(subscription) = subscription {
            scope.track(subscription);
        }
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.call_result.lock().clone()
    }

    async fn create(
        &self,
        _scope: &SessionScope,
        rid: &str,
        _api_path: &str,
        params: Option<&RawValue>,
    ) -> Result<String, ResError> {
        self.record(format!("create {rid}"));
        self.params.lock().push(params.map(|p| p.get().to_string()));
        self.create_result.lock().clone()
    }

    async fn auth(
        &self,
        _scope: &SessionScope,
        rid: &str,
        action: &str,
        _params: Option<&RawValue>,
    ) -> Result<Option<serde_json::Value>, ResError> {
        self.record(format!("auth {rid} {action}"));
        self.auth_result.lock().clone()
    }
}
