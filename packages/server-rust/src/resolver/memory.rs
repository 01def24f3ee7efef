//! In-memory [`Resolver`] backed by [`DashMap`].
//!
//! Holds a flat table of resources keyed by RID. Subscriptions are views
//! onto that table; only handles returned by [`Resolver::subscribe`] are
//! counted, child handles handed out during flattening are not.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use resbridge_core::{codes, is_valid_rid, rid_to_path, ResError, ResourceState, RidGrammar, Value};
use serde_json::value::RawValue;
use tracing::debug;

use crate::bridge::session::SessionScope;
use crate::traits::{Resolver, Subscription};

type Table = Arc<DashMap<String, ResourceState>>;

/// Errors raised while loading a seed document.
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("seed is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("seed entry {rid:?} is not a valid resource id")]
    InvalidRid { rid: String },
    #[error("seed entry {rid:?} must be an object or an array")]
    Shape { rid: String },
}

/// Reference resolver holding every resource in process memory.
pub struct InMemoryResolver {
    resources: Table,
    next_ids: DashMap<String, u64>,
    active: Arc<AtomicUsize>,
    interactions: AtomicU64,
    tokens: Option<HashSet<String>>,
}

impl InMemoryResolver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            resources: Arc::new(DashMap::new()),
            next_ids: DashMap::new(),
            active: Arc::new(AtomicUsize::new(0)),
            interactions: AtomicU64::new(0),
            tokens: None,
        }
    }

    /// Builds a resolver from a JSON document mapping RIDs to resources.
    ///
    /// Objects become models and arrays become collections. Members shaped
    /// like `{"rid": "..."}` are references.
    ///
    /// # Errors
    ///
    /// Returns [`SeedError`] if the document is not a JSON object, a key is
    /// not a valid RID, or an entry is neither an object nor an array.
    pub fn from_json(seed: &str) -> Result<Self, SeedError> {
        let entries: BTreeMap<String, Box<RawValue>> = serde_json::from_str(seed)?;
        let resolver = Self::new();
        for (rid, raw) in entries {
            if !is_valid_rid(&rid, RidGrammar::Resource) {
                return Err(SeedError::InvalidRid { rid });
            }
            let state = match raw.get().trim_start().as_bytes().first() {
                Some(b'{') => ResourceState::Model(parse_fields(&raw)?),
                Some(b'[') => {
                    let items: Vec<Box<RawValue>> = serde_json::from_str(raw.get())?;
                    ResourceState::Collection(items.into_iter().map(Value::from_raw).collect())
                }
                _ => return Err(SeedError::Shape { rid }),
            };
            resolver.insert(rid, state);
        }
        Ok(resolver)
    }

    /// Accepts only requests whose `authorization` header carries one of
    /// `tokens` as a bearer token.
    #[must_use]
    pub fn with_bearer_tokens(mut self, tokens: impl IntoIterator<Item = String>) -> Self {
        self.tokens = Some(tokens.into_iter().collect());
        self
    }

    /// Stores `state` under `rid`, replacing any previous state.
    pub fn insert(&self, rid: impl Into<String>, state: ResourceState) {
        self.resources.insert(rid.into(), state);
    }

    #[must_use]
    pub fn state(&self, rid: &str) -> Option<ResourceState> {
        self.resources.get(rid).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Subscriptions handed out and not yet released.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Total number of resolver calls served.
    #[must_use]
    pub fn interactions(&self) -> u64 {
        self.interactions.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        self.interactions.fetch_add(1, Ordering::Relaxed);
    }

    fn lookup(&self, rid: &str) -> Result<ResourceState, ResError> {
        self.state(rid).ok_or_else(ResError::not_found)
    }

    /// Picks the lowest free `<collection>.<n>` above the last one issued.
    fn next_child_rid(&self, collection: &str) -> String {
        let mut counter = self.next_ids.entry(collection.to_string()).or_insert(0);
        loop {
            *counter += 1;
            let candidate = format!("{collection}.{}", *counter);
            if !self.resources.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn set_fields(&self, rid: &str, params: Option<&RawValue>) -> Result<(), ResError> {
        let fields = match params {
            Some(raw) => parse_fields(raw).map_err(|_| invalid_params())?,
            None => return Err(invalid_params()),
        };
        let mut entry = self.resources.get_mut(rid).ok_or_else(ResError::not_found)?;
        match entry.value_mut() {
            ResourceState::Model(current) => {
                current.extend(fields);
                Ok(())
            }
            ResourceState::Collection(_) => Err(method_not_found()),
            ResourceState::Error(err) => Err(err.clone()),
        }
    }

    fn delete(&self, rid: &str) -> Result<(), ResError> {
        if self.resources.remove(rid).is_none() {
            return Err(ResError::not_found());
        }
        for mut entry in self.resources.iter_mut() {
            if let ResourceState::Collection(items) = entry.value_mut() {
                items.retain(|item| item.rid() != Some(rid));
            }
        }
        Ok(())
    }
}

impl Default for InMemoryResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resolver for InMemoryResolver {
    async fn subscribe(
        &self,
        scope: &SessionScope,
        rid: &str,
    ) -> Result<Arc<dyn Subscription>, ResError> {
        self.touch();
        if !self.resources.contains_key(rid) {
            return Err(ResError::not_found());
        }
        self.active.fetch_add(1, Ordering::AcqRel);
        debug!(session = %scope.id(), rid, "subscribed");
        Ok(Arc::new(MemorySubscription {
            rid: rid.to_string(),
            resources: Arc::clone(&self.resources),
            counter: Some(Arc::clone(&self.active)),
            released: AtomicBool::new(false),
        }))
    }

    async fn get_resource(
        &self,
        _scope: &SessionScope,
        rid: &str,
        api_path: &str,
    ) -> Result<Option<serde_json::Value>, ResError> {
        self.touch();
        let rendered = match self.lookup(rid)? {
            ResourceState::Model(fields) => {
                let mut object = serde_json::Map::with_capacity(fields.len());
                for (key, value) in fields {
                    object.insert(key, render_linked(&value, api_path)?);
                }
                serde_json::Value::Object(object)
            }
            ResourceState::Collection(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|value| render_linked(value, api_path))
                    .collect::<Result<_, _>>()?,
            ),
            ResourceState::Error(err) => return Err(err),
        };
        Ok(Some(rendered))
    }

    async fn call(
        &self,
        scope: &SessionScope,
        rid: &str,
        action: &str,
        params: Option<&RawValue>,
    ) -> Result<Option<serde_json::Value>, ResError> {
        self.touch();
        debug!(session = %scope.id(), rid, action, "call");
        match action {
            "set" => self.set_fields(rid, params)?,
            "delete" => self.delete(rid)?,
            _ => {
                self.lookup(rid)?;
                return Err(method_not_found());
            }
        }
        Ok(None)
    }

    async fn create(
        &self,
        scope: &SessionScope,
        rid: &str,
        api_path: &str,
        params: Option<&RawValue>,
    ) -> Result<String, ResError> {
        self.touch();
        match self.lookup(rid)? {
            ResourceState::Collection(_) => {}
            ResourceState::Model(_) => return Err(method_not_found()),
            ResourceState::Error(err) => return Err(err),
        }
        let fields = match params {
            Some(raw) => parse_fields(raw).map_err(|_| invalid_params())?,
            None => BTreeMap::new(),
        };

        let new_rid = self.next_child_rid(rid);
        self.resources
            .insert(new_rid.clone(), ResourceState::Model(fields));
        if let Some(mut entry) = self.resources.get_mut(rid) {
            if let ResourceState::Collection(items) = entry.value_mut() {
                items.push(Value::reference(new_rid.clone()));
            }
        }

        debug!(session = %scope.id(), rid = %new_rid, "created");
        Ok(rid_to_path(&new_rid, api_path))
    }

    async fn auth(
        &self,
        scope: &SessionScope,
        _rid: &str,
        _action: &str,
        _params: Option<&RawValue>,
    ) -> Result<Option<serde_json::Value>, ResError> {
        self.touch();
        let Some(tokens) = &self.tokens else {
            return Ok(None);
        };
        let presented = scope
            .context()
            .header("authorization")
            .and_then(|value| value.strip_prefix("Bearer "));
        match presented {
            Some(token) if tokens.contains(token) => Ok(None),
            _ => Err(ResError::access_denied()),
        }
    }
}

/// View of one row of the resource table.
///
/// Handles from `subscribe` carry the resolver's active counter and give it
/// back on the first release. Child handles carry none.
struct MemorySubscription {
    rid: String,
    resources: Table,
    counter: Option<Arc<AtomicUsize>>,
    released: AtomicBool,
}

impl Subscription for MemorySubscription {
    fn rid(&self) -> &str {
        &self.rid
    }

    fn state(&self) -> ResourceState {
        self.resources
            .get(&self.rid)
            .map_or_else(|| ResourceState::Error(ResError::not_found()), |entry| entry.value().clone())
    }

    fn child(&self, rid: &str) -> Option<Arc<dyn Subscription>> {
        if !self.resources.contains_key(rid) {
            return None;
        }
        Some(Arc::new(MemorySubscription {
            rid: rid.to_string(),
            resources: Arc::clone(&self.resources),
            counter: None,
            released: AtomicBool::new(false),
        }))
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(counter) = &self.counter {
            counter.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

fn parse_fields(raw: &RawValue) -> Result<BTreeMap<String, Value>, serde_json::Error> {
    let fields: BTreeMap<String, Box<RawValue>> = serde_json::from_str(raw.get())?;
    Ok(fields
        .into_iter()
        .map(|(key, value)| (key, Value::from_raw(value)))
        .collect())
}

/// Renders one value for a non-graph read: references become links.
fn render_linked(value: &Value, api_path: &str) -> Result<serde_json::Value, ResError> {
    match value {
        Value::Primitive(raw) => Ok(serde_json::from_str(raw.get())?),
        Value::ResourceRef(rid) => Ok(serde_json::json!({ "href": rid_to_path(rid, api_path) })),
    }
}

fn invalid_params() -> ResError {
    ResError::new(codes::INVALID_PARAMS, "Invalid parameters")
}

fn method_not_found() -> ResError {
    ResError::new(codes::METHOD_NOT_FOUND, "Method not found")
}
