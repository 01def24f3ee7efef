//! Graph flattening: renders a live subscription and everything reachable
//! from it into one JSON document.
//!
//! Traversal is depth-first over an explicit frame stack. The stack doubles
//! as the ancestor path: a reference to any RID currently on the stack is
//! written as a `{"rid": ...}` stub instead of being expanded. There is no
//! global visited set, so a resource reachable along two acyclic paths is
//! rendered in full under both.

use std::sync::Arc;

use resbridge_core::{ResError, ResourceState, Value};
use serde_json::value::RawValue;

use crate::traits::Subscription;

/// Errors that abort a flattening pass.
#[derive(Debug, thiserror::Error)]
pub enum FlattenError {
    #[error("resource graph exceeds maximum depth of {limit} at {rid}")]
    DepthExceeded { limit: usize, rid: String },
    #[error("failed to encode flattened resource: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("flattened resource is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl From<FlattenError> for ResError {
    fn from(err: FlattenError) -> Self {
        ResError::internal(err.to_string())
    }
}

/// One resource being rendered.
struct Frame {
    rid: String,
    subscription: Arc<dyn Subscription>,
    /// Field name (models only) and value, in output order.
    entries: Vec<(Option<String>, Value)>,
    next: usize,
    close: u8,
}

/// Single-use encoder for one flattening pass.
pub struct GraphFlattener {
    buf: Vec<u8>,
    stack: Vec<Frame>,
    max_depth: usize,
}

impl GraphFlattener {
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self {
            buf: Vec::new(),
            stack: Vec::new(),
            max_depth,
        }
    }

    /// Renders `root` and its reachable graph.
    ///
    /// # Errors
    ///
    /// Returns [`FlattenError::DepthExceeded`] if the ancestor path grows
    /// beyond the configured depth, or an encoding error if a field name or
    /// resolver-supplied fragment cannot be written as JSON.
    pub fn encode(mut self, root: &Arc<dyn Subscription>) -> Result<Box<RawValue>, FlattenError> {
        self.enter(Arc::clone(root))?;

        while let Some(frame) = self.stack.last_mut() {
            if frame.next == frame.entries.len() {
                self.buf.push(frame.close);
                self.stack.pop();
                continue;
            }

            let index = frame.next;
            frame.next += 1;
            if index > 0 {
                self.buf.push(b',');
            }

            let (key, value) = &frame.entries[index];
            if let Some(key) = key {
                serde_json::to_writer(&mut self.buf, key)?;
                self.buf.push(b':');
            }

            let reference = match value {
                Value::Primitive(raw) => {
                    self.buf.extend_from_slice(raw.get().as_bytes());
                    None
                }
                Value::ResourceRef(rid) => Some(frame.subscription.child(rid)),
            };

            match reference {
                None => {}
                Some(Some(child)) => self.enter(child)?,
                Some(None) => self.write_error(&ResError::not_found())?,
            }
        }

        let json = String::from_utf8(self.buf)?;
        Ok(RawValue::from_string(json)?)
    }

    /// Starts rendering a resource: writes a stub or an error in place, or
    /// opens a new frame.
    fn enter(&mut self, subscription: Arc<dyn Subscription>) -> Result<(), FlattenError> {
        let rid = subscription.rid().to_string();

        if self.stack.iter().any(|frame| frame.rid == rid) {
            self.buf.extend_from_slice(br#"{"rid":"#);
            serde_json::to_writer(&mut self.buf, &rid)?;
            self.buf.push(b'}');
            return Ok(());
        }

        let (open, close, entries) = match subscription.state() {
            ResourceState::Error(err) => return self.write_error(&err),
            ResourceState::Collection(values) => (
                b'[',
                b']',
                values.into_iter().map(|value| (None, value)).collect(),
            ),
            ResourceState::Model(fields) => (
                b'{',
                b'}',
                fields
                    .into_iter()
                    .map(|(key, value)| (Some(key), value))
                    .collect(),
            ),
        };

        if self.stack.len() >= self.max_depth {
            return Err(FlattenError::DepthExceeded {
                limit: self.max_depth,
                rid,
            });
        }

        self.buf.push(open);
        self.stack.push(Frame {
            rid,
            subscription,
            entries,
            next: 0,
            close,
        });
        Ok(())
    }

    fn write_error(&mut self, err: &ResError) -> Result<(), FlattenError> {
        serde_json::to_writer(&mut self.buf, err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use super::*;

    /// Static resource graph keyed by RID.
    #[derive(Default)]
    struct Graph {
        states: HashMap<String, ResourceState>,
    }

    struct Node {
        rid: String,
        graph: Arc<Graph>,
    }

    impl Subscription for Node {
        fn rid(&self) -> &str {
            &self.rid
        }

        fn state(&self) -> ResourceState {
            self.graph.states[&self.rid].clone()
        }

        fn child(&self, rid: &str) -> Option<Arc<dyn Subscription>> {
            self.graph.states.contains_key(rid).then(|| {
                Arc::new(Node {
                    rid: rid.to_string(),
                    graph: Arc::clone(&self.graph),
                }) as Arc<dyn Subscription>
            })
        }

        fn release(&self) {}
    }

    fn prim(json: &str) -> Value {
        Value::Primitive(RawValue::from_string(json.to_string()).unwrap())
    }

    fn model(fields: &[(&str, Value)]) -> ResourceState {
        ResourceState::Model(
            fields
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn flatten(states: Vec<(&str, ResourceState)>, root: &str, max_depth: usize) -> Result<String, FlattenError> {
        let graph = Arc::new(Graph {
            states: states
                .into_iter()
                .map(|(rid, state)| (rid.to_string(), state))
                .collect(),
        });
        let root: Arc<dyn Subscription> = Arc::new(Node {
            rid: root.to_string(),
            graph,
        });
        GraphFlattener::new(max_depth)
            .encode(&root)
            .map(|raw| raw.get().to_string())
    }

    #[test]
    fn renders_model_with_primitives() {
        let out = flatten(
            vec![("users.42", model(&[("name", prim(r#""Alice""#)), ("age", prim("30"))]))],
            "users.42",
            16,
        )
        .unwrap();
        assert_eq!(out, r#"{"age":30,"name":"Alice"}"#);
    }

    #[test]
    fn renders_collection_in_order() {
        let out = flatten(
            vec![
                (
                    "todos",
                    ResourceState::Collection(vec![
                        Value::reference("todos.2"),
                        prim("\"loose\""),
                        Value::reference("todos.1"),
                    ]),
                ),
                ("todos.1", model(&[("text", prim(r#""a""#))])),
                ("todos.2", model(&[("text", prim(r#""b""#))])),
            ],
            "todos",
            16,
        )
        .unwrap();
        assert_eq!(out, r#"[{"text":"b"},"loose",{"text":"a"}]"#);
    }

    #[test]
    fn empty_shapes() {
        assert_eq!(
            flatten(vec![("a", ResourceState::Collection(vec![]))], "a", 4).unwrap(),
            "[]"
        );
        assert_eq!(flatten(vec![("a", model(&[]))], "a", 4).unwrap(), "{}");
    }

    #[test]
    fn cycle_renders_stub() {
        let out = flatten(
            vec![
                ("A", model(&[("b", Value::reference("B")), ("name", prim(r#""a""#))])),
                ("B", model(&[("a", Value::reference("A"))])),
            ],
            "A",
            16,
        )
        .unwrap();
        assert_eq!(out, r#"{"b":{"a":{"rid":"A"}},"name":"a"}"#);
    }

    #[test]
    fn self_reference_renders_stub() {
        let out = flatten(
            vec![("A", ResourceState::Collection(vec![Value::reference("A"), prim("1")]))],
            "A",
            16,
        )
        .unwrap();
        assert_eq!(out, r#"[{"rid":"A"},1]"#);
    }

    #[test]
    fn diamond_is_expanded_under_each_path() {
        let out = flatten(
            vec![
                ("A", model(&[("b", Value::reference("B")), ("c", Value::reference("C"))])),
                ("B", model(&[("d", Value::reference("D"))])),
                ("C", model(&[("d", Value::reference("D"))])),
                ("D", model(&[("v", prim("1"))])),
            ],
            "A",
            16,
        )
        .unwrap();
        assert_eq!(out, r#"{"b":{"d":{"v":1}},"c":{"d":{"v":1}}}"#);
    }

    #[test]
    fn sibling_after_returning_from_cycle_is_expanded() {
        // B is on the path only while rendering the first slot.
        let out = flatten(
            vec![
                (
                    "A",
                    ResourceState::Collection(vec![Value::reference("B"), Value::reference("B")]),
                ),
                ("B", model(&[("up", Value::reference("A"))])),
            ],
            "A",
            16,
        )
        .unwrap();
        assert_eq!(out, r#"[{"up":{"rid":"A"}},{"up":{"rid":"A"}}]"#);
    }

    #[test]
    fn error_node_substitutes_slot() {
        let out = flatten(
            vec![
                (
                    "A",
                    model(&[
                        ("bad", Value::reference("X")),
                        ("good", Value::reference("Y")),
                    ]),
                ),
                ("X", ResourceState::Error(ResError::access_denied())),
                ("Y", model(&[("ok", prim("true"))])),
            ],
            "A",
            16,
        )
        .unwrap();
        assert_eq!(
            out,
            r#"{"bad":{"code":"system.accessDenied","message":"Access denied"},"good":{"ok":true}}"#
        );
    }

    #[test]
    fn missing_child_renders_not_found() {
        let out = flatten(
            vec![("A", ResourceState::Collection(vec![Value::reference("gone"), prim("2")]))],
            "A",
            16,
        )
        .unwrap();
        assert_eq!(
            out,
            r#"[{"code":"system.notFound","message":"Not found"},2]"#
        );
    }

    #[test]
    fn field_names_are_escaped() {
        let out = flatten(vec![("A", model(&[("say \"hi\"", prim("1"))]))], "A", 4).unwrap();
        assert_eq!(out, r#"{"say \"hi\"":1}"#);
    }

    #[test]
    fn output_order_is_stable_across_passes() {
        let states = || {
            vec![(
                "A",
                model(&[("z", prim("1")), ("a", prim("2")), ("m", prim("3"))]),
            )]
        };
        let first = flatten(states(), "A", 4).unwrap();
        let second = flatten(states(), "A", 4).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, r#"{"a":2,"m":3,"z":1}"#);
    }

    #[test]
    fn depth_limit_aborts() {
        let states = vec![
            ("a", model(&[("next", Value::reference("b"))])),
            ("b", model(&[("next", Value::reference("c"))])),
            ("c", model(&[("next", Value::reference("d"))])),
            ("d", model(&[])),
        ];
        let err = flatten(states, "a", 3).unwrap_err();
        assert!(matches!(
            err,
            FlattenError::DepthExceeded { limit: 3, ref rid } if rid == "d"
        ));
        let as_res: ResError = err.into();
        assert_eq!(as_res.code, resbridge_core::codes::INTERNAL_ERROR);
    }

    #[test]
    fn deep_chain_within_limit() {
        let mut states = Vec::new();
        let names: Vec<String> = (0..500).map(|i| format!("n.{i}")).collect();
        for (i, name) in names.iter().enumerate() {
            let fields = match names.get(i + 1) {
                Some(next) => model(&[("next", Value::reference(next.clone()))]),
                None => model(&[("end", prim("true"))]),
            };
            states.push((name.as_str(), fields));
        }
        let out = flatten(states, "n.0", 1000).unwrap();
        assert!(out.ends_with(&format!(r#"{{"end":true}}{}"#, "}".repeat(499))));
    }
}
