//! Structural rule selection.
//!
//! Rules live in an arena-backed tree. A child rule only ever sees events its
//! parent already accepted, and represents a more specific case of it.
//!
//! Sibling order is part of the tree's contract: when two siblings could both
//! accept the same event, the one added first wins. Authors must add mutually
//! exclusive, specific siblings before catch-all ones.

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::event::Event;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Integer,
    Object,
    Array,
    Bool,
    Any,
}

impl ValueKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            ValueKind::String => value.is_string(),
            ValueKind::Integer => value.is_i64() || value.is_u64(),
            ValueKind::Object => value.is_object(),
            ValueKind::Array => value.is_array(),
            ValueKind::Bool => value.is_boolean(),
            ValueKind::Any => true,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expect {
    Kind(ValueKind),
    Literal(Value),
    OneOf(Vec<Value>),
    Shape(Shape),
}

impl Expect {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            Expect::Kind(kind) => kind.accepts(value),
            Expect::Literal(expected) => value == expected,
            Expect::OneOf(options) => options.iter().any(|option| option == value),
            Expect::Shape(shape) => value.as_object().is_some_and(|map| shape.accepts(map)),
        }
    }
}

/// Required keys of a record, each with an expectation on its value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Shape {
    fields: Vec<(String, Expect)>,
}

impl Shape {
    /// Shape with no requirements; accepts every record.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn field(mut self, key: &str, expect: Expect) -> Self {
        self.fields.push((key.to_string(), expect));
        self
    }

    pub fn string(self, key: &str) -> Self {
        self.field(key, Expect::Kind(ValueKind::String))
    }

    pub fn integer(self, key: &str) -> Self {
        self.field(key, Expect::Kind(ValueKind::Integer))
    }

    pub fn object(self, key: &str) -> Self {
        self.field(key, Expect::Kind(ValueKind::Object))
    }

    pub fn array(self, key: &str) -> Self {
        self.field(key, Expect::Kind(ValueKind::Array))
    }

    pub fn literal(self, key: &str, value: impl Into<Value>) -> Self {
        self.field(key, Expect::Literal(value.into()))
    }

    pub fn one_of(self, key: &str, options: &[&str]) -> Self {
        let options = options.iter().map(|option| Value::from(*option)).collect();
        self.field(key, Expect::OneOf(options))
    }

    pub fn nested(self, key: &str, shape: Shape) -> Self {
        self.field(key, Expect::Shape(shape))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn accepts(&self, record: &Map<String, Value>) -> bool {
        self.fields.iter().all(|(key, expect)| {
            record
                .get(key)
                .is_some_and(|value| expect.accepts(value))
        })
    }
}

pub type Guard = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// A predicate (shape plus optional cross-field guard) paired with a value.
pub struct Rule<T> {
    name: &'static str,
    shape: Shape,
    guard: Option<Guard>,
    value: T,
}

impl<T> Rule<T> {
    pub fn new(name: &'static str, shape: Shape, value: T) -> Self {
        Self {
            name,
            shape,
            guard: None,
            value,
        }
    }

    /// Adds a condition evaluated only after the shape matched.
    pub fn with_guard<F>(mut self, guard: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.guard = Some(Arc::new(guard));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn matches(&self, event: &Event) -> bool {
        if !self.shape.accepts(event.raw()) {
            return false;
        }
        match &self.guard {
            Some(guard) => guard(event),
            None => true,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Rule<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("guarded", &self.guard.is_some())
            .field("value", &self.value)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

struct Node<T> {
    rule: Rule<T>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassificationError {
    #[error("no rendering rule matched event {event_id:?}; the root rule must accept every record")]
    Exhausted { event_id: Option<String> },
}

pub struct RuleTree<T> {
    nodes: Vec<Node<T>>,
}

impl<T> RuleTree<T> {
    /// Creates a tree whose root is the fallback rule. The root should accept
    /// every record; `select` reports `Exhausted` when it does not.
    pub fn new(root: Rule<T>) -> Self {
        Self {
            nodes: vec![Node {
                rule: root,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Appends `rule` as the last child of `parent`.
    ///
    /// # Panics
    ///
    /// Panics if `parent` was not issued by this tree.
    pub fn add_child(&mut self, parent: NodeId, rule: Rule<T>) -> NodeId {
        assert!(parent.0 < self.nodes.len(), "unknown parent node");
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            rule,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn rule(&self, id: NodeId) -> &Rule<T> {
        &self.nodes[id.0].rule
    }

    /// Rule names from the root down to `id`, for diagnostics.
    pub fn path(&self, id: NodeId) -> Vec<&'static str> {
        let mut names = Vec::new();
        let mut cursor = Some(id);
        while let Some(node) = cursor {
            names.push(self.nodes[node.0].rule.name);
            cursor = self.nodes[node.0].parent;
        }
        names.reverse();
        names
    }

    pub fn select_node(&self, event: &Event) -> Result<NodeId, ClassificationError> {
        self.descend(self.root(), event)
            .ok_or_else(|| ClassificationError::Exhausted {
                event_id: event.event_id().map(str::to_string),
            })
    }

    /// Returns the most specific rule accepting `event`.
    pub fn select(&self, event: &Event) -> Result<&Rule<T>, ClassificationError> {
        self.select_node(event).map(|id| self.rule(id))
    }

    fn descend(&self, id: NodeId, event: &Event) -> Option<NodeId> {
        let node = &self.nodes[id.0];
        if !node.rule.matches(event) {
            return None;
        }
        for child in &node.children {
            if let Some(hit) = self.descend(*child, event) {
                return Some(hit);
            }
        }
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(value: Value) -> Event {
        Event::from_value(value).unwrap()
    }

    #[test_timeout::timeout]
    fn shape_checks_kinds_literals_and_nesting() {
        let shape = Shape::any()
            .string("type")
            .integer("origin_server_ts")
            .nested("content", Shape::any().literal("msgtype", "m.text"));
        let ok = event(json!({
            "type": "m.room.message",
            "origin_server_ts": 5,
            "content": { "msgtype": "m.text" }
        }));
        let wrong_literal = event(json!({
            "type": "m.room.message",
            "origin_server_ts": 5,
            "content": { "msgtype": "m.emote" }
        }));
        let wrong_kind = event(json!({
            "type": "m.room.message",
            "origin_server_ts": "5",
            "content": { "msgtype": "m.text" }
        }));
        let not_nested = event(json!({
            "type": "m.room.message",
            "origin_server_ts": 5,
            "content": "m.text"
        }));
        assert!(shape.accepts(ok.raw()));
        assert!(!shape.accepts(wrong_literal.raw()));
        assert!(!shape.accepts(wrong_kind.raw()));
        assert!(!shape.accepts(not_nested.raw()));
    }

    #[test_timeout::timeout]
    fn one_of_accepts_listed_values_only() {
        let shape = Shape::any().one_of("membership", &["join", "leave"]);
        assert!(shape.accepts(event(json!({ "membership": "leave" })).raw()));
        assert!(!shape.accepts(event(json!({ "membership": "knock" })).raw()));
    }

    #[test_timeout::timeout]
    fn deepest_matching_rule_wins() {
        let mut tree = RuleTree::new(Rule::new("root", Shape::any(), 0));
        let kind = tree.add_child(tree.root(), Rule::new("kind", Shape::any().string("kind"), 1));
        let member = tree.add_child(kind, Rule::new("member", Shape::any().literal("kind", "member"), 2));
        tree.add_child(member, Rule::new("renamed", Shape::any().object("prev"), 3));

        let plain = event(json!({ "kind": "message" }));
        let joined = event(json!({ "kind": "member" }));
        let renamed = event(json!({ "kind": "member", "prev": {} }));
        let bare = event(json!({ "id": 1 }));

        assert_eq!(*tree.select(&plain).unwrap().value(), 1);
        assert_eq!(*tree.select(&joined).unwrap().value(), 2);
        assert_eq!(*tree.select(&renamed).unwrap().value(), 3);
        assert_eq!(*tree.select(&bare).unwrap().value(), 0);
        let node = tree.select_node(&renamed).unwrap();
        assert_eq!(tree.path(node), vec!["root", "kind", "member", "renamed"]);
    }

    #[test_timeout::timeout]
    fn failed_predicate_skips_whole_subtree() {
        let evaluated = Arc::new(AtomicUsize::new(0));
        let mut tree = RuleTree::new(Rule::new("root", Shape::any(), "root"));
        let gate = tree.add_child(
            tree.root(),
            Rule::new("gate", Shape::any().literal("kind", "member"), "gate"),
        );
        let counter = evaluated.clone();
        tree.add_child(
            gate,
            Rule::new("child", Shape::any(), "child").with_guard(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            }),
        );
        tree.add_child(tree.root(), Rule::new("sibling", Shape::any().string("kind"), "sibling"));

        let other = event(json!({ "kind": "message" }));
        assert_eq!(*tree.select(&other).unwrap().value(), "sibling");
        assert_eq!(evaluated.load(Ordering::SeqCst), 0);

        let member = event(json!({ "kind": "member" }));
        assert_eq!(*tree.select(&member).unwrap().value(), "child");
        assert_eq!(evaluated.load(Ordering::SeqCst), 1);
    }

    #[test_timeout::timeout]
    fn first_sibling_wins_ties() {
        let mut tree = RuleTree::new(Rule::new("root", Shape::any(), "root"));
        tree.add_child(tree.root(), Rule::new("first", Shape::any().string("kind"), "first"));
        tree.add_child(tree.root(), Rule::new("second", Shape::any().string("kind"), "second"));
        let record = event(json!({ "kind": "x" }));
        assert_eq!(tree.select(&record).unwrap().name(), "first");
    }

    #[test_timeout::timeout]
    fn guard_runs_only_after_shape_matches() {
        let guard_calls = Arc::new(AtomicUsize::new(0));
        let calls = guard_calls.clone();
        let rule = Rule::new("guarded", Shape::any().string("sender"), ()).with_guard(move |event| {
            calls.fetch_add(1, Ordering::SeqCst);
            event.sender() != event.state_key()
        });
        assert!(!rule.matches(&event(json!({ "state_key": "@a" }))));
        assert_eq!(guard_calls.load(Ordering::SeqCst), 0);
        assert!(rule.matches(&event(json!({ "sender": "@a", "state_key": "@b" }))));
        assert!(!rule.matches(&event(json!({ "sender": "@a", "state_key": "@a" }))));
        assert_eq!(guard_calls.load(Ordering::SeqCst), 2);
    }

    #[test_timeout::timeout]
    fn root_that_rejects_reports_exhaustion() {
        let tree = RuleTree::new(Rule::new("strict", Shape::any().string("type"), ()));
        let err = tree.select(&event(json!({ "event_id": "$e" }))).unwrap_err();
        assert_eq!(
            err,
            ClassificationError::Exhausted {
                event_id: Some("$e".to_string())
            }
        );
    }
}
