//! Structural value codec.
//!
//! Example payloads carry shapes JSON has no word for: ordered key-unique
//! maps, deduplicating sets, timestamps, pattern matchers, and values that
//! reference each other (including cycles). [`encode`] lowers a value graph
//! into a strict-JSON tree of tagged nodes; [`decode`] rebuilds the graph.
//! Encoding is total. Decoding fails only on structural corruption (a
//! dangling shared-node reference or absurd nesting); every tagged shape the
//! encoder can produce decodes without error, degrading field by field
//! (invalid timestamp -> invalid sentinel, uncompilable pattern -> weaker
//! pattern, unrecognized tag -> passed through unchanged).
//!
//! Sharing uses an explicit node-id scheme: the first visit of a node that
//! is referenced more than once emits `{"$type":"shared","id":n,"value":..}`
//! and later visits emit `{"$type":"ref","id":n}`. The decoder allocates the
//! shared node's slot before filling it, so self-reference needs no
//! recursive identity tracking.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map as JsonMap, Value};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Nesting levels tolerated when decoding untrusted trees.
pub const MAX_DECODE_DEPTH: usize = 128;

pub type NodeId = usize;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("dangling shared-node reference: {0}")]
    DanglingRef(u64),
    #[error("value nesting exceeds {MAX_DECODE_DEPTH} levels")]
    TooDeep,
}

/// One node of a decoded value graph.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Null,
    Bool(bool),
    /// Kept as a `serde_json::Number` so integers survive round trips
    /// unwidened. Non-finite floats have no representation and become null.
    Number(serde_json::Number),
    Text(String),
    Array(Vec<NodeId>),
    /// Plain JSON object; insertion order preserved.
    Object(Vec<(String, NodeId)>),
    /// Ordered key-unique associative container with arbitrary keys.
    Map(Vec<(NodeId, NodeId)>),
    /// Ordered deduplicating collection.
    Set(Vec<NodeId>),
    /// `None` is the explicit invalid-timestamp sentinel.
    Date(Option<DateTime<Utc>>),
    Pattern { source: String, flags: String },
    /// Unrepresentable input (functions, opaque handles). Omitted from
    /// containers on encode; array positions hold via an explicit tag.
    Absent,
}

impl Node {
    /// Build a number node from a float; non-finite values collapse to null.
    pub fn float(value: f64) -> Node {
        match serde_json::Number::from_f64(value) {
            Some(n) => Node::Number(n),
            None => Node::Null,
        }
    }
}

/// An arena of nodes plus a designated root. Node identity is the arena
/// index, which is what makes shared and cyclic references expressible.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValueGraph {
    nodes: Vec<Node>,
    root: Option<NodeId>,
}

impl ValueGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn set_root(&mut self, id: NodeId) {
        self.root = Some(id);
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn children(&self, id: NodeId) -> Vec<NodeId> {
        match &self.nodes[id] {
            Node::Array(items) | Node::Set(items) => items.clone(),
            Node::Object(fields) => fields.iter().map(|(_, v)| *v).collect(),
            Node::Map(entries) => entries.iter().flat_map(|(k, v)| [*k, *v]).collect(),
            _ => Vec::new(),
        }
    }
}

/// Lower a value graph into a strict-JSON tree. Never fails; unrepresentable
/// nodes are omitted from containers and everything emitted serializes with
/// plain `serde_json`.
pub fn encode(graph: &ValueGraph) -> Value {
    let Some(root) = graph.root() else {
        return Value::Null;
    };
    let mut encoder = Encoder::new(graph);
    encoder.count_refs(root);
    encoder.emit(root)
}

struct Encoder<'a> {
    graph: &'a ValueGraph,
    refs: Vec<usize>,
    ids: HashMap<NodeId, u64>,
    emitted: HashSet<NodeId>,
    next_id: u64,
}

impl<'a> Encoder<'a> {
    fn new(graph: &'a ValueGraph) -> Self {
        Self {
            graph,
            refs: vec![0; graph.len()],
            ids: HashMap::new(),
            emitted: HashSet::new(),
            next_id: 0,
        }
    }

    /// Count how often each node is reached from the root; anything reached
    /// twice gets a shared id.
    fn count_refs(&mut self, root: NodeId) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            self.refs[id] += 1;
            if self.refs[id] > 1 {
                continue;
            }
            stack.extend(self.graph.children(id));
        }
    }

    fn emit(&mut self, id: NodeId) -> Value {
        if self.refs[id] > 1 {
            if self.emitted.contains(&id) {
                let shared_id = self.ids[&id];
                return json!({ "$type": "ref", "id": shared_id });
            }
            let shared_id = self.next_id;
            self.next_id += 1;
            self.ids.insert(id, shared_id);
            // marked before descending so cycles hit the ref branch
            self.emitted.insert(id);
            let body = self.emit_body(id);
            return json!({ "$type": "shared", "id": shared_id, "value": body });
        }
        self.emit_body(id)
    }

    fn emit_body(&mut self, id: NodeId) -> Value {
        match self.graph.node(id).clone() {
            Node::Null => Value::Null,
            Node::Bool(b) => Value::Bool(b),
            Node::Number(n) => Value::Number(n),
            Node::Text(s) => Value::String(s),
            Node::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|child| match self.graph.node(*child) {
                        Node::Absent => json!({ "$type": "undefined" }),
                        _ => self.emit(*child),
                    })
                    .collect(),
            ),
            Node::Object(fields) => {
                let mut out = JsonMap::new();
                for (key, child) in &fields {
                    if matches!(self.graph.node(*child), Node::Absent) {
                        continue;
                    }
                    out.insert(key.clone(), self.emit(*child));
                }
                if out.contains_key("$type") {
                    // escape plain objects that collide with the tag space
                    return json!({ "$type": "object", "value": Value::Object(out) });
                }
                Value::Object(out)
            }
            Node::Map(entries) => {
                let mut encoded = Vec::with_capacity(entries.len());
                for (key, value) in &entries {
                    if matches!(self.graph.node(*key), Node::Absent)
                        || matches!(self.graph.node(*value), Node::Absent)
                    {
                        continue;
                    }
                    encoded.push(Value::Array(vec![self.emit(*key), self.emit(*value)]));
                }
                json!({ "$type": "map", "entries": encoded })
            }
            Node::Set(items) => {
                let members: Vec<Value> = items
                    .iter()
                    .filter(|child| !matches!(self.graph.node(**child), Node::Absent))
                    .map(|child| self.emit(*child))
                    .collect();
                json!({ "$type": "set", "values": members })
            }
            Node::Date(Some(at)) => {
                json!({ "$type": "date", "iso": at.to_rfc3339_opts(SecondsFormat::Millis, true) })
            }
            Node::Date(None) => json!({ "$type": "date", "iso": Value::Null }),
            Node::Pattern { source, flags } => {
                json!({ "$type": "regexp", "source": source, "flags": flags })
            }
            Node::Absent => json!({ "$type": "undefined" }),
        }
    }
}

/// Rebuild a value graph from an encoded tree. Plain JSON decodes
/// structurally; tagged shapes decode per their tag; unknown tags pass
/// through as plain objects.
pub fn decode(value: &Value) -> Result<ValueGraph, CodecError> {
    let mut decoder = Decoder::default();
    let root = decoder.decode_at(value, 0, None)?;
    decoder.graph.set_root(root);
    Ok(decoder.graph)
}

/// Normalize one example payload through a decode/encode round trip. Values
/// that fail structural decode are returned unchanged; sanitization of
/// entries is best effort by design.
pub fn sanitize_example(value: &Value) -> Value {
    match decode(value) {
        Ok(graph) => encode(&graph),
        Err(_) => value.clone(),
    }
}

/// Whether a tree decodes cleanly. Trash sanitization drops records whose
/// snapshot fails this check.
pub fn is_decodable(value: &Value) -> bool {
    decode(value).is_ok()
}

#[derive(Default)]
struct Decoder {
    graph: ValueGraph,
    shared: HashMap<u64, NodeId>,
}

impl Decoder {
    /// Place `node` at the caller-reserved slot, or allocate a fresh one.
    fn put(&mut self, node: Node, slot: Option<NodeId>) -> NodeId {
        match slot {
            Some(id) => {
                self.graph.nodes[id] = node;
                id
            }
            None => self.graph.push(node),
        }
    }

    fn decode_at(
        &mut self,
        value: &Value,
        depth: usize,
        slot: Option<NodeId>,
    ) -> Result<NodeId, CodecError> {
        if depth > MAX_DECODE_DEPTH {
            return Err(CodecError::TooDeep);
        }
        match value {
            Value::Null => Ok(self.put(Node::Null, slot)),
            Value::Bool(b) => Ok(self.put(Node::Bool(*b), slot)),
            Value::Number(n) => Ok(self.put(Node::Number(n.clone()), slot)),
            Value::String(s) => Ok(self.put(Node::Text(s.clone()), slot)),
            Value::Array(items) => {
                let mut children = Vec::with_capacity(items.len());
                for item in items {
                    children.push(self.decode_at(item, depth + 1, None)?);
                }
                Ok(self.put(Node::Array(children), slot))
            }
            Value::Object(fields) => match fields.get("$type").and_then(Value::as_str) {
                Some("map") => self.decode_map(value, depth, slot),
                Some("set") => self.decode_set(value, depth, slot),
                Some("date") => Ok(self.put(decode_date(value), slot)),
                Some("regexp") => Ok(self.put(decode_pattern(value), slot)),
                Some("undefined") => Ok(self.put(Node::Absent, slot)),
                Some("shared") => self.decode_shared(value, depth, slot),
                Some("ref") => self.decode_ref(value, slot),
                Some("object") => {
                    let inner = value.get("value").and_then(Value::as_object);
                    self.decode_fields(inner, depth, slot)
                }
                _ => self.decode_fields(Some(fields), depth, slot),
            },
        }
    }

    fn decode_fields(
        &mut self,
        fields: Option<&JsonMap<String, Value>>,
        depth: usize,
        slot: Option<NodeId>,
    ) -> Result<NodeId, CodecError> {
        let mut out = Vec::new();
        if let Some(fields) = fields {
            for (key, value) in fields {
                let child = self.decode_at(value, depth + 1, None)?;
                out.push((key.clone(), child));
            }
        }
        Ok(self.put(Node::Object(out), slot))
    }

    fn decode_map(
        &mut self,
        value: &Value,
        depth: usize,
        slot: Option<NodeId>,
    ) -> Result<NodeId, CodecError> {
        let raw_entries = value
            .get("entries")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let mut entries: Vec<(NodeId, NodeId)> = Vec::with_capacity(raw_entries.len());
        let mut positions: HashMap<String, usize> = HashMap::new();
        for raw in raw_entries {
            let Some(pair) = raw.as_array().filter(|p| p.len() >= 2) else {
                continue; // malformed entry, skip rather than abort
            };
            let key = self.decode_at(&pair[0], depth + 1, None)?;
            let val = self.decode_at(&pair[1], depth + 1, None)?;
            match primitive_fingerprint(&pair[0]) {
                Some(print) => match positions.get(&print).copied() {
                    // key-unique: the latest write wins, the first position holds
                    Some(at) => entries[at].1 = val,
                    None => {
                        positions.insert(print, entries.len());
                        entries.push((key, val));
                    }
                },
                None => entries.push((key, val)),
            }
        }
        Ok(self.put(Node::Map(entries), slot))
    }

    fn decode_set(
        &mut self,
        value: &Value,
        depth: usize,
        slot: Option<NodeId>,
    ) -> Result<NodeId, CodecError> {
        let raw_members = value
            .get("values")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let mut members = Vec::with_capacity(raw_members.len());
        let mut seen: HashSet<String> = HashSet::new();
        for raw in raw_members {
            if let Some(print) = primitive_fingerprint(raw) {
                if !seen.insert(print) {
                    continue;
                }
            }
            members.push(self.decode_at(raw, depth + 1, None)?);
        }
        Ok(self.put(Node::Set(members), slot))
    }

    fn decode_shared(
        &mut self,
        value: &Value,
        depth: usize,
        slot: Option<NodeId>,
    ) -> Result<NodeId, CodecError> {
        let body = value.get("value").unwrap_or(&Value::Null);
        let Some(id) = value.get("id").and_then(Value::as_u64) else {
            // no usable id: decode the payload as if it were unshared
            return self.decode_at(body, depth + 1, slot);
        };
        let target = self.put(Node::Null, slot);
        self.shared.insert(id, target);
        self.decode_at(body, depth + 1, Some(target))
    }

    fn decode_ref(&mut self, value: &Value, slot: Option<NodeId>) -> Result<NodeId, CodecError> {
        let id = value.get("id").and_then(Value::as_u64).unwrap_or(u64::MAX);
        let Some(&target) = self.shared.get(&id) else {
            return Err(CodecError::DanglingRef(id));
        };
        if let Some(extra) = slot {
            self.graph.nodes[extra] = Node::Null;
        }
        Ok(target)
    }
}

fn decode_date(value: &Value) -> Node {
    let parsed = value
        .get("iso")
        .and_then(Value::as_str)
        .and_then(|iso| DateTime::parse_from_rfc3339(iso).ok())
        .map(|at| at.with_timezone(&Utc));
    Node::Date(parsed)
}

fn decode_pattern(value: &Value) -> Node {
    let source = value.get("source").and_then(Value::as_str).unwrap_or_default();
    let flags = value.get("flags").and_then(Value::as_str).unwrap_or_default();
    let (source, flags) = compile_fallback(source, flags);
    Node::Pattern { source, flags }
}

/// Validate a pattern by compiling it: exact flags, then no flags, then the
/// empty pattern. Never fails.
fn compile_fallback(source: &str, flags: &str) -> (String, String) {
    if build_regex(source, flags).is_some() {
        return (source.to_string(), flags.to_string());
    }
    if build_regex(source, "").is_some() {
        return (source.to_string(), String::new());
    }
    (String::new(), String::new())
}

fn build_regex(source: &str, flags: &str) -> Option<regex::Regex> {
    let mut builder = regex::RegexBuilder::new(source);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            // valid source flags with no engine-side meaning here
            'd' | 'g' | 'u' | 'v' | 'y' => {}
            _ => return None,
        }
    }
    builder.build().ok()
}

/// Identity stand-in for container dedup: primitives compare by value,
/// references by target id; composite literals are distinct members.
fn primitive_fingerprint(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            Some(value.to_string())
        }
        Value::Object(fields) => {
            if fields.get("$type").and_then(Value::as_str) == Some("ref") {
                return Some(value.to_string());
            }
            None
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(graph: &mut ValueGraph, s: &str) -> NodeId {
        graph.push(Node::Text(s.into()))
    }

    fn set_of(graph: &mut ValueGraph, members: &[&str]) -> NodeId {
        let ids: Vec<NodeId> = members.iter().map(|m| text(graph, m)).collect();
        graph.push(Node::Set(ids))
    }

    fn member_texts(graph: &ValueGraph, id: NodeId) -> Vec<String> {
        let Node::Set(members) = graph.node(id) else {
            panic!("expected set node");
        };
        members
            .iter()
            .map(|m| match graph.node(*m) {
                Node::Text(s) => s.clone(),
                other => panic!("expected text member, got {other:?}"),
            })
            .collect()
    }

    #[test]
    fn map_of_sets_round_trips() -> Result<(), CodecError> {
        let mut graph = ValueGraph::new();
        let key_a = text(&mut graph, "a");
        let key_b = text(&mut graph, "b");
        let set_ab = set_of(&mut graph, &["x", "y"]);
        let set_b = set_of(&mut graph, &["z"]);
        let root = graph.push(Node::Map(vec![(key_a, set_ab), (key_b, set_b)]));
        graph.set_root(root);

        let tree = encode(&graph);
        assert_eq!(tree["$type"], "map");

        let back = decode(&tree)?;
        let Node::Map(entries) = back.node(back.root().unwrap()) else {
            panic!("expected map root");
        };
        assert_eq!(entries.len(), 2);
        let keys: Vec<_> = entries
            .iter()
            .map(|(k, _)| match back.node(*k) {
                Node::Text(s) => s.clone(),
                other => panic!("expected text key, got {other:?}"),
            })
            .collect();
        assert_eq!(keys, ["a", "b"]); // key order preserved

        let mut first = member_texts(&back, entries[0].1);
        first.sort();
        assert_eq!(first, ["x", "y"]); // member set equal, order not promised
        assert_eq!(member_texts(&back, entries[1].1), ["z"]);
        Ok(())
    }

    #[test]
    fn self_reference_encodes_and_decodes_with_identity() -> Result<(), CodecError> {
        let mut graph = ValueGraph::new();
        let key = text(&mut graph, "self");
        let root = graph.push(Node::Map(vec![]));
        // tie the knot after allocation
        if let Node::Map(entries) = &mut graph.nodes[root] {
            entries.push((key, root));
        }
        graph.set_root(root);

        let tree = encode(&graph);
        assert_eq!(tree["$type"], "shared");
        assert_eq!(tree["value"]["entries"][0][1]["$type"], "ref");

        let back = decode(&tree)?;
        let root_id = back.root().unwrap();
        let Node::Map(entries) = back.node(root_id) else {
            panic!("expected map root");
        };
        assert_eq!(entries[0].1, root_id); // decoded self-reference is identical
        Ok(())
    }

    #[test]
    fn shared_nodes_are_encoded_once() -> Result<(), CodecError> {
        let mut graph = ValueGraph::new();
        let inner = graph.push(Node::Object(vec![]));
        let root = graph.push(Node::Array(vec![inner, inner]));
        graph.set_root(root);

        let tree = encode(&graph);
        assert_eq!(tree[0]["$type"], "shared");
        assert_eq!(tree[1]["$type"], "ref");
        assert_eq!(tree[0]["id"], tree[1]["id"]);

        let back = decode(&tree)?;
        let Node::Array(items) = back.node(back.root().unwrap()) else {
            panic!("expected array root");
        };
        assert_eq!(items[0], items[1]);
        Ok(())
    }

    #[test]
    fn invalid_dates_become_the_sentinel() -> Result<(), CodecError> {
        let back = decode(&json!({ "$type": "date", "iso": "not-a-date" }))?;
        assert_eq!(back.node(back.root().unwrap()), &Node::Date(None));

        let back = decode(&json!({ "$type": "date", "iso": null }))?;
        assert_eq!(back.node(back.root().unwrap()), &Node::Date(None));

        // valid timestamps survive a full round trip
        let tree = json!({ "$type": "date", "iso": "2024-05-01T12:30:00.000Z" });
        let graph = decode(&tree)?;
        assert_eq!(encode(&graph), tree);
        Ok(())
    }

    #[test]
    fn pattern_decode_degrades_without_error() -> Result<(), CodecError> {
        let back = decode(&json!({ "$type": "regexp", "source": "a+", "flags": "gi" }))?;
        assert_eq!(
            back.node(back.root().unwrap()),
            &Node::Pattern { source: "a+".into(), flags: "gi".into() }
        );

        // bogus flag: source kept, flags dropped
        let back = decode(&json!({ "$type": "regexp", "source": "a+", "flags": "q" }))?;
        assert_eq!(
            back.node(back.root().unwrap()),
            &Node::Pattern { source: "a+".into(), flags: String::new() }
        );

        // uncompilable source: empty pattern
        let back = decode(&json!({ "$type": "regexp", "source": "(", "flags": "" }))?;
        assert_eq!(
            back.node(back.root().unwrap()),
            &Node::Pattern { source: String::new(), flags: String::new() }
        );
        Ok(())
    }

    #[test]
    fn absent_members_are_omitted_but_array_positions_hold() {
        let mut graph = ValueGraph::new();
        let gone = graph.push(Node::Absent);
        let kept = text(&mut graph, "kept");
        let obj = graph.push(Node::Object(vec![("a".into(), gone), ("b".into(), kept)]));
        let arr = graph.push(Node::Array(vec![gone, kept]));
        let root = graph.push(Node::Object(vec![("o".into(), obj), ("l".into(), arr)]));
        graph.set_root(root);

        let tree = encode(&graph);
        assert!(tree["o"].get("a").is_none());
        assert_eq!(tree["o"]["b"], "kept");
        assert_eq!(tree["l"][0]["$type"], "undefined");
        assert_eq!(tree["l"][1], "kept");
    }

    #[test]
    fn unrecognized_tags_pass_through_unchanged() -> Result<(), CodecError> {
        let tree = json!({ "$type": "mystery", "x": 1 });
        let graph = decode(&tree)?;
        assert_eq!(encode(&graph), json!({ "$type": "object", "value": tree }));

        // and the escaped form is stable from then on
        let once = encode(&graph);
        assert_eq!(encode(&decode(&once)?), once);
        Ok(())
    }

    #[test]
    fn sanitize_preserves_integers_and_key_order() {
        let payload = json!({ "z": 1, "a": { "nested": [1, 2.5, "three", true, null] } });
        assert_eq!(sanitize_example(&payload), payload);
    }

    #[test]
    fn sets_dedupe_primitives_on_decode() -> Result<(), CodecError> {
        let back = decode(&json!({ "$type": "set", "values": ["x", "x", 1, 1, "y"] }))?;
        let Node::Set(members) = back.node(back.root().unwrap()) else {
            panic!("expected set root");
        };
        assert_eq!(members.len(), 3);
        Ok(())
    }

    #[test]
    fn map_keys_are_unique_with_last_value_winning() -> Result<(), CodecError> {
        let tree = json!({ "$type": "map", "entries": [["k", 1], ["k", 2], ["j", 3]] });
        let back = decode(&tree)?;
        let Node::Map(entries) = back.node(back.root().unwrap()) else {
            panic!("expected map root");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(back.node(entries[0].1), &Node::Number(2.into()));
        Ok(())
    }

    #[test]
    fn dangling_refs_and_deep_nesting_are_errors() {
        assert_eq!(
            decode(&json!({ "$type": "ref", "id": 42 })),
            Err(CodecError::DanglingRef(42))
        );

        let mut deep = json!("leaf");
        for _ in 0..(MAX_DECODE_DEPTH + 10) {
            deep = json!([deep]);
        }
        assert_eq!(decode(&deep), Err(CodecError::TooDeep));

        // sanitize falls back to the raw value instead of failing
        let bad = json!({ "$type": "ref", "id": 42 });
        assert_eq!(sanitize_example(&bad), bad);
        assert!(!is_decodable(&bad));
    }
}
