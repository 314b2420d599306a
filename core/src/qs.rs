//! Querystring codec with nested keys, in the style of the `qs` package:
//! `a[b]=1` for objects and configurable array spellings.
//!
//! Encoding and decoding of individual components is delegated to
//! `url::form_urlencoded`; this module only maps between nested JSON values
//! and flat key/value pairs.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};
use url::form_urlencoded;

/// How arrays are spelled in a querystring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrayFormat {
    /// `a[0]=x&a[1]=y`
    #[default]
    Indices,
    /// `a[]=x&a[]=y`
    Brackets,
    /// `a=x&a=y`
    Repeat,
    /// `a=x,y`
    Comma,
}

/// Serializes `params` to an encoded querystring without the leading `?`.
pub fn stringify(params: &Map<String, Value>, format: ArrayFormat) -> String {
    let mut pairs = Vec::new();
    for (key, value) in params {
        flatten(key.clone(), value, format, &mut pairs);
    }
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

fn flatten(prefix: String, value: &Value, format: ArrayFormat, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                flatten(format!("{prefix}[{key}]"), nested, format, out);
            }
        }
        Value::Array(items) if format == ArrayFormat::Comma => {
            if !items.is_empty() {
                let joined = items.iter().map(scalar_text).collect::<Vec<_>>().join(",");
                out.push((prefix, joined));
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                let key = match format {
                    ArrayFormat::Indices => format!("{prefix}[{index}]"),
                    ArrayFormat::Brackets => format!("{prefix}[]"),
                    ArrayFormat::Repeat | ArrayFormat::Comma => prefix.clone(),
                };
                flatten(key, item, format, out);
            }
        }
        scalar => out.push((prefix, scalar_text(scalar))),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Highest array index `parse` accepts. Larger indices are kept as object
/// keys, so a query cannot request an arbitrarily long array.
pub const ARRAY_LIMIT: usize = 20;

/// Parses a querystring (with or without the leading `?`) into nested
/// values. Repeated keys collect into arrays; sparse indices are compacted
/// in index order.
pub fn parse(query: &str) -> Map<String, Value> {
    let mut root: BTreeMap<String, Node> = BTreeMap::new();
    let query = query.strip_prefix('?').unwrap_or(query);
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        let (key, segments) = split_key(&key);
        let value = value.into_owned();
        match root.get_mut(&key) {
            Some(node) => node.insert(&segments, value),
            None => {
                root.insert(key, Node::fresh(&segments, value));
            }
        }
    }
    root.into_iter()
        .map(|(key, node)| (key, node.into_value()))
        .collect()
}

/// `a[b][]` becomes `("a", ["b", ""])`. Keys without a well-formed bracket
/// suffix are taken literally.
fn split_key(key: &str) -> (String, Vec<String>) {
    match key.find('[') {
        Some(open) if open > 0 && key.ends_with(']') => {
            let inner = &key[open + 1..key.len() - 1];
            let segments = inner.split("][").map(str::to_string).collect();
            (key[..open].to_string(), segments)
        }
        _ => (key.to_string(), Vec::new()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Append,
    At(usize),
}

/// `[]` appends; a canonical index up to `ARRAY_LIMIT` addresses a slot.
fn slot(segment: &str) -> Option<Slot> {
    if segment.is_empty() {
        return Some(Slot::Append);
    }
    let index = segment.parse::<usize>().ok()?;
    (index <= ARRAY_LIMIT && index.to_string() == segment).then_some(Slot::At(index))
}

/// A parsed value before sparse arrays are compacted.
#[derive(Debug)]
enum Node {
    Leaf(String),
    Indexed(BTreeMap<usize, Node>),
    Keyed(BTreeMap<String, Node>),
}

impl Node {
    fn fresh(path: &[String], value: String) -> Node {
        let Some((segment, rest)) = path.split_first() else {
            return Node::Leaf(value);
        };
        let child = Node::fresh(rest, value);
        match slot(segment) {
            Some(Slot::Append) => Node::Indexed(BTreeMap::from([(0, child)])),
            Some(Slot::At(index)) => Node::Indexed(BTreeMap::from([(index, child)])),
            None => Node::Keyed(BTreeMap::from([(segment.clone(), child)])),
        }
    }

    fn insert(&mut self, path: &[String], value: String) {
        let Some((segment, rest)) = path.split_first() else {
            self.append(Node::Leaf(value));
            return;
        };
        let target = slot(segment);
        if target.is_none() {
            // A named key under an array turns it into an index-keyed object.
            if let Node::Indexed(items) = self {
                let items = std::mem::take(items);
                *self = Node::Keyed(
                    items
                        .into_iter()
                        .map(|(index, item)| (index.to_string(), item))
                        .collect(),
                );
            }
        }

        match (self, target) {
            (Node::Indexed(items), Some(Slot::Append)) => push(items, Node::fresh(rest, value)),
            (Node::Indexed(items), Some(Slot::At(index))) => {
                let occupied = items.get(&index).map(|existing| !matches!(existing, Node::Leaf(_)));
                match occupied {
                    None => {
                        items.insert(index, Node::fresh(rest, value));
                    }
                    Some(true) if !rest.is_empty() => {
                        if let Some(existing) = items.get_mut(&index) {
                            existing.insert(rest, value);
                        }
                    }
                    Some(_) => push(items, Node::fresh(rest, value)),
                }
            }
            (Node::Keyed(map), target) => {
                let key = match target {
                    Some(Slot::Append) => "0".to_string(),
                    Some(Slot::At(index)) => index.to_string(),
                    None => segment.clone(),
                };
                match map.get_mut(&key) {
                    Some(existing) => existing.insert(rest, value),
                    None => {
                        map.insert(key, Node::fresh(rest, value));
                    }
                }
            }
            (node, _) => node.append(Node::fresh(path, value)),
        }
    }

    /// Adds `node` after this value, turning a single value into an array.
    fn append(&mut self, node: Node) {
        match self {
            Node::Indexed(items) => push(items, node),
            other => {
                let previous = std::mem::replace(other, Node::Leaf(String::new()));
                *other = Node::Indexed(BTreeMap::from([(0, previous), (1, node)]));
            }
        }
    }

    fn into_value(self) -> Value {
        match self {
            Node::Leaf(text) => Value::String(text),
            Node::Indexed(items) => items.into_values().map(Node::into_value).collect(),
            Node::Keyed(map) => Value::Object(
                map.into_iter()
                    .map(|(key, node)| (key, node.into_value()))
                    .collect(),
            ),
        }
    }
}

fn push(items: &mut BTreeMap<usize, Node>, node: Node) {
    let next = items.last_key_value().map_or(0, |(index, _)| index + 1);
    items.insert(next, node);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn stringify_flat_values() {
        let params = map(json!({"a": "blue", "b": "cyan", "c": "pink"}));
        assert_eq!(stringify(&params, ArrayFormat::Indices), "a=blue&b=cyan&c=pink");
    }

    #[test]
    fn stringify_encodes_reserved_characters() {
        let params = map(json!({"a": "   ", "b": "&foo&", "c": "$$%%%%"}));
        assert_eq!(
            stringify(&params, ArrayFormat::Indices),
            "a=+++&b=%26foo%26&c=%24%24%25%25%25%25"
        );
    }

    #[test]
    fn stringify_array_formats() {
        let params = map(json!({"d": ["1", "2"]}));
        assert_eq!(stringify(&params, ArrayFormat::Indices), "d%5B0%5D=1&d%5B1%5D=2");
        assert_eq!(stringify(&params, ArrayFormat::Brackets), "d%5B%5D=1&d%5B%5D=2");
        assert_eq!(stringify(&params, ArrayFormat::Repeat), "d=1&d=2");
        assert_eq!(stringify(&params, ArrayFormat::Comma), "d=1%2C2");
    }

    #[test]
    fn stringify_nested_objects_and_scalars() {
        let params = map(json!({"user": {"name": "ann", "age": 3}, "on": true, "none": null}));
        assert_eq!(
            stringify(&params, ArrayFormat::Indices),
            "none=&on=true&user%5Bage%5D=3&user%5Bname%5D=ann"
        );
    }

    #[test]
    fn stringify_skips_empty_containers() {
        let params = map(json!({"empty": [], "nothing": {}}));
        assert_eq!(stringify(&params, ArrayFormat::Brackets), "");
    }

    #[test]
    fn parse_flat_and_repeated_keys() {
        let parsed = parse("?a=1&b=two+words&a=3");
        assert_eq!(Value::Object(parsed), json!({"a": ["1", "3"], "b": "two words"}));
    }

    #[test]
    fn parse_nested_keys() {
        let parsed = parse("user%5Bname%5D=ann&tags[]=x&tags[]=y&list[1]=b&list[0]=a");
        assert_eq!(
            Value::Object(parsed),
            json!({"user": {"name": "ann"}, "tags": ["x", "y"], "list": ["a", "b"]})
        );
    }

    #[test]
    fn parse_objects_inside_arrays() {
        let parsed = parse("rows[0][id]=1&rows[1][id]=2");
        assert_eq!(Value::Object(parsed), json!({"rows": [{"id": "1"}, {"id": "2"}]}));
    }

    #[test]
    fn parse_named_key_under_array_becomes_object() {
        let parsed = parse("a[]=x&a[b]=y");
        assert_eq!(Value::Object(parsed), json!({"a": {"0": "x", "b": "y"}}));
    }

    #[test]
    fn parse_sparse_indices_compact_in_index_order() {
        let parsed = parse("list[5]=c&list[1]=b&list[0]=a");
        assert_eq!(Value::Object(parsed), json!({"list": ["a", "b", "c"]}));
    }

    #[test]
    fn parse_indices_past_the_limit_become_keys() {
        let parsed = parse("a[20]=x&b[21]=y&c[20000000][d]=1&e[01]=z");
        assert_eq!(
            Value::Object(parsed),
            json!({
                "a": ["x"],
                "b": {"21": "y"},
                "c": {"20000000": {"d": "1"}},
                "e": {"01": "z"},
            })
        );
    }

    #[test]
    fn parse_large_index_under_existing_array_becomes_object() {
        let parsed = parse("a[0]=x&a[99999999999]=y");
        assert_eq!(Value::Object(parsed), json!({"a": {"0": "x", "99999999999": "y"}}));
    }

    #[test]
    fn parse_repeated_index_appends() {
        let parsed = parse("a[0]=x&a[0]=y&a[]=z");
        assert_eq!(Value::Object(parsed), json!({"a": ["x", "y", "z"]}));
    }

    #[test]
    fn parse_malformed_brackets_are_literal() {
        let parsed = parse("[x]=1&y[=2");
        assert_eq!(Value::Object(parsed), json!({"[x]": "1", "y[": "2"}));
    }

    #[test]
    fn array_format_deserializes_lowercase() {
        let format: ArrayFormat = serde_json::from_str("\"brackets\"").unwrap();
        assert_eq!(format, ArrayFormat::Brackets);
    }
}
