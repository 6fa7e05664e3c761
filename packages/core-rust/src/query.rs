//! Query-string normalization.
//!
//! Parses the raw query portion of a URL into a nested [`QueryMap`] using
//! `qs`-style bracket conventions, and coerces every scalar value: numerals
//! become numbers, reserved keywords become primitives, anything else stays
//! a string.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};

/// Integer or decimal numeral without sign or exponent (`12`, `0.5`, `.5`).
static NUMERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+|\d*\.\d+)$").expect("numeral pattern compiles"));

/// Normalized query mapping keyed by parameter name.
pub type QueryMap = BTreeMap<String, QueryValue>;

// ---------------------------------------------------------------------------
// QueryValue
// ---------------------------------------------------------------------------

/// A decoded query value after coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    /// The unset sentinel (`undefined`).
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<QueryValue>),
    Map(QueryMap),
}

impl QueryValue {
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[QueryValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&QueryMap> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Looks up a key when this value is a map.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&QueryValue> {
        self.as_map().and_then(|entries| entries.get(key))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }
}

/// Serializes like `JSON.stringify`: `undefined` map entries are omitted and
/// `undefined` array items become `null`. Integral numbers serialize as integers.
impl Serialize for QueryValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Undefined | Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => serialize_number(*n, serializer),
            Self::String(s) => serializer.serialize_str(s),
            Self::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(entries) => {
                let mut map = serializer.serialize_map(None)?;
                for (key, value) in entries.iter().filter(|(_, v)| !v.is_undefined()) {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn serialize_number<S: Serializer>(n: f64, serializer: S) -> Result<S::Ok, S::Error> {
    // 2^53: beyond this an f64 no longer holds every integer exactly.
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        serializer.serialize_i64(n as i64)
    } else {
        serializer.serialize_f64(n)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Primitive a reserved keyword normalizes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Keyword {
    True,
    False,
    Null,
    Undefined,
}

impl Keyword {
    #[must_use]
    pub fn value(self) -> QueryValue {
        match self {
            Self::True => QueryValue::Bool(true),
            Self::False => QueryValue::Bool(false),
            Self::Null => QueryValue::Null,
            Self::Undefined => QueryValue::Undefined,
        }
    }
}

/// Query parser settings (`querystringParser` in the configuration file).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryParserConfig {
    /// Highest explicit index (`a[i]`) still treated as an array slot.
    pub array_limit: usize,
    /// Maximum bracket nesting depth; deeper segments collapse into one key.
    pub depth: usize,
    /// Maximum number of `key=value` pairs honoured per query string.
    pub parameter_limit: usize,
    /// Raw token -> primitive table applied to scalar values.
    pub keywords: BTreeMap<String, Keyword>,
}

impl Default for QueryParserConfig {
    fn default() -> Self {
        Self {
            array_limit: 10_000,
            depth: 5,
            parameter_limit: 20_000,
            keywords: default_keywords(),
        }
    }
}

fn default_keywords() -> BTreeMap<String, Keyword> {
    [
        ("true", Keyword::True),
        ("false", Keyword::False),
        ("null", Keyword::Null),
        ("undefined", Keyword::Undefined),
    ]
    .into_iter()
    .map(|(token, keyword)| (token.to_owned(), keyword))
    .collect()
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parses a raw query string (with or without the leading `?`).
#[must_use]
pub fn parse_query(raw: &str, config: &QueryParserConfig) -> QueryMap {
    let raw = raw.strip_prefix('?').unwrap_or(raw);
    let mut root: BTreeMap<String, Node> = BTreeMap::new();

    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()).take(config.parameter_limit) {
        if key.is_empty() {
            continue;
        }
        let (head, segments) = split_key(&key, config.depth);
        let value = normalize_scalar(&value, config);
        let slot = root.remove(&head);
        root.insert(head, insert(slot, &segments, value, config));
    }

    root.into_iter()
        .map(|(key, node)| (key, node.into_value()))
        .collect()
}

/// Coerces one decoded scalar: numeral, then keyword, then plain string.
#[must_use]
pub fn normalize_scalar(raw: &str, config: &QueryParserConfig) -> QueryValue {
    if NUMERAL.is_match(raw) {
        if let Ok(number) = raw.parse::<f64>() {
            return QueryValue::Number(number);
        }
    }
    if let Some(keyword) = config.keywords.get(raw) {
        return keyword.value();
    }
    QueryValue::String(raw.to_owned())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// `[]`
    Push,
    /// `[3]`
    Index(usize),
    /// `[name]`
    Key(String),
}

/// Splits `a[b][0][]` into the head `a` and its bracket segments.
///
/// Keys that start with `[` or contain unbalanced brackets are taken literally.
fn split_key(key: &str, depth: usize) -> (String, Vec<Segment>) {
    let open = match key.find('[') {
        Some(open) if open > 0 => open,
        _ => return (key.to_owned(), Vec::new()),
    };

    let head = key[..open].to_owned();
    let mut segments = Vec::new();
    let mut rest = &key[open..];

    while !rest.is_empty() {
        if segments.len() == depth || !rest.starts_with('[') {
            segments.push(Segment::Key(rest.to_owned()));
            break;
        }
        let Some(close) = rest.find(']') else {
            return (key.to_owned(), Vec::new());
        };
        let inner = &rest[1..close];
        if inner.contains('[') {
            return (key.to_owned(), Vec::new());
        }
        segments.push(classify_segment(inner));
        rest = &rest[close + 1..];
    }

    (head, segments)
}

fn classify_segment(inner: &str) -> Segment {
    if inner.is_empty() {
        return Segment::Push;
    }
    match inner.parse::<usize>() {
        // Only canonical indices: `01` stays a map key.
        Ok(index) if index.to_string() == inner => Segment::Index(index),
        _ => Segment::Key(inner.to_owned()),
    }
}

/// Intermediate tree; `Indexed` keeps sparse positions until compaction.
#[derive(Debug)]
enum Node {
    Leaf(QueryValue),
    List(Vec<Node>),
    Indexed(BTreeMap<usize, Node>),
    Map(BTreeMap<String, Node>),
}

impl Node {
    fn into_value(self) -> QueryValue {
        match self {
            Self::Leaf(value) => value,
            Self::List(items) => QueryValue::Array(items.into_iter().map(Node::into_value).collect()),
            Self::Indexed(items) => {
                QueryValue::Array(items.into_values().map(Node::into_value).collect())
            }
            Self::Map(entries) => QueryValue::Map(
                entries
                    .into_iter()
                    .map(|(key, node)| (key, node.into_value()))
                    .collect(),
            ),
        }
    }
}

/// Appends `node` to whatever already occupies the slot.
///
/// A map absorbs a scalar as a `true` flag keyed by the scalar's text, so
/// `a[b]=1&a=2` yields `{"b":1,"2":true}`. A pushed element joins a map
/// under key `"0"`, the index it would have had in a fresh array.
fn combine(slot: Option<Node>, node: Node) -> Node {
    match slot {
        None => node,
        Some(Node::List(mut items)) => {
            items.push(node);
            Node::List(items)
        }
        Some(Node::Indexed(mut items)) => {
            let next = items.keys().next_back().map_or(0, |last| last + 1);
            items.insert(next, node);
            Node::Indexed(items)
        }
        Some(Node::Map(mut entries)) => {
            match node {
                Node::Leaf(value) => {
                    entries.insert(flag_key(&value), Node::Leaf(QueryValue::Bool(true)));
                }
                element => return push_into_map(entries, element),
            }
            Node::Map(entries)
        }
        Some(leaf @ Node::Leaf(_)) => Node::List(vec![leaf, node]),
    }
}

fn push_into_map(mut entries: BTreeMap<String, Node>, element: Node) -> Node {
    let existing = entries.remove("0");
    entries.insert("0".to_owned(), combine(existing, element));
    Node::Map(entries)
}

/// Text of a scalar used as a map key.
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn flag_key(value: &QueryValue) -> String {
    match value {
        QueryValue::Undefined => "undefined".to_owned(),
        QueryValue::Null => "null".to_owned(),
        QueryValue::Bool(b) => b.to_string(),
        QueryValue::Number(n) if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 => {
            (*n as i64).to_string()
        }
        QueryValue::Number(n) => n.to_string(),
        QueryValue::String(text) => text.clone(),
        QueryValue::Array(_) | QueryValue::Map(_) => String::new(),
    }
}

fn insert(
    slot: Option<Node>,
    segments: &[Segment],
    value: QueryValue,
    config: &QueryParserConfig,
) -> Node {
    let Some((segment, rest)) = segments.split_first() else {
        return combine(slot, Node::Leaf(value));
    };

    match segment {
        Segment::Push => {
            let child = insert(None, rest, value, config);
            match slot {
                None => Node::List(vec![child]),
                Some(Node::Map(entries)) => push_into_map(entries, child),
                occupied => combine(occupied, child),
            }
        }
        Segment::Index(index) if *index <= config.array_limit => {
            let mut items = match slot {
                None => BTreeMap::new(),
                Some(Node::Indexed(items)) => items,
                Some(Node::List(items)) => items.into_iter().enumerate().collect(),
                Some(Node::Map(entries)) => {
                    return insert_key(Some(Node::Map(entries)), &index.to_string(), rest, value, config);
                }
                Some(leaf @ Node::Leaf(_)) => {
                    return combine(Some(leaf), insert(None, segments, value, config));
                }
            };
            let child = items.remove(index);
            items.insert(*index, insert(child, rest, value, config));
            Node::Indexed(items)
        }
        Segment::Index(index) => insert_key(slot, &index.to_string(), rest, value, config),
        Segment::Key(key) => insert_key(slot, key, rest, value, config),
    }
}

fn insert_key(
    slot: Option<Node>,
    key: &str,
    rest: &[Segment],
    value: QueryValue,
    config: &QueryParserConfig,
) -> Node {
    let mut entries = match slot {
        None => BTreeMap::new(),
        Some(Node::Map(entries)) => entries,
        Some(Node::Indexed(items)) => items
            .into_iter()
            .map(|(index, node)| (index.to_string(), node))
            .collect(),
        Some(Node::List(items)) => items
            .into_iter()
            .enumerate()
            .map(|(index, node)| (index.to_string(), node))
            .collect(),
        Some(leaf @ Node::Leaf(_)) => {
            return combine(Some(leaf), insert_key(None, key, rest, value, config));
        }
    };
    let child = entries.remove(key);
    entries.insert(key.to_owned(), insert(child, rest, value, config));
    Node::Map(entries)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn parse(raw: &str) -> QueryMap {
        parse_query(raw, &QueryParserConfig::default())
    }

    #[test]
    fn numerals_become_numbers() {
        let q = parse("a=12&b=0.5&c=.25&d=007");
        assert_eq!(q["a"], QueryValue::Number(12.0));
        assert_eq!(q["b"], QueryValue::Number(0.5));
        assert_eq!(q["c"], QueryValue::Number(0.25));
        assert_eq!(q["d"], QueryValue::Number(7.0));
    }

    #[test]
    fn signed_and_exponent_forms_stay_strings() {
        let q = parse("a=-1&b=1e5&c=1.&d=1.2.3");
        assert_eq!(q["a"].as_str(), Some("-1"));
        assert_eq!(q["b"].as_str(), Some("1e5"));
        assert_eq!(q["c"].as_str(), Some("1."));
        assert_eq!(q["d"].as_str(), Some("1.2.3"));
    }

    #[test]
    fn keywords_become_primitives() {
        let q = parse("t=true&f=false&n=null&u=undefined&s=True");
        assert_eq!(q["t"], QueryValue::Bool(true));
        assert_eq!(q["f"], QueryValue::Bool(false));
        assert!(q["n"].is_null());
        assert!(q["u"].is_undefined());
        assert_eq!(q["s"].as_str(), Some("True"));
    }

    #[test]
    fn custom_keyword_table() {
        let mut config = QueryParserConfig::default();
        config.keywords.insert("yes".to_owned(), Keyword::True);
        config.keywords.remove("null");
        let q = parse_query("a=yes&b=null", &config);
        assert_eq!(q["a"], QueryValue::Bool(true));
        assert_eq!(q["b"].as_str(), Some("null"));
    }

    #[test]
    fn percent_and_plus_decoding() {
        let q = parse("name=John+Doe&city=S%C3%A3o%20Paulo&n=%31%32");
        assert_eq!(q["name"].as_str(), Some("John Doe"));
        assert_eq!(q["city"].as_str(), Some("São Paulo"));
        assert_eq!(q["n"], QueryValue::Number(12.0));
    }

    #[test]
    fn leading_question_mark_and_empty_pairs() {
        let q = parse("?a=1&&b&=x");
        assert_eq!(q.len(), 2);
        assert_eq!(q["a"], QueryValue::Number(1.0));
        assert_eq!(q["b"].as_str(), Some(""));
    }

    #[test]
    fn repeated_keys_accumulate() {
        let q = parse("tag=a&tag=2&tag=true");
        assert_eq!(
            q["tag"],
            QueryValue::Array(vec![
                QueryValue::String("a".to_owned()),
                QueryValue::Number(2.0),
                QueryValue::Bool(true),
            ])
        );
    }

    #[test]
    fn bracket_push_and_indices() {
        let q = parse("a[]=x&a[]=y&b[2]=late&b[0]=early");
        assert_eq!(
            q["a"].as_array().map(<[QueryValue]>::len),
            Some(2)
        );
        let b = q["b"].as_array().expect("b is an array");
        assert_eq!(b[0].as_str(), Some("early"));
        assert_eq!(b[1].as_str(), Some("late"));
    }

    #[test]
    fn nested_maps() {
        let q = parse("user[name]=ann&user[age]=31&user[tags][]=x");
        let user = &q["user"];
        assert_eq!(user.get("name").and_then(QueryValue::as_str), Some("ann"));
        assert_eq!(user.get("age").and_then(QueryValue::as_f64), Some(31.0));
        assert_eq!(
            user.get("tags").and_then(QueryValue::as_array).map(<[QueryValue]>::len),
            Some(1)
        );
    }

    #[test]
    fn index_above_limit_becomes_map_key() {
        let config = QueryParserConfig {
            array_limit: 3,
            ..QueryParserConfig::default()
        };
        let q = parse_query("a[10]=x", &config);
        assert_eq!(q["a"].get("10").and_then(QueryValue::as_str), Some("x"));
    }

    #[test]
    fn depth_limit_collapses_remainder() {
        let config = QueryParserConfig {
            depth: 1,
            ..QueryParserConfig::default()
        };
        let q = parse_query("a[b][c]=1", &config);
        let b = q["a"].get("b").expect("first level kept");
        assert_eq!(b.get("[c]"), Some(&QueryValue::Number(1.0)));
    }

    #[test]
    fn malformed_brackets_are_literal_keys() {
        let q = parse("a[b=1&[x]=2");
        assert_eq!(q["a[b"], QueryValue::Number(1.0));
        assert_eq!(q["[x]"], QueryValue::Number(2.0));
    }

    #[test]
    fn scalars_merged_into_a_map_become_flags() {
        let q = parse("a[b]=1&a=2&a=x");
        assert_eq!(
            serde_json::to_value(&q["a"]).unwrap(),
            serde_json::json!({ "b": 1, "2": true, "x": true })
        );

        let q = parse("a[b]=1&a[]=y&a[]=z");
        assert_eq!(
            serde_json::to_value(&q["a"]).unwrap(),
            serde_json::json!({ "b": 1, "0": ["y", "z"] })
        );
    }

    #[test]
    fn ten_thousand_pushes_are_kept() {
        let raw: Vec<String> = (0..10_000).map(|i| format!("ids[]={i}")).collect();
        let q = parse(&raw.join("&"));
        let ids = q["ids"].as_array().expect("ids is an array");
        assert_eq!(ids.len(), 10_000);
        assert_eq!(ids[9_999], QueryValue::Number(9_999.0));
    }

    #[test]
    fn ten_thousand_indexed_entries_are_kept() {
        let raw: Vec<String> = (0..10_000).map(|i| format!("ids[{i}]={i}")).collect();
        let q = parse(&raw.join("&"));
        assert_eq!(q["ids"].as_array().map(<[QueryValue]>::len), Some(10_000));
    }

    #[test]
    fn parameter_limit_bounds_pairs() {
        let config = QueryParserConfig {
            parameter_limit: 2,
            ..QueryParserConfig::default()
        };
        let q = parse_query("a=1&b=2&c=3", &config);
        assert_eq!(q.len(), 2);
        assert!(!q.contains_key("c"));
    }

    #[test]
    fn serializes_like_json_stringify() {
        let q = parse("a=1&b=undefined&c[]=undefined&d=0.5&e=x");
        let json = serde_json::to_value(QueryValue::Map(q)).expect("serializes");
        assert_eq!(
            json,
            serde_json::json!({ "a": 1, "c": [null], "d": 0.5, "e": "x" })
        );
    }

    proptest! {
        #[test]
        fn numeral_values_are_numeric(values in prop::collection::vec(0u32..10_000_000, 1..20)) {
            let raw: Vec<String> = values
                .iter()
                .enumerate()
                .map(|(i, v)| format!("k{i}={v}"))
                .collect();
            let q = parse(&raw.join("&"));
            for (i, v) in values.iter().enumerate() {
                prop_assert_eq!(q[&format!("k{i}")].as_f64(), Some(f64::from(*v)));
            }
        }

        #[test]
        fn decimal_values_are_numeric(whole in 0u32..100_000, frac in 0u32..1000) {
            let q = parse(&format!("x={whole}.{frac:03}"));
            prop_assert!(q["x"].as_f64().is_some());
        }

        #[test]
        fn keyword_tokens_are_primitives(tokens in prop::collection::vec(
            prop::sample::select(vec!["true", "false", "null"]), 1..10)) {
            let raw: Vec<String> = tokens
                .iter()
                .enumerate()
                .map(|(i, t)| format!("k{i}={t}"))
                .collect();
            let q = parse(&raw.join("&"));
            for (i, t) in tokens.iter().enumerate() {
                let expected = match *t {
                    "true" => QueryValue::Bool(true),
                    "false" => QueryValue::Bool(false),
                    _ => QueryValue::Null,
                };
                prop_assert_eq!(&q[&format!("k{i}")], &expected);
            }
        }
    }
}
