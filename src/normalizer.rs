//! Field normalization: resolves each canonical output field from an
//! ordered list of candidate source locations, so the heterogeneously
//! shaped upstream records all collapse into one stable schema.

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// The stable record shape every caller sees. A `null` field means no
/// rule resolved a value (absence); defined-but-falsy source values
/// (0, "", false, []) pass through and stay distinguishable from null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub title: Value,
    pub author: Value,
    pub isbn: Value,
    pub publisher: Value,
    pub description: Value,
    pub rank: Value,
    pub rank_last_week: Value,
    pub weeks_on_list: Value,
    pub ranks_history: Value,
    pub reviews: Value,
}

/// The canonical field names, in output order. Used to walk the mapping
/// table and to reject config entries for unknown fields.
pub const CANONICAL_FIELDS: [&str; 10] = [
    "title",
    "author",
    "isbn",
    "publisher",
    "description",
    "rank",
    "rank_last_week",
    "weeks_on_list",
    "ranks_history",
    "reviews",
];

/// One candidate source location for a canonical field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResolutionRule {
    /// Top-level key, taken verbatim when defined and non-null.
    DirectKey(String),
    /// Dotted path into nested objects/arrays, with a fallback for
    /// missing or malformed segments and an optional named transform.
    NestedPath {
        path: String,
        #[serde(default)]
        fallback: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transform: Option<String>,
    },
}

type TransformFn = fn(&Value) -> Value;

/// Fixed, compile-time registry of named transforms. No dynamic code:
/// a mapping table naming anything outside this set fails at load.
fn transform_registry() -> HashMap<&'static str, TransformFn> {
    let mut registry: HashMap<&'static str, TransformFn> = HashMap::new();
    registry.insert("first", |v| match v.as_array() {
        Some(items) => items.first().cloned().unwrap_or(Value::Null),
        None => Value::Null,
    });
    registry.insert("count", |v| match v.as_array() {
        Some(items) => Value::from(items.len()),
        None => Value::Null,
    });
    registry.insert("trim", |v| match v.as_str() {
        Some(s) => Value::String(s.trim().to_string()),
        None => Value::Null,
    });
    registry
}

/// Canonical field name -> ordered rule list. Loaded once at startup
/// and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMappingTable {
    pub fields: BTreeMap<String, Vec<ResolutionRule>>,
}

impl FieldMappingTable {
    /// Built-in mapping for the bestseller catalog's known record shapes.
    pub fn default_table() -> Self {
        fn key(name: &str) -> ResolutionRule {
            ResolutionRule::DirectKey(name.to_string())
        }
        fn path(path: &str, fallback: Value) -> ResolutionRule {
            ResolutionRule::NestedPath {
                path: path.to_string(),
                fallback,
                transform: None,
            }
        }

        let mut fields = BTreeMap::new();
        fields.insert(
            "title".to_string(),
            vec![key("title"), key("book_title"), key("display_title")],
        );
        fields.insert(
            "author".to_string(),
            vec![
                key("author"),
                key("book_author"),
                key("writer"),
                key("display_author"),
            ],
        );
        fields.insert(
            "isbn".to_string(),
            vec![
                key("isbns"),
                key("isbn"),
                key("primary_isbn13"),
                key("primary_isbn10"),
            ],
        );
        fields.insert(
            "publisher".to_string(),
            vec![key("publisher"), key("book_publisher")],
        );
        fields.insert(
            "description".to_string(),
            vec![key("description"), key("summary"), key("book_description")],
        );
        fields.insert(
            "rank".to_string(),
            vec![
                key("rank"),
                key("bestseller_rank"),
                key("list_rank"),
                path("ranks_history.0.rank", Value::Null),
            ],
        );
        fields.insert(
            "rank_last_week".to_string(),
            vec![
                key("rank_last_week"),
                path("ranks_history.0.rank_last_week", Value::from(0)),
            ],
        );
        fields.insert(
            "weeks_on_list".to_string(),
            vec![
                key("weeks_on_list"),
                path("ranks_history.0.weeks_on_list", Value::from(0)),
            ],
        );
        fields.insert(
            "ranks_history".to_string(),
            vec![key("ranks_history"), path("ranks_history", Value::from(0))],
        );
        fields.insert(
            "reviews".to_string(),
            vec![key("reviews"), path("reviews", Value::from(0))],
        );

        Self { fields }
    }

    /// Parse a mapping table from its JSON representation: each field
    /// maps to a list of strings (direct keys) and/or
    /// `{path, fallback, transform}` objects.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| GatewayError::Configuration(format!("Invalid field mapping: {}", e)))
    }

    /// Reject tables that name unknown canonical fields or unregistered
    /// transforms. Runs once at load; record processing never re-checks.
    fn validate(&self) -> Result<()> {
        let registry = transform_registry();

        for (field, rules) in &self.fields {
            if !CANONICAL_FIELDS.contains(&field.as_str()) {
                return Err(GatewayError::Configuration(format!(
                    "Unknown canonical field '{}' in mapping table",
                    field
                )));
            }
            for rule in rules {
                if let ResolutionRule::NestedPath {
                    transform: Some(name),
                    ..
                } = rule
                {
                    if !registry.contains_key(name.as_str()) {
                        return Err(GatewayError::Configuration(format!(
                            "Unregistered transform '{}' for field '{}'",
                            name, field
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Config-driven resolver turning one raw upstream record into the
/// stable schema. Tolerates arbitrarily garbled input: every failure
/// mode degrades to a fallback or null, never to an error.
#[derive(Debug)]
pub struct FieldMappingNormalizer {
    table: FieldMappingTable,
    registry: HashMap<&'static str, TransformFn>,
}

impl FieldMappingNormalizer {
    /// Build a normalizer, validating the table against the transform
    /// registry. Configuration errors surface here, at load time.
    pub fn new(table: FieldMappingTable) -> Result<Self> {
        table.validate()?;
        Ok(Self {
            table,
            registry: transform_registry(),
        })
    }

    /// Normalizer over the built-in table, which only names registered
    /// transforms and canonical fields.
    pub fn with_default_table() -> Self {
        Self {
            table: FieldMappingTable::default_table(),
            registry: transform_registry(),
        }
    }

    pub fn normalize(&self, raw: &Value) -> NormalizedRecord {
        NormalizedRecord {
            title: self.resolve_field("title", raw),
            author: self.resolve_field("author", raw),
            isbn: self.resolve_field("isbn", raw),
            publisher: self.resolve_field("publisher", raw),
            description: self.resolve_field("description", raw),
            rank: self.resolve_field("rank", raw),
            rank_last_week: self.resolve_field("rank_last_week", raw),
            weeks_on_list: self.resolve_field("weeks_on_list", raw),
            ranks_history: self.resolve_field("ranks_history", raw),
            reviews: self.resolve_field("reviews", raw),
        }
    }

    /// Evaluate the field's rules in order; the first non-null result
    /// wins. No rule resolving means explicit null in the output.
    fn resolve_field(&self, field: &str, raw: &Value) -> Value {
        let Some(rules) = self.table.fields.get(field) else {
            // Unmapped field: fall back to a same-named direct key.
            return direct_key(raw, field);
        };

        for rule in rules {
            let resolved = match rule {
                ResolutionRule::DirectKey(name) => direct_key(raw, name),
                ResolutionRule::NestedPath {
                    path,
                    fallback,
                    transform,
                } => {
                    let mut value = nested_path(raw, path, fallback);
                    if !value.is_null() {
                        if let Some(name) = transform {
                            if let Some(f) = self.registry.get(name.as_str()) {
                                value = f(&value);
                            }
                        }
                    }
                    value
                }
            };

            if !resolved.is_null() {
                return resolved;
            }
        }

        Value::Null
    }
}

fn direct_key(raw: &Value, name: &str) -> Value {
    match raw.get(name) {
        Some(value) => value.clone(),
        None => Value::Null,
    }
}

/// Total dotted-path resolution over the value tree. Numeric segments
/// index into arrays; any missing or shape-mismatched segment yields
/// the fallback instead of an error.
fn nested_path(raw: &Value, path: &str, fallback: &Value) -> Value {
    let mut current = raw;

    for segment in path.split('.') {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index)),
            _ => None,
        };

        match next {
            Some(value) => current = value,
            None => return fallback.clone(),
        }
    }

    if current.is_null() {
        fallback.clone()
    } else {
        current.clone()
    }
}
