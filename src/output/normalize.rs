//! Clean projection of entity records
//!
//! Succeeded entities go through a [`Normalizer`]; every other entity is
//! reduced to its id, coordinates and bare sub-resource ids.

use crate::state::{EntityId, EntityRecord, FetchStatus, RawDetail};
use crate::storage::EntityStore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entry of an output artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanEntity {
    pub id: EntityId,
    pub latitude: f64,
    pub longitude: f64,
    pub sub_resources: Vec<Value>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl CleanEntity {
    /// Minimal projection used for entities without a detail payload
    pub fn placeholder(entity: &EntityRecord) -> Self {
        Self {
            id: entity.id,
            latitude: entity.latitude,
            longitude: entity.longitude,
            sub_resources: bare_sub_resources(entity),
            fields: Map::new(),
        }
    }
}

/// Turns a raw detail payload into a clean output entry
pub trait Normalizer: Send + Sync {
    fn normalize(&self, entity: &EntityRecord, detail: &RawDetail) -> CleanEntity;
}

/// Default normalizer: snake_case keys, identity fields taken from the record
///
/// A `subResources` array in the detail payload replaces the bare ids from the
/// listing; a non-array `subResources` is dropped. All other keys become
/// top-level fields of the clean entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldNormalizer;

const RESERVED_KEYS: [&str; 3] = ["id", "latitude", "longitude"];

impl Normalizer for FieldNormalizer {
    fn normalize(&self, entity: &EntityRecord, detail: &RawDetail) -> CleanEntity {
        let mut clean = CleanEntity::placeholder(entity);

        let object = match detail {
            Value::Object(object) => object,
            other => {
                clean.fields.insert("detail".to_string(), other.clone());
                return clean;
            }
        };

        for (key, value) in object {
            let key = to_snake_case(key);
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            if key == "sub_resources" {
                // Anything but an array keeps the bare ids
                if let Value::Array(items) = value {
                    clean.sub_resources = items.iter().map(snake_case_keys).collect();
                }
                continue;
            }
            clean.fields.insert(key, snake_case_keys(value));
        }

        clean
    }
}

/// Builds the clean projection of a whole store, sorted by id
pub fn build_output(store: &EntityStore, normalizer: &dyn Normalizer) -> Vec<CleanEntity> {
    store
        .records_sorted()
        .into_iter()
        .map(|entity| match (&entity.fetch_status, &entity.detail) {
            (FetchStatus::Succeeded, Some(detail)) => normalizer.normalize(entity, detail),
            _ => CleanEntity::placeholder(entity),
        })
        .collect()
}

fn bare_sub_resources(entity: &EntityRecord) -> Vec<Value> {
    entity
        .sub_resource_ids
        .iter()
        .map(|id| Value::String(id.clone()))
        .collect()
}

fn snake_case_keys(value: &Value) -> Value {
    match value {
        Value::Object(object) => Value::Object(
            object
                .iter()
                .map(|(key, value)| (to_snake_case(key), snake_case_keys(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(snake_case_keys).collect()),
        other => other.clone(),
    }
}

/// Converts `camelCase`, `PascalCase`, `kebab-case` and spaced keys to snake_case
fn to_snake_case(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let mut out = String::with_capacity(key.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c == '-' || c == ' ' || c == '_' {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }

        if c.is_uppercase() {
            let prev = if i > 0 { chars.get(i - 1) } else { None };
            let next = chars.get(i + 1);
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.map_or(false, |n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }

    out
}
