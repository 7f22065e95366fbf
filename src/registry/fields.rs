//! Field normalization for registry rows
//!
//! Column values come in several shapes depending on the column type:
//!
//! ```text
//! "com.example.app"                         plain text
//! 42 / true                                 number, checkbox
//! [{"type": "text", "text": "com.exa"}, ..] rich text segments
//! {"text": "Example", "link": "https://.."} link
//! ```
//!
//! Every shape is flattened to a trimmed string; empty values are `None`.

use serde_json::{Map, Value};

use crate::config::{AccountFields, EntityFields};
use crate::storage::{AccountCredential, NormalizedEntity};

pub type Fields = Map<String, Value>;

pub fn field_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items.iter().filter_map(segment_text).collect(),
        Value::Object(obj) => {
            return obj.get("text").or_else(|| obj.get("link")).and_then(field_text);
        }
    };

    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn segment_text(segment: &Value) -> Option<String> {
    match segment {
        Value::Object(obj) => obj.get("text").and_then(Value::as_str).map(str::to_string),
        other => field_text(other),
    }
}

/// Interpret a checkbox or a yes/no text column
pub fn field_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        other => match field_text(other)?.to_lowercase().as_str() {
            "true" | "yes" | "y" | "1" | "on" | "enabled" | "是" | "开启" => Some(true),
            "false" | "no" | "n" | "0" | "off" | "disabled" | "否" | "关闭" => Some(false),
            _ => None,
        },
    }
}

fn text(fields: &Fields, column: &str) -> Option<String> {
    fields.get(column).and_then(field_text)
}

/// Map a registry row onto an entity, `None` when the key column is empty
pub fn normalize_entity(fields: &Fields, mapping: &EntityFields) -> Option<NormalizedEntity> {
    let key = text(fields, &mapping.key)?;
    let name = text(fields, &mapping.name).unwrap_or_else(|| key.clone());

    Some(NormalizedEntity {
        key,
        name,
        account_id: mapping.account.as_deref().and_then(|c| text(fields, c)),
        monitoring_enabled: mapping
            .monitoring
            .as_deref()
            .and_then(|c| fields.get(c))
            .and_then(field_bool),
    })
}

/// Map a registry row onto a credential, `None` when the id column is empty
///
/// Missing secret columns become empty strings so
/// [`AccountCredential::is_complete`] reports them.
pub fn normalize_account(fields: &Fields, mapping: &AccountFields) -> Option<AccountCredential> {
    Some(AccountCredential {
        id: text(fields, &mapping.id)?,
        name: mapping.name.as_deref().and_then(|c| text(fields, c)),
        issuer_id: text(fields, &mapping.issuer_id).unwrap_or_default(),
        key_id: text(fields, &mapping.key_id).unwrap_or_default(),
        team_id: text(fields, &mapping.team_id).unwrap_or_default(),
        private_key: text(fields, &mapping.private_key).unwrap_or_default(),
    })
}
