// SPDX-FileCopyrightText: 2026 Caravel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cross-reference rewriting for automation-rule conditions and actions.
//!
//! A rule references target-side entities two ways: a `custom_fields_<id>`
//! field name with the id embedded, or a numeric literal value whose meaning
//! depends on the field name. The field-name dispatch is an explicit lookup
//! table so the set of special-cased fields is data, not branching logic.
//!
//! List-typed values are opaque and never reinterpreted as numeric. An
//! unresolved reference keeps its original value and logs, so a partially
//! translatable rule still migrates.

use serde_json::Value;
use tracing::warn;

use caravel_core::records::{Condition, RuleAction};
use caravel_core::{EntityKind, Result};

use crate::resolve::Resolver;

/// Fields whose numeric condition values are entity references.
const CONDITION_FIELD_KINDS: &[(&str, EntityKind)] = &[
    ("group_id", EntityKind::Group),
    ("brand_id", EntityKind::Brand),
    ("assignee_id", EntityKind::User),
];

/// Fields whose numeric action values are entity references.
const ACTION_FIELD_KINDS: &[(&str, EntityKind)] = &[
    ("group_id", EntityKind::Group),
    ("brand_id", EntityKind::Brand),
    ("assignee_id", EntityKind::User),
    ("cc", EntityKind::User),
    ("ticket_form_id", EntityKind::TicketForm),
];

/// String form of a scalar JSON value. `None` for arrays, objects and null.
pub(crate) fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// The numeric id carried by a scalar value, if it is one. Strings count
/// only when every byte is a digit.
fn numeric_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
            s.parse().ok()
        }
        _ => None,
    }
}

fn table_kind(table: &[(&str, EntityKind)], field: &str) -> Option<EntityKind> {
    table
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, kind)| *kind)
}

impl Resolver {
    /// Rewrite a rule condition so field references and literal values point
    /// at target-instance ids. Output values are normalized to string form
    /// for downstream serialization uniformity.
    pub async fn rewrite_condition(&self, source: &Condition) -> Result<Condition> {
        let (field, value) = if let Some(remapped) = self.remap_custom_field(&source.field).await? {
            (remapped, source.value.clone())
        } else if let Some(source_id) = numeric_id(&source.value) {
            let value = match table_kind(CONDITION_FIELD_KINDS, &source.field) {
                Some(kind) => self.remap_value(kind, source_id, &source.value).await?,
                None => source.value.clone(),
            };
            (source.field.clone(), value)
        } else {
            (source.field.clone(), source.value.clone())
        };

        let value = match scalar_string(&value) {
            Some(s) => Value::String(s),
            None => value,
        };
        Ok(Condition {
            field,
            operator: source.operator.clone(),
            value,
        })
    }

    /// Rewrite a rule action. Unlike conditions, only values that went
    /// through the numeric dispatch are normalized to strings.
    pub async fn rewrite_action(&self, source: &RuleAction) -> Result<RuleAction> {
        if let Some(remapped) = self.remap_custom_field(&source.field).await? {
            return Ok(RuleAction {
                field: remapped,
                value: source.value.clone(),
            });
        }

        let value = if let Some(source_id) = numeric_id(&source.value) {
            let value = match table_kind(ACTION_FIELD_KINDS, &source.field) {
                Some(kind) => self.remap_value(kind, source_id, &source.value).await?,
                None => source.value.clone(),
            };
            match scalar_string(&value) {
                Some(s) => Value::String(s),
                None => value,
            }
        } else {
            source.value.clone()
        };

        Ok(RuleAction {
            field: source.field.clone(),
            value,
        })
    }

    /// Remap the id embedded in a `custom_fields_<id>` field name. Returns
    /// the rewritten field name, or `None` when the field is not a custom
    /// field reference. An unresolved id keeps the original name.
    async fn remap_custom_field(&self, field: &str) -> Result<Option<String>> {
        let Some(raw_id) = field.strip_prefix("custom_fields_") else {
            return Ok(None);
        };
        let Ok(field_id) = raw_id.parse::<u64>() else {
            return Ok(None);
        };
        match self.resolve(EntityKind::TicketField, field_id).await? {
            Some(target_id) => Ok(Some(format!("custom_fields_{target_id}"))),
            None => {
                warn!(field, "unresolved custom field reference, keeping original");
                Ok(Some(field.to_string()))
            }
        }
    }

    async fn remap_value(
        &self,
        kind: EntityKind,
        source_id: u64,
        original: &Value,
    ) -> Result<Value> {
        match self.resolve(kind, source_id).await? {
            Some(target_id) => Ok(Value::String(target_id.to_string())),
            None => {
                warn!(kind = %kind, source_id, "unresolved reference in rule, keeping original value");
                Ok(original.clone())
            }
        }
    }
}
