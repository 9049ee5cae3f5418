//! Visitor record and the registry request built from it
//!
//! The record is filled one field at a time by the dialogue and handed to the
//! submission sink when the visitor confirms. It is never persisted here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a property's value is extracted from a classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PropertyAnswer {
    /// Value is the text of a classified entity of this type
    Entity { entity: String },
    /// Value is the option whose intent scored highest
    Choice { options: Vec<PropertyOption> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyOption {
    /// Identifier recorded as `valueId`
    pub value: String,
    /// Display label recorded as `value`
    pub label: String,
    /// Intent label that selects this option
    pub intent: String,
}

/// Extra visitor property collected after floor and room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub id: String,
    pub label: String,
    #[serde(default = "default_required")]
    pub required: bool,
    pub answer: PropertyAnswer,
    /// Intent that selects this property from the modify menu
    #[serde(default)]
    pub change_intent: Option<String>,
    /// Question asked for this property, overrides the generic prompt
    #[serde(default)]
    pub prompt: Option<String>,
    /// Spoken when the visitor declines to answer
    #[serde(default)]
    pub need_prompt: Option<String>,
}

fn default_required() -> bool {
    true
}

/// Name and phone number, the two properties the kiosk asks for out of the box
pub fn default_properties() -> Vec<PropertyDefinition> {
    vec![
        PropertyDefinition {
            id: "name".to_string(),
            label: "Nom".to_string(),
            required: true,
            answer: PropertyAnswer::Entity { entity: "name".to_string() },
            change_intent: Some("change.name".to_string()),
            prompt: Some("Puis-je avoir votre nom?".to_string()),
            need_prompt: Some("J'ai besoin d'un nom.".to_string()),
        },
        PropertyDefinition {
            id: "phone".to_string(),
            label: "Téléphone".to_string(),
            required: true,
            answer: PropertyAnswer::Entity { entity: "phonenumber".to_string() },
            change_intent: Some("change.phone".to_string()),
            prompt: Some("Puis-je avoir un numéro de téléphone?".to_string()),
            need_prompt: Some("J'ai besoin d'un numéro de téléphone.".to_string()),
        },
    ]
}

/// One recorded property value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyValue {
    /// Raw value (entity text or option id)
    pub value: String,
    /// What the visitor hears and the registry displays
    pub label: String,
}

/// Data collected during one presence session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitorRecord {
    pub floor: Option<String>,
    pub room: Option<String>,
    pub property_values: BTreeMap<String, PropertyValue>,
}

impl VisitorRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_property(&mut self, id: &str, value: String, label: String) {
        self.property_values.insert(id.to_string(), PropertyValue { value, label });
    }

    pub fn property(&self, id: &str) -> Option<&PropertyValue> {
        self.property_values.get(id)
    }

    pub fn has_property(&self, id: &str) -> bool {
        self.property_values.contains_key(id)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        self.floor.is_none() && self.room.is_none() && self.property_values.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub floor: Option<String>,
    pub room: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOption {
    #[serde(rename = "_id")]
    pub id: String,
    pub label: String,
    pub value: String,
    pub value_id: String,
}

/// Body of the registry PUT
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorRequest {
    pub session_id: String,
    pub request_for: Destination,
    pub requested_on: DateTime<Utc>,
    pub options: Vec<RequestOption>,
}

impl VisitorRequest {
    /// Build the request, listing properties in configuration order
    pub fn from_record(
        session_id: &str,
        record: &VisitorRecord,
        properties: &[PropertyDefinition],
        requested_on: DateTime<Utc>,
    ) -> Self {
        let options = properties
            .iter()
            .filter_map(|def| {
                record.property(&def.id).map(|pv| RequestOption {
                    id: def.id.clone(),
                    label: def.label.clone(),
                    value: pv.label.clone(),
                    value_id: pv.value.clone(),
                })
            })
            .collect();

        Self {
            session_id: session_id.to_string(),
            request_for: Destination { floor: record.floor.clone(), room: record.room.clone() },
            requested_on,
            options,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
