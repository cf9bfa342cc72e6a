//! Typed view over an RO-Crate JSON-LD `@graph`. Lookups distinguish
//! "not found" from "found" instead of indexing into raw JSON.

use crate::RdmError;
use serde_json::Value;

pub struct ProvenanceGraph<'a> {
    entities: &'a [Value],
}

impl<'a> ProvenanceGraph<'a> {
    pub fn from_document(document: &'a Value) -> Result<Self, RdmError> {
        let entities = document
            .get("@graph")
            .and_then(Value::as_array)
            .ok_or_else(|| RdmError::MalformedCrate("document without @graph".into()))?;
        Ok(Self { entities })
    }

    pub fn entities_of_type(&self, ty: &str) -> Vec<&'a Value> {
        self.entities
            .iter()
            .filter(|entity| entity.get("@type").and_then(Value::as_str) == Some(ty))
            .collect()
    }

    /// The provenance graph must carry exactly one `CreateAction`.
    pub fn sole_create_action(&self) -> Result<&'a Value, RdmError> {
        let actions = self.entities_of_type("CreateAction");
        match actions.len() {
            0 => Err(RdmError::MalformedCrate("no CreateAction entities".into())),
            1 => Ok(actions[0]),
            n => Err(RdmError::MalformedCrate(format!(
                "{} CreateAction entities, expected one",
                n
            ))),
        }
    }

    /// Index of the sole `CreateAction` within `@graph`, for in-place mutation.
    pub fn create_action_position(&self) -> Result<usize, RdmError> {
        self.sole_create_action()?;
        Ok(self
            .entities
            .iter()
            .position(|entity| entity.get("@type").and_then(Value::as_str) == Some("CreateAction"))
            .unwrap_or_default())
    }

    pub fn file_by_id(&self, id: &str) -> Option<&'a Value> {
        self.entities.iter().find(|entity| {
            entity.get("@type").and_then(Value::as_str) == Some("File")
                && entity.get("@id").and_then(Value::as_str) == Some(id)
        })
    }
}
