use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::schema::DocumentSchema;
use crate::domain::session::{FieldValue, SessionId};

/// Final drafted text together with the field values it was drafted from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedDocument {
    pub text: String,
    pub fields_snapshot: BTreeMap<String, FieldValue>,
    pub doc_type_id: String,
    pub session_id: SessionId,
    pub generated_at: DateTime<Utc>,
}

/// Content hash of everything a draft is allowed to depend on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DraftFingerprint(pub String);

impl DraftFingerprint {
    /// Hashes the schema identity, template text and the canonical field
    /// values. Turn indices are excluded so the same facts stated at
    /// different points of a conversation draft identically.
    pub fn compute(schema: &DocumentSchema, fields: &BTreeMap<String, FieldValue>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(schema.doc_type_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(schema.template_text.as_bytes());
        hasher.update([0u8]);
        for spec in &schema.fields {
            hasher.update(spec.name.as_bytes());
            hasher.update([0x1f]);
            if let Some(value) = fields.get(&spec.name) {
                hasher.update(value.value.canonical().as_bytes());
            }
            hasher.update([0x1e]);
        }

        let digest = hasher.finalize();
        Self(digest.iter().map(|byte| format!("{byte:02x}")).collect())
    }
}
