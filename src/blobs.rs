//! Blob table and extractor.
//!
//! Tool results may embed binary payloads. The extractor walks a JSON-shaped
//! result, lifts recognised payload shapes into the execution's blob table,
//! and substitutes `{type: "blob_ref", id, mimeType}` references. The guest
//! fetches the bytes back with `tool('get_blob', {id})`; the host receives
//! the full table in [`ExecuteResult::blobs`](crate::types::ExecuteResult).
//!
//! Recognised shapes:
//! - `{type: "image" | "audio", data: string, mimeType: string}`
//! - `{blob: string, mimeType: string}` (other fields at that position are
//!   lost)
//!
//! The walk is deterministic (object insertion order, array index order), so
//! blob ordering within one result is stable. Input values are never mutated.

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::types::Blob;

/// Per-execution table of lifted payloads. Cleared at the start of every
/// execution; blob ids are unique within it.
#[derive(Debug, Default)]
pub struct BlobTable {
    blobs: Vec<Blob>,
}

impl BlobTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Blob> {
        self.blobs.iter().find(|blob| blob.id == id)
    }

    pub fn clear(&mut self) {
        self.blobs.clear();
    }

    pub fn snapshot(&self) -> Vec<Blob> {
        self.blobs.clone()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Store a payload under a freshly generated id and return the id.
    fn insert(&mut self, data: String, mime_type: String) -> String {
        let id = loop {
            let candidate = generate_blob_id();
            if self.get(&candidate).is_none() {
                break candidate;
            }
        };
        self.blobs.push(Blob {
            id: id.clone(),
            data,
            mime_type,
        });
        id
    }
}

/// `blob_` followed by six lower-alphanumeric characters.
fn generate_blob_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("blob_{}", &hex[..6])
}

/// Walk `value`, lifting recognised binary shapes into `table` and returning
/// the reference-substituted copy.
pub fn extract_blobs(value: &Value, table: &mut BlobTable) -> Value {
    match value {
        Value::Object(map) => {
            if let Some((data, mime_type)) = media_payload(map) {
                let id = table.insert(data.to_string(), mime_type.to_string());
                return json!({ "type": "blob_ref", "id": id, "mimeType": mime_type });
            }
            if let Some((data, mime_type)) = resource_payload(map) {
                let id = table.insert(data.to_string(), mime_type.to_string());
                return json!({ "type": "blob_ref", "id": id, "mimeType": mime_type });
            }
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), extract_blobs(item, table));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| extract_blobs(v, table)).collect()),
        other => other.clone(),
    }
}

/// `{type: "image"|"audio", data, mimeType}` with string payload fields.
fn media_payload(map: &Map<String, Value>) -> Option<(&str, &str)> {
    let kind = map.get("type")?.as_str()?;
    if kind != "image" && kind != "audio" {
        return None;
    }
    Some((map.get("data")?.as_str()?, map.get("mimeType")?.as_str()?))
}

/// `{blob, mimeType}` with string fields, irrespective of other keys.
fn resource_payload(map: &Map<String, Value>) -> Option<(&str, &str)> {
    Some((map.get("blob")?.as_str()?, map.get("mimeType")?.as_str()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_blob_ref(value: &Value, mime_type: &str) -> String {
        assert_eq!(value["type"], "blob_ref");
        assert_eq!(value["mimeType"], mime_type);
        let id = value["id"].as_str().expect("blob_ref id");
        assert_eq!(id.len(), 11);
        assert!(id.starts_with("blob_"));
        assert!(id[5..]
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        id.to_string()
    }

    #[test]
    fn test_image_payload_is_lifted() {
        let mut table = BlobTable::new();
        let input = json!({ "type": "image", "data": "aGVsbG8=", "mimeType": "image/png" });
        let out = extract_blobs(&input, &mut table);

        let id = assert_blob_ref(&out, "image/png");
        let blob = table.get(&id).unwrap();
        assert_eq!(blob.data, "aGVsbG8=");
        assert_eq!(blob.mime_type, "image/png");
    }

    #[test]
    fn test_audio_payload_is_lifted() {
        let mut table = BlobTable::new();
        let input = json!({ "type": "audio", "data": "c291bmQ=", "mimeType": "audio/wav" });
        let out = extract_blobs(&input, &mut table);
        assert_blob_ref(&out, "audio/wav");
    }

    #[test]
    fn test_resource_blob_shape_drops_extra_fields() {
        let mut table = BlobTable::new();
        let input = json!({ "blob": "Ynl0ZXM=", "mimeType": "application/pdf", "uri": "file:///x" });
        let out = extract_blobs(&input, &mut table);

        assert_blob_ref(&out, "application/pdf");
        assert!(out.get("uri").is_none());
    }

    #[test]
    fn test_unrecognised_shapes_pass_through() {
        let mut table = BlobTable::new();
        let input = json!({
            "type": "video",
            "data": "x",
            "mimeType": "video/mp4",
            "count": 3,
            "flag": true,
        });
        let out = extract_blobs(&input, &mut table);
        assert_eq!(out, input);
        assert!(table.is_empty());
    }

    #[test]
    fn test_nested_payloads_in_arrays_and_objects() {
        let mut table = BlobTable::new();
        let input = json!({
            "shots": [
                { "type": "image", "data": "YQ==", "mimeType": "image/png" },
                { "type": "image", "data": "Yg==", "mimeType": "image/png" },
            ],
            "meta": { "inner": { "blob": "Yw==", "mimeType": "text/plain" } },
        });
        let out = extract_blobs(&input, &mut table);

        assert_eq!(table.len(), 3);
        assert_eq!(out["shots"][0]["type"], "blob_ref");
        assert_eq!(out["shots"][1]["type"], "blob_ref");
        assert_eq!(out["meta"]["inner"]["type"], "blob_ref");
        // Deterministic walk: array order first, then the nested object.
        assert_eq!(table.snapshot()[0].data, "YQ==");
        assert_eq!(table.snapshot()[1].data, "Yg==");
        assert_eq!(table.snapshot()[2].data, "Yw==");
    }

    #[test]
    fn test_identical_payloads_get_distinct_ids() {
        let mut table = BlobTable::new();
        let payload = json!({ "type": "image", "data": "aGk=", "mimeType": "image/png" });
        let a = extract_blobs(&payload, &mut table);
        let b = extract_blobs(&payload, &mut table);
        assert_ne!(a["id"], b["id"]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_input_is_not_mutated() {
        let mut table = BlobTable::new();
        let input = json!({ "type": "image", "data": "aGk=", "mimeType": "image/png" });
        let before = input.clone();
        let _ = extract_blobs(&input, &mut table);
        assert_eq!(input, before);
    }

    #[test]
    fn test_scalars_unchanged() {
        let mut table = BlobTable::new();
        assert_eq!(extract_blobs(&json!(42), &mut table), json!(42));
        assert_eq!(extract_blobs(&json!("text"), &mut table), json!("text"));
        assert_eq!(extract_blobs(&Value::Null, &mut table), Value::Null);
    }

    #[test]
    fn test_table_clear_empties_lookup() {
        let mut table = BlobTable::new();
        let input = json!({ "type": "image", "data": "aGk=", "mimeType": "image/png" });
        let out = extract_blobs(&input, &mut table);
        let id = out["id"].as_str().unwrap().to_string();
        assert!(table.get(&id).is_some());
        table.clear();
        assert!(table.get(&id).is_none());
    }
}
