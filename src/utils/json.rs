use bson::{Bson, Document};
use std::io;

/// Convert a serde_json::Value that must be an object into a bson::Document.
/// Extended JSON wrappers such as `{"$oid": "..."}` are decoded to their BSON types.
/// Returns io::Error with InvalidData on malformed input.
pub fn json_value_to_bson_document(val: &serde_json::Value) -> io::Result<Document> {
    if !val.is_object() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "expected JSON object"));
    }
    match Bson::try_from(val.clone()) {
        Ok(Bson::Document(doc)) => Ok(doc),
        Ok(_) => Err(io::Error::new(io::ErrorKind::InvalidData, "expected JSON object")),
        Err(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e)),
    }
}

/// Render a document as relaxed Extended JSON, the shape returned to browser clients.
#[must_use]
pub fn document_to_json(doc: Document) -> serde_json::Value {
    Bson::Document(doc).into_relaxed_extjson()
}
