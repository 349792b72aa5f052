//! Change-only projection of change data capture records.

use super::bitmap;
use super::codec::Record;
use super::error::DecodeError;
use serde_json::Value;

const CHANGE_EVENT_HEADER: &str = "ChangeEventHeader";
const BITMAP_FIELDS: [&str; 3] = ["changedFields", "diffFields", "nulledFields"];

/// Replaces the header's change bitmaps with field names and keeps only the
/// header and the fields they name.
///
/// Records without a `ChangeEventHeader` object are returned unchanged.
pub(crate) fn project(mut record: Record, field_names: &[String]) -> Result<Record, DecodeError> {
    let Some(Value::Object(mut header)) = record.remove(CHANGE_EVENT_HEADER) else {
        return Ok(record);
    };

    let mut named = Vec::new();
    for list in BITMAP_FIELDS {
        let bitmaps: Vec<&str> = header
            .get(list)
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let names = bitmap::changed_field_names(field_names, &bitmaps).map_err(|source| {
            DecodeError::Bitmap {
                field: list.to_string(),
                source,
            }
        })?;
        if header.contains_key(list) {
            header.insert(
                list.to_string(),
                Value::Array(names.iter().cloned().map(Value::String).collect()),
            );
        }
        named.extend(names);
    }

    let mut projected = Record::new();
    for name in named {
        if name == CHANGE_EVENT_HEADER || projected.contains_key(&name) {
            continue;
        }
        let value = record.remove(&name).unwrap_or(Value::Null);
        projected.insert(name, value);
    }
    projected.insert(CHANGE_EVENT_HEADER.to_string(), Value::Object(header));
    Ok(projected)
}
