//! Schema-bound Avro encoding and decoding of event payloads.

use apache_avro::schema::{Name, RecordSchema};
use apache_avro::types::Value;
use apache_avro::Schema;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::HashMap;

/// A decoded event: field name to JSON value.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Errors that can occur while building or using a [`Codec`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The schema text is not valid JSON.
    #[error("Schema is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),
    /// The schema JSON is not a valid Avro schema.
    #[error("Invalid Avro schema: {0}")]
    Schema(#[source] Box<apache_avro::Error>),
    /// The payload could not be read with the schema.
    #[error("Avro decode failed: {0}")]
    Decode(#[source] Box<apache_avro::Error>),
    /// The value could not be written with the schema.
    #[error("Avro encode failed: {0}")]
    Encode(#[source] Box<apache_avro::Error>),
    /// The top-level schema or value is not a record.
    #[error("Expected a record")]
    NotARecord,
    /// A JSON value does not fit the schema.
    #[error("Cannot convert {value} to {expected}")]
    Convert {
        /// JSON value that was rejected.
        value: String,
        /// Schema type it was converted to.
        expected: String,
    },
}

/// Avro codec for one event schema.
///
/// Decoded records have unions flattened to their inner value and
/// bytes/fixed values rendered as base64 strings.
#[derive(Debug)]
pub struct Codec {
    schema: Schema,
    named: HashMap<String, Schema>,
    field_names: Vec<String>,
}

impl Codec {
    /// Builds a codec from the schema JSON text returned by `GetSchema`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] for malformed JSON, [`Error::Schema`] when the
    /// JSON is not an Avro schema and [`Error::NotARecord`] when the schema is
    /// not a record.
    pub fn parse(schema_json: &str) -> Result<Self, Error> {
        let value: serde_json::Value = serde_json::from_str(schema_json).map_err(Error::Json)?;
        Self::from_value(&value)
    }

    /// Builds a codec from already parsed schema JSON.
    pub fn from_value(schema_json: &serde_json::Value) -> Result<Self, Error> {
        let schema = Schema::parse(schema_json).map_err(|e| Error::Schema(Box::new(e)))?;
        let field_names = match &schema {
            Schema::Record(RecordSchema { fields, .. }) => {
                fields.iter().map(|field| field.name.clone()).collect()
            }
            _ => return Err(Error::NotARecord),
        };

        let mut named = HashMap::new();
        collect_named(&schema, &mut named);

        Ok(Self {
            schema,
            named,
            field_names,
        })
    }

    /// Top-level field names in schema order.
    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    /// Decodes a binary Avro payload into a record.
    pub fn decode(&self, payload: &[u8]) -> Result<Record, Error> {
        let mut reader = payload;
        let value = apache_avro::from_avro_datum(&self.schema, &mut reader, None)
            .map_err(|e| Error::Decode(Box::new(e)))?;
        match avro_to_value(&value) {
            serde_json::Value::Object(record) => Ok(record),
            _ => Err(Error::NotARecord),
        }
    }

    /// Encodes a record into a binary Avro payload.
    ///
    /// Fields missing from the record take their schema default, or null.
    pub fn encode(&self, record: &Record) -> Result<Vec<u8>, Error> {
        let value = value_to_avro(
            &serde_json::Value::Object(record.clone()),
            &self.schema,
            &self.named,
        )?;
        apache_avro::to_avro_datum(&self.schema, value).map_err(|e| Error::Encode(Box::new(e)))
    }
}

fn collect_named(schema: &Schema, named: &mut HashMap<String, Schema>) {
    match schema {
        Schema::Record(record) => {
            named.insert(fullname(&record.name), schema.clone());
            for field in &record.fields {
                collect_named(&field.schema, named);
            }
        }
        Schema::Enum(enum_schema) => {
            named.insert(fullname(&enum_schema.name), schema.clone());
        }
        Schema::Fixed(fixed) => {
            named.insert(fullname(&fixed.name), schema.clone());
        }
        Schema::Array(array) => collect_named(&array.items, named),
        Schema::Map(map) => collect_named(&map.types, named),
        Schema::Union(union) => {
            for variant in union.variants() {
                collect_named(variant, named);
            }
        }
        _ => {}
    }
}

fn fullname(name: &Name) -> String {
    name.fullname(None)
}

fn avro_to_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::json!(i),
        Value::Long(l) => serde_json::json!(l),
        Value::Float(f) => serde_json::json!(f),
        Value::Double(d) => serde_json::json!(d),
        Value::Bytes(b) | Value::Fixed(_, b) => serde_json::Value::String(STANDARD.encode(b)),
        Value::String(s) | Value::Enum(_, s) => serde_json::Value::String(s.clone()),
        Value::Union(_, inner) => avro_to_value(inner),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(avro_to_value).collect()),
        Value::Map(entries) => serde_json::Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), avro_to_value(v)))
                .collect(),
        ),
        Value::Record(fields) => serde_json::Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), avro_to_value(v)))
                .collect(),
        ),
        Value::Date(d) => serde_json::json!(d),
        Value::TimeMillis(t) => serde_json::json!(t),
        Value::TimeMicros(t) => serde_json::json!(t),
        Value::TimestampMillis(t) => serde_json::json!(t),
        Value::TimestampMicros(t) => serde_json::json!(t),
        Value::TimestampNanos(t) => serde_json::json!(t),
        Value::LocalTimestampMillis(t) => serde_json::json!(t),
        Value::LocalTimestampMicros(t) => serde_json::json!(t),
        Value::LocalTimestampNanos(t) => serde_json::json!(t),
        Value::Decimal(d) => {
            let bytes: Vec<u8> = d.try_into().unwrap_or_default();
            serde_json::Value::String(STANDARD.encode(bytes))
        }
        Value::BigDecimal(d) => serde_json::Value::String(d.to_string()),
        Value::Uuid(u) => serde_json::Value::String(u.to_string()),
        Value::Duration(_) => serde_json::Value::Null,
    }
}

fn mismatch(value: &serde_json::Value, schema: &Schema) -> Error {
    Error::Convert {
        value: value.to_string(),
        expected: format!("{:?}", apache_avro::schema::SchemaKind::from(schema)),
    }
}

fn integer<T: TryFrom<i64>>(value: &serde_json::Value, schema: &Schema) -> Result<T, Error> {
    value
        .as_i64()
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| mismatch(value, schema))
}

fn value_to_avro(
    value: &serde_json::Value,
    schema: &Schema,
    named: &HashMap<String, Schema>,
) -> Result<Value, Error> {
    use serde_json::Value as Json;

    match (value, schema) {
        (Json::Null, Schema::Null) => Ok(Value::Null),
        (Json::Bool(b), Schema::Boolean) => Ok(Value::Boolean(*b)),
        (Json::Number(_), Schema::Int) => integer(value, schema).map(Value::Int),
        (Json::Number(_), Schema::Long) => integer(value, schema).map(Value::Long),
        (Json::Number(_), Schema::Date) => integer(value, schema).map(Value::Date),
        (Json::Number(_), Schema::TimeMillis) => integer(value, schema).map(Value::TimeMillis),
        (Json::Number(_), Schema::TimeMicros) => integer(value, schema).map(Value::TimeMicros),
        (Json::Number(_), Schema::TimestampMillis) => {
            integer(value, schema).map(Value::TimestampMillis)
        }
        (Json::Number(_), Schema::TimestampMicros) => {
            integer(value, schema).map(Value::TimestampMicros)
        }
        (Json::Number(n), Schema::Float) => n
            .as_f64()
            .map(|f| Value::Float(f as f32))
            .ok_or_else(|| mismatch(value, schema)),
        (Json::Number(n), Schema::Double) => n
            .as_f64()
            .map(Value::Double)
            .ok_or_else(|| mismatch(value, schema)),
        (Json::String(s), Schema::String) => Ok(Value::String(s.clone())),
        (Json::String(s), Schema::Bytes) => STANDARD
            .decode(s)
            .map(Value::Bytes)
            .map_err(|_| mismatch(value, schema)),
        (Json::String(s), Schema::Enum(enum_schema)) => enum_schema
            .symbols
            .iter()
            .position(|symbol| symbol == s)
            .map(|index| Value::Enum(index as u32, s.clone()))
            .ok_or_else(|| mismatch(value, schema)),
        (Json::Array(items), Schema::Array(array)) => items
            .iter()
            .map(|item| value_to_avro(item, &array.items, named))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        (Json::Object(entries), Schema::Map(map)) => entries
            .iter()
            .map(|(k, v)| Ok((k.clone(), value_to_avro(v, &map.types, named)?)))
            .collect::<Result<HashMap<_, _>, Error>>()
            .map(Value::Map),
        (Json::Object(entries), Schema::Record(record)) => {
            let mut fields = Vec::with_capacity(record.fields.len());
            for field in &record.fields {
                let field_value = entries
                    .get(&field.name)
                    .filter(|v| !v.is_null())
                    .or(field.default.as_ref())
                    .unwrap_or(&Json::Null);
                fields.push((
                    field.name.clone(),
                    value_to_avro(field_value, &field.schema, named)?,
                ));
            }
            Ok(Value::Record(fields))
        }
        (_, Schema::Union(union)) => {
            for (index, variant) in union.variants().iter().enumerate() {
                if let Ok(inner) = value_to_avro(value, variant, named) {
                    return Ok(Value::Union(index as u32, Box::new(inner)));
                }
            }
            Err(mismatch(value, schema))
        }
        (_, Schema::Ref { name }) => match named.get(&fullname(name)) {
            Some(resolved) => value_to_avro(value, resolved, named),
            None => Err(mismatch(value, schema)),
        },
        _ => Err(mismatch(value, schema)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::testing::ACCOUNT_CHANGE_EVENT_SCHEMA;
    use serde_json::json;

    #[test]
    fn test_parse_field_names() {
        let codec = Codec::parse(ACCOUNT_CHANGE_EVENT_SCHEMA).unwrap();
        assert_eq!(
            codec.field_names(),
            &["ChangeEventHeader", "Name", "Rating", "Photo"]
        );
    }

    #[test]
    fn test_parse_malformed_json() {
        let result = Codec::parse("{\"type\": \"record\"");
        assert!(matches!(result, Err(Error::Json(_))));
    }

    #[test]
    fn test_parse_not_a_record() {
        let result = Codec::parse("\"string\"");
        assert!(matches!(result, Err(Error::NotARecord)));
    }

    #[test]
    fn test_decode_flattens_unions() {
        let codec = Codec::parse(ACCOUNT_CHANGE_EVENT_SCHEMA).unwrap();
        let record = json!({
            "ChangeEventHeader": {
                "entityName": "Account",
                "changeType": "UPDATE",
                "changedFields": ["0x06"],
                "diffFields": [],
                "nulledFields": []
            },
            "Name": "Acme",
            "Photo": "AQID"
        });
        let payload = codec.encode(record.as_object().unwrap()).unwrap();
        let decoded = codec.decode(&payload).unwrap();

        assert_eq!(decoded["Name"], json!("Acme"));
        assert_eq!(decoded["Rating"], json!(null));
        assert_eq!(decoded["Photo"], json!("AQID"));
        assert_eq!(decoded["ChangeEventHeader"]["changeType"], json!("UPDATE"));
        assert_eq!(
            decoded["ChangeEventHeader"]["changedFields"],
            json!(["0x06"])
        );
    }

    #[test]
    fn test_avro_to_value_nested_unions() {
        let value = Value::Record(vec![
            (
                "Name".to_string(),
                Value::Union(1, Box::new(Value::String("x".to_string()))),
            ),
            (
                "Tags".to_string(),
                Value::Array(vec![Value::Union(
                    1,
                    Box::new(Value::Map(HashMap::from([(
                        "k".to_string(),
                        Value::Union(1, Box::new(Value::Long(7))),
                    )]))),
                )]),
            ),
        ]);
        assert_eq!(
            avro_to_value(&value),
            json!({"Name": "x", "Tags": [{"k": 7}]})
        );
    }

    #[test]
    fn test_encode_rejects_mismatched_type() {
        let codec = Codec::parse(ACCOUNT_CHANGE_EVENT_SCHEMA).unwrap();
        let record = json!({
            "ChangeEventHeader": {
                "entityName": "Account",
                "changeType": "MERGE",
                "changedFields": [],
                "diffFields": [],
                "nulledFields": []
            }
        });
        let result = codec.encode(record.as_object().unwrap());
        assert!(matches!(result, Err(Error::Convert { .. })));
    }
}
