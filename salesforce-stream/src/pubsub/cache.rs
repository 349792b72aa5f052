use super::bus::EventBus;
use super::codec::{self, Codec};
use super::error::Error;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Schemas and codecs keyed by schema id.
///
/// Schemas are immutable per id, so entries are never invalidated. Locks are
/// only held while reading or inserting, never across a remote call.
#[derive(Debug, Default)]
pub struct SchemaCache {
    schemas: RwLock<HashMap<String, Arc<serde_json::Value>>>,
    codecs: RwLock<HashMap<String, Arc<Codec>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the parsed schema JSON for `schema_id`, fetching it on a miss.
    ///
    /// # Errors
    ///
    /// - [`Error::AuthExpired`] when the session must be refreshed
    /// - [`Error::MalformedSchema`] when the schema text is not JSON
    /// - [`Error::SchemaFetch`] for any other fetch failure
    pub async fn schema<B: EventBus>(
        &self,
        bus: &B,
        schema_id: &str,
    ) -> Result<Arc<serde_json::Value>, Error> {
        if let Some(schema) = self.cached_schema(schema_id)? {
            return Ok(schema);
        }

        info!(schema_id, "Fetching uncached schema");
        let schema_info = bus
            .get_schema(schema_id)
            .await
            .map_err(|e| match e {
                Error::AuthExpired => Error::AuthExpired,
                other => Error::SchemaFetch {
                    schema_id: schema_id.to_string(),
                    source: Box::new(other),
                },
            })?;

        let schema: serde_json::Value = serde_json::from_str(&schema_info.schema_json)
            .map_err(|e| Error::MalformedSchema {
                schema_id: schema_id.to_string(),
                source: codec::Error::Json(e),
            })?;

        let schema = Arc::new(schema);
        let mut schemas = self
            .schemas
            .write()
            .map_err(|_| Error::LockError("schema cache"))?;
        Ok(Arc::clone(
            schemas
                .entry(schema_id.to_string())
                .or_insert_with(|| schema),
        ))
    }

    /// Returns the codec for `schema_id`, building it from the schema on a miss.
    ///
    /// # Errors
    ///
    /// Same as [`schema`](Self::schema). A schema that is JSON but not a
    /// usable record schema is reported as [`Error::MalformedSchema`].
    pub async fn codec<B: EventBus>(&self, bus: &B, schema_id: &str) -> Result<Arc<Codec>, Error> {
        if let Some(codec) = self.cached_codec(schema_id)? {
            return Ok(codec);
        }

        let schema = self.schema(bus, schema_id).await?;
        debug!(schema_id, "Creating codec from schema");
        let codec = Codec::from_value(&schema).map_err(|source| Error::MalformedSchema {
            schema_id: schema_id.to_string(),
            source,
        })?;

        let codec = Arc::new(codec);
        let mut codecs = self
            .codecs
            .write()
            .map_err(|_| Error::LockError("codec cache"))?;
        Ok(Arc::clone(
            codecs.entry(schema_id.to_string()).or_insert_with(|| codec),
        ))
    }

    fn cached_schema(&self, schema_id: &str) -> Result<Option<Arc<serde_json::Value>>, Error> {
        let schemas = self
            .schemas
            .read()
            .map_err(|_| Error::LockError("schema cache"))?;
        Ok(schemas.get(schema_id).cloned())
    }

    fn cached_codec(&self, schema_id: &str) -> Result<Option<Arc<Codec>>, Error> {
        let codecs = self
            .codecs
            .read()
            .map_err(|_| Error::LockError("codec cache"))?;
        Ok(codecs.get(schema_id).cloned())
    }
}
