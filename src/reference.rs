//! Bundled reference schemas, one per supported HL7 release.
//!
//! The DSL sources under `data/` are compiled into the binary and resolved the first
//! time [`ReferenceLibrary::bundled`] is called.

use crate::error::{Hl7Error, Result};
use crate::schema::{ElementKind, Schema, SchemaProvider, SchemaVersion, StructureDef};
use crate::schema_parser::load_schema;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::debug;

const V2_5: &str = include_str!("../data/v2_5.hl7s");
const V2_7: &str = include_str!("../data/v2_7.hl7s");

static BUNDLED: OnceCell<Arc<ReferenceLibrary>> = OnceCell::new();

/// Set of resolved schemas; lookups pick the schema of the requested release.
#[derive(Debug, Default)]
pub struct ReferenceLibrary {
    schemas: Vec<Schema>,
}

impl ReferenceLibrary {
    pub fn new(schemas: Vec<Schema>) -> Self {
        ReferenceLibrary { schemas }
    }

    /// Schemas shipped with the crate (v2.5 and v2.7 subsets).
    pub fn bundled() -> Result<Arc<ReferenceLibrary>> {
        BUNDLED
            .get_or_try_init(|| -> Result<Arc<ReferenceLibrary>> {
                let mut schemas = Vec::new();
                for source in [V2_5, V2_7] {
                    let schema = load_schema(source)?;
                    debug!(version = %schema.version(), "loaded bundled reference schema");
                    schemas.push(schema);
                }
                Ok(Arc::new(ReferenceLibrary::new(schemas)))
            })
            .cloned()
    }

    /// Add (or replace) the schema of one release.
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schemas
            .retain(|s| !s.version().same_release(schema.version()));
        self.schemas.push(schema);
        self
    }

    pub fn versions(&self) -> impl Iterator<Item = SchemaVersion> + '_ {
        self.schemas.iter().map(Schema::version)
    }

    pub fn schema(&self, version: SchemaVersion) -> Option<&Schema> {
        self.schemas
            .iter()
            .find(|s| s.version() == version)
            .or_else(|| self.schemas.iter().find(|s| s.supports_version(version)))
    }

    fn schema_or_err(&self, version: SchemaVersion) -> Result<&Schema> {
        self.schema(version)
            .ok_or_else(|| Hl7Error::UnsupportedVersion(version.to_string()))
    }
}

impl SchemaProvider for ReferenceLibrary {
    fn find_structure(
        &self,
        name: &str,
        kind: ElementKind,
        version: SchemaVersion,
    ) -> Result<Arc<StructureDef>> {
        let schema = self.schema_or_err(version)?;
        schema.find_structure(name, kind, schema.version())
    }

    fn is_base_datatype(&self, name: &str, version: SchemaVersion) -> bool {
        self.schema(version)
            .map_or(false, |s| s.is_base_datatype(name, version))
    }

    fn datatype_structure(
        &self,
        datatype: &str,
        kind: ElementKind,
        version: SchemaVersion,
    ) -> Option<Arc<StructureDef>> {
        self.schema(version)
            .and_then(|s| s.datatype_structure(datatype, kind, version))
    }

    fn table(&self, id: &str, version: SchemaVersion) -> Option<&[String]> {
        self.schema(version).and_then(|s| s.table(id, version))
    }

    fn supports_version(&self, version: SchemaVersion) -> bool {
        self.schema(version).is_some()
    }
}
