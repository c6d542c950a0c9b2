//! Message profiles: per-structure overrides of the generic schema.
//!
//! A profile is written in the same DSL as the reference schemas. Its messages embed
//! the profile's own segment definitions; segments and datatypes the profile does not
//! define resolve through the generic schema of the same version.

use crate::error::{Hl7Error, Result};
use crate::schema::{Schema, SchemaProvider, SchemaVersion, StructureDef};
use crate::schema_parser::parse_schema;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct MessageProfile {
    version: SchemaVersion,
    roots: HashMap<String, Arc<StructureDef>>,
}

impl MessageProfile {
    pub fn new(version: SchemaVersion) -> Self {
        MessageProfile {
            version,
            roots: HashMap::new(),
        }
    }

    /// Resolve profile DSL against `base` for everything it leaves out.
    pub fn from_dsl(source: &str, base: &dyn SchemaProvider) -> Result<Self> {
        let ast = parse_schema(source)?;
        let schema = Schema::resolve_with_fallback(&ast, base)?;
        let roots = schema
            .message_names()
            .filter_map(|name| schema.message(name).map(|m| (name.to_string(), m.clone())))
            .collect();
        Ok(MessageProfile {
            version: schema.version(),
            roots,
        })
    }

    pub fn from_file(path: impl AsRef<Path>, base: &dyn SchemaProvider) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_dsl(&source, base)
    }

    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    pub fn insert(&mut self, root: StructureDef) {
        self.roots.insert(root.name.clone(), Arc::new(root));
    }

    pub fn structure_names(&self) -> impl Iterator<Item = &str> {
        self.roots.keys().map(String::as_str)
    }

    /// Root structure of `name`; [`Hl7Error::MessageProfileNotFound`] when absent.
    pub fn structure(&self, name: &str) -> Result<Arc<StructureDef>> {
        self.roots
            .get(name)
            .cloned()
            .ok_or_else(|| Hl7Error::MessageProfileNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ReferenceLibrary;
    use crate::schema::ElementKind;

    const PROFILE: &str = r#"
        version "2.5";
        segment PID "PATIENT_IDENTIFICATION" {
            PID_1: SI [1..1] (4) "SET_ID_PID";
            PID_3: CX [1..1] (250) "PATIENT_IDENTIFIER_LIST";
            PID_5: XPN [1..1] (250) "PATIENT_NAME";
        }
        message ADT_A01 {
            MSH [1..1];
            EVN [1..1];
            PID [1..1];
            PV1 [0..1];
        }
    "#;

    #[test]
    fn embeds_overrides_and_defers_the_rest() {
        let base = ReferenceLibrary::bundled().expect("bundled");
        let profile = MessageProfile::from_dsl(PROFILE, base.as_ref()).expect("profile");
        let root = profile.structure("ADT_A01").expect("root");
        let pid = root.slot("PID").and_then(|s| s.reference.clone()).expect("pid");
        assert_eq!(pid.slots().len(), 3);
        assert_eq!(
            pid.slot("PID_5").map(|s| s.cardinality.to_string()),
            Some("[1..1]".to_string())
        );
        // Not redefined: resolved through the generic schema at use time.
        assert!(root.slot("EVN").and_then(|s| s.reference.clone()).is_none());
        assert!(base
            .find_structure("EVN", ElementKind::Segment, profile.version())
            .is_ok());
    }

    #[test]
    fn missing_structure() {
        let profile = MessageProfile::new(SchemaVersion::V2_5);
        assert!(matches!(
            profile.structure("ORU_R01"),
            Err(Hl7Error::MessageProfileNotFound(_))
        ));
    }
}
