//! Abstract Syntax Tree for the reference-schema DSL.
//!
//! The DSL describes one HL7 version: base datatypes, tables, complex datatypes,
//! segments with their fields, and message structures with nested groups. It is
//! turned into a [`Schema`](crate::schema::Schema) by [`Schema::resolve`](crate::schema::Schema::resolve).

use crate::schema::Cardinality;

/// Root of a schema source file.
#[derive(Debug, Clone, Default)]
pub struct SchemaSource {
    pub version: String,
    pub base_types: Vec<String>,
    pub tables: Vec<TableSection>,
    pub datatypes: Vec<DatatypeSection>,
    pub segments: Vec<SegmentSection>,
    pub messages: Vec<MessageSection>,
}

#[derive(Debug, Clone)]
pub struct TableSection {
    pub id: String,
    pub description: Option<String>,
    pub codes: Vec<String>,
}

/// Complex datatype: ordered components, named `<DATATYPE>_<n>`.
#[derive(Debug, Clone)]
pub struct DatatypeSection {
    pub name: String,
    pub components: Vec<LeafField>,
}

/// A field of a segment or a component of a datatype.
#[derive(Debug, Clone)]
pub struct LeafField {
    pub name: String,
    pub datatype: String,
    /// Only fields carry a cardinality; components are always `[0..1]`.
    pub cardinality: Option<Cardinality>,
    pub max_length: Option<usize>,
    pub long_name: String,
    pub table: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SegmentSection {
    pub name: String,
    pub description: Option<String>,
    pub fields: Vec<LeafField>,
}

#[derive(Debug, Clone)]
pub struct MessageSection {
    pub name: String,
    pub choice: bool,
    pub members: Vec<Member>,
}

#[derive(Debug, Clone)]
pub struct GroupSection {
    pub name: String,
    pub cardinality: Cardinality,
    pub choice: bool,
    pub members: Vec<Member>,
}

/// Entry of a message or group body.
#[derive(Debug, Clone)]
pub enum Member {
    Segment {
        name: String,
        cardinality: Cardinality,
    },
    Group(GroupSection),
}

impl Member {
    pub fn name(&self) -> &str {
        match self {
            Member::Segment { name, .. } => name,
            Member::Group(g) => &g.name,
        }
    }
}
