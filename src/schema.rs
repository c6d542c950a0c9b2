//! Structure definitions the element tree is built and validated against, and the
//! resolved reference schema produced from the schema DSL.
//!
//! A [`StructureDef`] describes one named element (message, group, segment, field,
//! component or subcomponent): its kind, its declared datatype and table for leaf
//! kinds, and the ordered list of [`ChildSlot`]s it expects. Slots may embed the
//! child's own definition (groups always do; message profiles do for everything they
//! override); when they don't, the child is resolved through a [`SchemaProvider`].

use crate::ast::{LeafField, Member, SchemaSource};
use crate::error::{Hl7Error, Result};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Datatype name of heterogeneous fields/components.
pub const VARIES: &str = "varies";

/// The six node kinds of an HL7 message tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Message,
    Group,
    Segment,
    Field,
    Component,
    SubComponent,
}

impl ElementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ElementKind::Message => "Message",
            ElementKind::Group => "Group",
            ElementKind::Segment => "Segment",
            ElementKind::Field => "Field",
            ElementKind::Component => "Component",
            ElementKind::SubComponent => "SubComponent",
        }
    }

    /// Kinds accepted as direct children.
    pub fn child_kinds(self) -> &'static [ElementKind] {
        match self {
            ElementKind::Message | ElementKind::Group => {
                &[ElementKind::Group, ElementKind::Segment]
            }
            ElementKind::Segment => &[ElementKind::Field],
            ElementKind::Field => &[ElementKind::Component],
            ElementKind::Component => &[ElementKind::SubComponent],
            ElementKind::SubComponent => &[],
        }
    }

    /// Child kind of the datatype-driven levels (field → component → subcomponent).
    pub fn datatype_child(self) -> Option<ElementKind> {
        match self {
            ElementKind::Field => Some(ElementKind::Component),
            ElementKind::Component => Some(ElementKind::SubComponent),
            _ => None,
        }
    }

    pub fn has_datatype(self) -> bool {
        matches!(
            self,
            ElementKind::Field | ElementKind::Component | ElementKind::SubComponent
        )
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HL7 version a structure was resolved against (`2.5`, `2.5.1`, `2.7`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl SchemaVersion {
    pub const V2_5: SchemaVersion = SchemaVersion::new(2, 5, 0);
    pub const V2_7: SchemaVersion = SchemaVersion::new(2, 7, 0);

    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        SchemaVersion {
            major,
            minor,
            patch,
        }
    }

    /// The truncation character (fifth MSH-2 char) exists from 2.7 on.
    pub fn supports_truncation(self) -> bool {
        (self.major, self.minor) >= (2, 7)
    }

    pub fn same_release(self, other: SchemaVersion) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

impl Default for SchemaVersion {
    fn default() -> Self {
        SchemaVersion::V2_5
    }
}

impl FromStr for SchemaVersion {
    type Err = Hl7Error;

    fn from_str(s: &str) -> Result<Self> {
        let unsupported = || Hl7Error::UnsupportedVersion(s.to_string());
        let mut parts = s.trim().split('.');
        let mut next = |required: bool| -> Result<u8> {
            match parts.next() {
                Some(p) => p.parse::<u8>().map_err(|_| unsupported()),
                None if required => Err(unsupported()),
                None => Ok(0),
            }
        };
        let major = next(true)?;
        let minor = next(true)?;
        let patch = next(false)?;
        if parts.next().is_some() {
            return Err(unsupported());
        }
        Ok(SchemaVersion::new(major, minor, patch))
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.patch == 0 {
            write!(f, "{}.{}", self.major, self.minor)
        } else {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
        }
    }
}

/// Occurrence range of a child slot; `max == None` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cardinality {
    pub min: u32,
    pub max: Option<u32>,
}

impl Cardinality {
    pub const OPTIONAL: Cardinality = Cardinality {
        min: 0,
        max: Some(1),
    };
    pub const REQUIRED: Cardinality = Cardinality {
        min: 1,
        max: Some(1),
    };

    pub const fn new(min: u32, max: Option<u32>) -> Self {
        Cardinality { min, max }
    }

    /// True once `count` instances leave no room for another one.
    pub fn is_reached(&self, count: usize) -> bool {
        self.max.map_or(false, |m| count >= m as usize)
    }

    pub fn is_exceeded(&self, count: usize) -> bool {
        self.max.map_or(false, |m| count > m as usize)
    }

    pub fn is_missing(&self, count: usize) -> bool {
        count < self.min as usize
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(m) => write!(f, "[{}..{}]", self.min, m),
            None => write!(f, "[{}..*]", self.min),
        }
    }
}

/// One expected child position of a structure.
#[derive(Debug, Clone)]
pub struct ChildSlot {
    pub name: String,
    pub kind: ElementKind,
    pub cardinality: Cardinality,
    pub long_name: Option<String>,
    /// Embedded definition of the child; `None` means "ask the schema provider".
    pub reference: Option<Arc<StructureDef>>,
}

/// Content model of a structure.
#[derive(Debug, Clone)]
pub enum Content {
    Sequence(Vec<ChildSlot>),
    Choice(Vec<ChildSlot>),
    /// Base datatype value (or `varies`).
    Leaf,
}

#[derive(Debug, Clone)]
pub struct StructureDef {
    pub name: String,
    pub kind: ElementKind,
    pub long_name: Option<String>,
    pub datatype: Option<String>,
    pub table: Option<String>,
    pub max_length: Option<usize>,
    pub content: Content,
}

impl StructureDef {
    pub fn slots(&self) -> &[ChildSlot] {
        match &self.content {
            Content::Sequence(s) | Content::Choice(s) => s,
            Content::Leaf => &[],
        }
    }

    pub fn slot(&self, name: &str) -> Option<&ChildSlot> {
        self.slots().iter().find(|s| s.name == name)
    }

    pub fn slot_position(&self, name: &str) -> Option<usize> {
        self.slots().iter().position(|s| s.name == name)
    }

    pub fn slot_by_long_name(&self, long_name: &str) -> Option<&ChildSlot> {
        self.slots()
            .iter()
            .find(|s| s.long_name.as_deref() == Some(long_name))
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.content, Content::Leaf)
    }

    pub fn is_choice(&self) -> bool {
        matches!(self.content, Content::Choice(_))
    }

    pub fn is_varies(&self) -> bool {
        self.datatype.as_deref() == Some(VARIES)
    }
}

/// Static lookup service over versioned structure definitions.
pub trait SchemaProvider: fmt::Debug + Send + Sync {
    /// Resolve `name` as an element of `kind`; [`Hl7Error::InvalidName`] when absent.
    fn find_structure(
        &self,
        name: &str,
        kind: ElementKind,
        version: SchemaVersion,
    ) -> Result<Arc<StructureDef>>;

    fn is_base_datatype(&self, name: &str, version: SchemaVersion) -> bool;

    /// Children of a complex datatype laid out for an element of `kind`
    /// (component slots for a field, subcomponent slots for a component).
    fn datatype_structure(
        &self,
        datatype: &str,
        kind: ElementKind,
        version: SchemaVersion,
    ) -> Option<Arc<StructureDef>>;

    /// Codes of an HL7 table, when the schema carries it.
    fn table(&self, id: &str, version: SchemaVersion) -> Option<&[String]>;

    fn supports_version(&self, version: SchemaVersion) -> bool;
}

/// Reference schema of one HL7 version, resolved from [`SchemaSource`].
#[derive(Debug, Default)]
pub struct Schema {
    version: SchemaVersion,
    base_types: HashSet<String>,
    tables: HashMap<String, Vec<String>>,
    messages: HashMap<String, Arc<StructureDef>>,
    groups: HashMap<String, Arc<StructureDef>>,
    segments: HashMap<String, Arc<StructureDef>>,
    fields: HashMap<String, Arc<StructureDef>>,
    components: HashMap<String, Arc<StructureDef>>,
    subcomponents: HashMap<String, Arc<StructureDef>>,
    /// Complex datatypes laid out as field content (component slots).
    field_datatypes: HashMap<String, Arc<StructureDef>>,
    /// Complex datatypes laid out as component content (subcomponent slots).
    component_datatypes: HashMap<String, Arc<StructureDef>>,
}

impl Schema {
    pub fn resolve(source: SchemaSource) -> Result<Self> {
        Resolver::new(&source, None)?.run()
    }

    /// Resolve a partial schema whose unknown datatypes and segments fall back to `base`.
    pub(crate) fn resolve_with_fallback(
        source: &SchemaSource,
        base: &dyn SchemaProvider,
    ) -> Result<Self> {
        Resolver::new(source, Some(base))?.run()
    }

    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    pub fn message(&self, name: &str) -> Option<&Arc<StructureDef>> {
        self.messages.get(name)
    }

    pub fn message_names(&self) -> impl Iterator<Item = &str> {
        self.messages.keys().map(String::as_str)
    }

    pub fn segment(&self, name: &str) -> Option<&Arc<StructureDef>> {
        self.segments.get(name)
    }

    pub fn has_table(&self, id: &str) -> bool {
        self.tables.contains_key(id)
    }

    fn map_for(&self, kind: ElementKind) -> &HashMap<String, Arc<StructureDef>> {
        match kind {
            ElementKind::Message => &self.messages,
            ElementKind::Group => &self.groups,
            ElementKind::Segment => &self.segments,
            ElementKind::Field => &self.fields,
            ElementKind::Component => &self.components,
            ElementKind::SubComponent => &self.subcomponents,
        }
    }
}

impl SchemaProvider for Schema {
    fn find_structure(
        &self,
        name: &str,
        kind: ElementKind,
        version: SchemaVersion,
    ) -> Result<Arc<StructureDef>> {
        if !self.supports_version(version) {
            return Err(Hl7Error::UnsupportedVersion(version.to_string()));
        }
        self.map_for(kind)
            .get(name)
            .cloned()
            .ok_or_else(|| Hl7Error::invalid_name(kind, name))
    }

    fn is_base_datatype(&self, name: &str, _version: SchemaVersion) -> bool {
        self.base_types.contains(name)
    }

    fn datatype_structure(
        &self,
        datatype: &str,
        kind: ElementKind,
        _version: SchemaVersion,
    ) -> Option<Arc<StructureDef>> {
        match kind {
            ElementKind::Field => self.field_datatypes.get(datatype).cloned(),
            ElementKind::Component => self.component_datatypes.get(datatype).cloned(),
            _ => None,
        }
    }

    fn table(&self, id: &str, _version: SchemaVersion) -> Option<&[String]> {
        self.tables.get(id).map(Vec::as_slice)
    }

    fn supports_version(&self, version: SchemaVersion) -> bool {
        self.version.same_release(version)
    }
}

/// Builds a [`Schema`] from the DSL AST, bottom-up: subcomponents, components,
/// fields, segments, then groups and messages.
struct Resolver<'a> {
    source: &'a SchemaSource,
    fallback: Option<&'a dyn SchemaProvider>,
    schema: Schema,
}

impl<'a> Resolver<'a> {
    fn new(source: &'a SchemaSource, fallback: Option<&'a dyn SchemaProvider>) -> Result<Self> {
        let version: SchemaVersion = source.version.parse()?;
        let mut base_types: HashSet<String> = source.base_types.iter().cloned().collect();
        base_types.insert(VARIES.to_string());
        Ok(Resolver {
            source,
            fallback,
            schema: Schema {
                version,
                base_types,
                ..Schema::default()
            },
        })
    }

    fn run(mut self) -> Result<Schema> {
        self.resolve_tables()?;
        self.resolve_datatypes()?;
        self.resolve_segments()?;
        self.resolve_messages()?;
        Ok(self.schema)
    }

    fn is_base(&self, datatype: &str) -> bool {
        self.schema.base_types.contains(datatype)
            || self
                .fallback
                .map_or(false, |f| f.is_base_datatype(datatype, self.schema.version))
    }

    fn resolve_tables(&mut self) -> Result<()> {
        let source = self.source;
        for t in &source.tables {
            if self
                .schema
                .tables
                .insert(t.id.clone(), t.codes.clone())
                .is_some()
            {
                return Err(Hl7Error::Schema(format!("Duplicate table: {}", t.id)));
            }
        }
        Ok(())
    }

    fn resolve_datatypes(&mut self) -> Result<()> {
        let source = self.source;
        let mut seen = HashSet::new();
        for dt in &source.datatypes {
            if !seen.insert(dt.name.as_str()) {
                return Err(Hl7Error::Schema(format!("Duplicate datatype: {}", dt.name)));
            }
            if self.schema.base_types.contains(&dt.name) {
                return Err(Hl7Error::Schema(format!(
                    "Datatype {} is declared both base and complex",
                    dt.name
                )));
            }
            for c in &dt.components {
                check_prefix(&c.name, &dt.name)?;
                let sub = Arc::new(leaf_structure(c, ElementKind::SubComponent, Content::Leaf));
                self.schema.subcomponents.insert(c.name.clone(), sub);
            }
        }
        // Subcomponent-level layouts only need the subcomponent table above.
        for dt in &source.datatypes {
            let slots = dt
                .components
                .iter()
                .map(|c| ChildSlot {
                    name: c.name.clone(),
                    kind: ElementKind::SubComponent,
                    cardinality: Cardinality::OPTIONAL,
                    long_name: Some(c.long_name.clone()),
                    reference: self.schema.subcomponents.get(&c.name).cloned(),
                })
                .collect();
            self.schema.component_datatypes.insert(
                dt.name.clone(),
                Arc::new(datatype_structure(&dt.name, ElementKind::Component, slots)),
            );
        }
        for dt in &source.datatypes {
            for c in &dt.components {
                let content = self.content_for(&c.datatype, ElementKind::Component, &c.name)?;
                let comp = Arc::new(leaf_structure(c, ElementKind::Component, content));
                self.schema.components.insert(c.name.clone(), comp);
            }
        }
        for dt in &source.datatypes {
            let slots = dt
                .components
                .iter()
                .map(|c| ChildSlot {
                    name: c.name.clone(),
                    kind: ElementKind::Component,
                    cardinality: Cardinality::OPTIONAL,
                    long_name: Some(c.long_name.clone()),
                    reference: self.schema.components.get(&c.name).cloned(),
                })
                .collect();
            self.schema.field_datatypes.insert(
                dt.name.clone(),
                Arc::new(datatype_structure(&dt.name, ElementKind::Field, slots)),
            );
        }
        Ok(())
    }

    /// Content of a field/component typed `datatype`: leaf for base types, the
    /// datatype's children otherwise.
    fn content_for(&self, datatype: &str, kind: ElementKind, owner: &str) -> Result<Content> {
        if self.is_base(datatype) {
            return Ok(Content::Leaf);
        }
        let local = match kind {
            ElementKind::Field => self.schema.field_datatypes.get(datatype),
            _ => self.schema.component_datatypes.get(datatype),
        };
        let structure = match local {
            Some(s) => Some(s.clone()),
            None => self
                .fallback
                .and_then(|f| f.datatype_structure(datatype, kind, self.schema.version)),
        };
        structure
            .map(|s| Content::Sequence(s.slots().to_vec()))
            .ok_or_else(|| {
                Hl7Error::Schema(format!("Unknown datatype {} used by {}", datatype, owner))
            })
    }

    fn resolve_segments(&mut self) -> Result<()> {
        let source = self.source;
        for seg in &source.segments {
            if !is_segment_code(&seg.name) {
                return Err(Hl7Error::Schema(format!("Invalid segment name: {}", seg.name)));
            }
            let mut slots = Vec::with_capacity(seg.fields.len());
            for f in &seg.fields {
                check_prefix(&f.name, &seg.name)?;
                let content = self.content_for(&f.datatype, ElementKind::Field, &f.name)?;
                let field = Arc::new(leaf_structure(f, ElementKind::Field, content));
                if self
                    .schema
                    .fields
                    .insert(f.name.clone(), field.clone())
                    .is_some()
                {
                    return Err(Hl7Error::Schema(format!("Duplicate field: {}", f.name)));
                }
                slots.push(ChildSlot {
                    name: f.name.clone(),
                    kind: ElementKind::Field,
                    cardinality: f.cardinality.unwrap_or(Cardinality::OPTIONAL),
                    long_name: Some(f.long_name.clone()),
                    reference: Some(field),
                });
            }
            let def = StructureDef {
                name: seg.name.clone(),
                kind: ElementKind::Segment,
                long_name: seg.description.clone(),
                datatype: None,
                table: None,
                max_length: None,
                content: Content::Sequence(slots),
            };
            if self
                .schema
                .segments
                .insert(seg.name.clone(), Arc::new(def))
                .is_some()
            {
                return Err(Hl7Error::Schema(format!("Duplicate segment: {}", seg.name)));
            }
        }
        Ok(())
    }

    fn resolve_messages(&mut self) -> Result<()> {
        let source = self.source;
        for msg in &source.messages {
            let slots = self.member_slots(&msg.name, &msg.members)?;
            let def = StructureDef {
                name: msg.name.clone(),
                kind: ElementKind::Message,
                long_name: None,
                datatype: None,
                table: None,
                max_length: None,
                content: if msg.choice {
                    Content::Choice(slots)
                } else {
                    Content::Sequence(slots)
                },
            };
            if self
                .schema
                .messages
                .insert(msg.name.clone(), Arc::new(def))
                .is_some()
            {
                return Err(Hl7Error::Schema(format!("Duplicate message: {}", msg.name)));
            }
        }
        Ok(())
    }

    fn member_slots(&mut self, owner: &str, members: &[Member]) -> Result<Vec<ChildSlot>> {
        let mut slots = Vec::with_capacity(members.len());
        for m in members {
            if slots.iter().any(|s: &ChildSlot| s.name == m.name()) {
                return Err(Hl7Error::Schema(format!(
                    "{} declares {} twice",
                    owner,
                    m.name()
                )));
            }
            match m {
                Member::Segment { name, cardinality } => {
                    let reference = self.schema.segments.get(name).cloned();
                    if reference.is_none() && self.fallback.is_none() {
                        return Err(Hl7Error::Schema(format!(
                            "{} references unknown segment {}",
                            owner, name
                        )));
                    }
                    slots.push(ChildSlot {
                        name: name.clone(),
                        kind: ElementKind::Segment,
                        cardinality: *cardinality,
                        long_name: None,
                        reference,
                    });
                }
                Member::Group(g) => {
                    let children = self.member_slots(&g.name, &g.members)?;
                    let def = Arc::new(StructureDef {
                        name: g.name.clone(),
                        kind: ElementKind::Group,
                        long_name: None,
                        datatype: None,
                        table: None,
                        max_length: None,
                        content: if g.choice {
                            Content::Choice(children)
                        } else {
                            Content::Sequence(children)
                        },
                    });
                    if self
                        .schema
                        .groups
                        .insert(g.name.clone(), def.clone())
                        .is_some()
                    {
                        return Err(Hl7Error::Schema(format!("Duplicate group: {}", g.name)));
                    }
                    slots.push(ChildSlot {
                        name: g.name.clone(),
                        kind: ElementKind::Group,
                        cardinality: g.cardinality,
                        long_name: None,
                        reference: Some(def),
                    });
                }
            }
        }
        Ok(slots)
    }
}

fn leaf_structure(def: &LeafField, kind: ElementKind, content: Content) -> StructureDef {
    StructureDef {
        name: def.name.clone(),
        kind,
        long_name: Some(def.long_name.clone()),
        datatype: Some(def.datatype.clone()),
        table: def.table.clone(),
        max_length: def.max_length,
        content,
    }
}

fn datatype_structure(name: &str, kind: ElementKind, slots: Vec<ChildSlot>) -> StructureDef {
    StructureDef {
        name: name.to_string(),
        kind,
        long_name: None,
        datatype: Some(name.to_string()),
        table: None,
        max_length: None,
        content: Content::Sequence(slots),
    }
}

fn check_prefix(name: &str, owner: &str) -> Result<()> {
    match name.strip_prefix(owner).and_then(|r| r.strip_prefix('_')) {
        Some(n) if n.parse::<usize>().is_ok() => Ok(()),
        _ => Err(Hl7Error::Schema(format!(
            "{} is not a positional child name of {}",
            name, owner
        ))),
    }
}

/// Three characters: an uppercase letter followed by uppercase letters or digits.
pub fn is_segment_code(name: &str) -> bool {
    let b = name.as_bytes();
    b.len() == 3
        && b[0].is_ascii_uppercase()
        && b[1..]
            .iter()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// Position encoded in a child name (`PID_5` → 5, `XPN_2` → 2).
pub fn name_position(name: &str) -> Option<usize> {
    name.rsplit_once('_').and_then(|(_, n)| n.parse().ok())
}

/// Locally-defined extension element (`ZIN`, `ZIN_3`, ...).
pub fn is_z_name(name: &str) -> bool {
    name.starts_with('Z')
}
