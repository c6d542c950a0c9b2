//! The message tree.
//!
//! An [`Element`] is a shared handle to one node (message, group, segment, field,
//! component or subcomponent). Nodes own their children through a [`ChildList`] and
//! point back to their parent weakly.
//!
//! Navigation never mutates the tree: asking for a child that does not exist yet
//! returns a *traversing* placeholder that only knows its would-be parent. The first
//! write through such a placeholder (`set`, `add`, `set_value`) commits the whole chain
//! of placeholders up to the first committed ancestor, or nothing at all when any link
//! of the chain is rejected.

use crate::config::{Config, ValidationLevel};
use crate::datatype::{self, Value};
use crate::encoding::EncodingChars;
use crate::error::{Hl7Error, Result};
use crate::parser;
use crate::profile::MessageProfile;
use crate::schema::{is_segment_code, is_z_name, ElementKind, SchemaVersion, StructureDef, VARIES};
use crate::serializer::{self, Er7Options};
use crate::validation::{ValidationReport, Validator};
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::rc::{Rc, Weak};
use std::cell::RefCell;
use std::sync::Arc;
use tracing::{debug, warn};

/// Index key of unnamed children (single child of base-typed fields/components,
/// positional subcomponents of `varies` components).
const UNNAMED: &str = "";

/// Highest position accepted for a field or `VARIES_n` component the schema does not
/// declare.
const MAX_UNDECLARED_POSITION: usize = 999;

/// Ordered children plus a name → positions index.
#[derive(Debug, Default, Clone)]
pub struct ChildList {
    items: Vec<Element>,
    index: HashMap<String, Vec<usize>>,
}

impl ChildList {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Element> {
        self.items.iter()
    }

    /// Children called `name`, in insertion order; `""` selects unnamed children.
    pub fn named(&self, name: &str) -> Vec<Element> {
        self.index
            .get(name)
            .map(|ix| ix.iter().map(|&i| self.items[i].clone()).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, name: &str) -> usize {
        self.index.get(name).map_or(0, Vec::len)
    }

    fn position(&self, el: &Element) -> Option<usize> {
        self.items.iter().position(|c| c == el)
    }

    fn push(&mut self, el: Element) {
        self.index
            .entry(el.key())
            .or_default()
            .push(self.items.len());
        self.items.push(el);
    }

    fn insert_at(&mut self, pos: usize, el: Element) {
        self.items.insert(pos, el);
        self.reindex();
    }

    fn remove_at(&mut self, pos: usize) -> Element {
        let el = self.items.remove(pos);
        self.reindex();
        el
    }

    fn replace_at(&mut self, pos: usize, el: Element) -> Element {
        let old = std::mem::replace(&mut self.items[pos], el);
        self.reindex();
        old
    }

    fn take(&mut self) -> Vec<Element> {
        self.index.clear();
        std::mem::take(&mut self.items)
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, el) in self.items.iter().enumerate() {
            self.index.entry(el.key()).or_default().push(i);
        }
    }
}

/// Relationship of a node to the tree.
enum Linkage {
    Detached,
    /// Placeholder reached by navigation; keeps its would-be parent alive.
    Traversing(Element),
    Committed(Weak<RefCell<Node>>),
}

/// Public view of [`Linkage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Detached,
    Traversing,
    Committed,
}

struct Node {
    kind: ElementKind,
    name: Option<String>,
    long_name: Option<String>,
    config: Config,
    /// Own definition (cardinality owner, datatype, table, max length).
    structure: Option<Arc<StructureDef>>,
    /// Definition whose slots are this node's children.
    layout: Option<Arc<StructureDef>>,
    datatype: Option<String>,
    value: Option<Value>,
    /// Messages only: separators installed at construction or by `set_encoding_chars`.
    encoding_chars: Option<EncodingChars>,
    children: ChildList,
    linkage: Linkage,
    /// Live placeholders handed out by navigation, reused by repeated reads.
    pending: HashMap<String, Weak<RefCell<Node>>>,
}

impl Node {
    fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.kind.as_str().to_string())
    }

    /// Field/component holding a single base-typed value.
    fn is_base(&self) -> bool {
        self.layout.is_none()
            && self.datatype.as_deref().map_or(false, |dt| {
                dt != VARIES
                    && self
                        .config
                        .schema
                        .is_base_datatype(dt, self.config.version)
            })
    }

    /// Field/component without a known layout or base type.
    fn is_varies(&self) -> bool {
        matches!(self.kind, ElementKind::Field | ElementKind::Component)
            && self.layout.is_none()
            && !self.is_base()
    }

    fn notice(&self, message: fmt::Arguments<'_>) {
        if !self.config.validation_level.is_quiet() {
            warn!("{}", message);
        }
    }
}

/// What a new child of a node looks like.
#[derive(Debug, Clone)]
struct ChildSpec {
    kind: ElementKind,
    name: Option<String>,
    structure: Option<Arc<StructureDef>>,
    datatype: Option<String>,
}

impl ChildSpec {
    fn named(kind: ElementKind, name: &str, structure: Option<Arc<StructureDef>>) -> Self {
        ChildSpec {
            kind,
            name: Some(name.to_string()),
            structure,
            datatype: None,
        }
    }
}

/// Right-hand side of [`Element::set`].
#[derive(Debug, Clone)]
pub enum Assign {
    /// ER7 text, parsed according to the target's datatype.
    Text(String),
    /// Scalar for a base-typed leaf.
    Value(Value),
    /// Ready-made element replacing (or appended as) the target.
    Element(Element),
}

impl From<&str> for Assign {
    fn from(s: &str) -> Self {
        Assign::Text(s.to_string())
    }
}

impl From<String> for Assign {
    fn from(s: String) -> Self {
        Assign::Text(s)
    }
}

impl From<&String> for Assign {
    fn from(s: &String) -> Self {
        Assign::Text(s.clone())
    }
}

impl From<Value> for Assign {
    fn from(v: Value) -> Self {
        Assign::Value(v)
    }
}

impl From<Element> for Assign {
    fn from(e: Element) -> Self {
        Assign::Element(e)
    }
}

impl From<&Element> for Assign {
    fn from(e: &Element) -> Self {
        Assign::Element(e.clone())
    }
}

/// Shared handle to a node of the message tree. Clones refer to the same node.
#[derive(Clone)]
pub struct Element(Rc<RefCell<Node>>);

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Element {}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(n) => f
                .debug_struct("Element")
                .field("kind", &n.kind)
                .field("name", &n.name)
                .field("datatype", &n.datatype)
                .field("children", &n.children.len())
                .finish(),
            Err(_) => f.write_str("Element(<borrowed>)"),
        }
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

/// Schema lookup honouring the validation level: unknown names become `None` unless
/// strict (Z names are always accepted).
pub(crate) fn lookup(config: &Config, name: &str, kind: ElementKind) -> Result<Option<Arc<StructureDef>>> {
    match config.schema.find_structure(name, kind, config.version) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.is_invalid_name() && is_z_name(name) => Ok(None),
        Err(e) if e.is_invalid_name() && !config.validation_level.is_strict() => {
            if !config.validation_level.is_quiet() {
                warn!(%kind, name, "unknown element accepted");
            }
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn layout_for(
    kind: ElementKind,
    structure: Option<&Arc<StructureDef>>,
    datatype: Option<&str>,
    config: &Config,
) -> Option<Arc<StructureDef>> {
    match kind {
        ElementKind::Message | ElementKind::Group | ElementKind::Segment => structure.cloned(),
        ElementKind::Field | ElementKind::Component => {
            let dt = datatype?;
            if dt == VARIES || config.schema.is_base_datatype(dt, config.version) {
                return None;
            }
            if let Some(s) = structure {
                if s.datatype.as_deref() == Some(dt) && !s.is_leaf() {
                    return Some(s.clone());
                }
            }
            config.schema.datatype_structure(dt, kind, config.version)
        }
        ElementKind::SubComponent => None,
    }
}

fn parse_positions(s: &str) -> Option<Vec<usize>> {
    let positions: Option<Vec<usize>> = s
        .split('_')
        .map(|p| p.parse::<usize>().ok().filter(|&n| n > 0))
        .collect();
    positions.filter(|p| !p.is_empty())
}

fn is_varies_name(name: &str) -> bool {
    name.strip_prefix("VARIES_")
        .and_then(|n| n.parse::<usize>().ok())
        .map_or(false, |n| n > 0 && n <= MAX_UNDECLARED_POSITION)
}

fn attach_chain(chain: Vec<(Element, Element)>) {
    for (parent, child) in chain.into_iter().rev() {
        parent.attach(&child, true);
    }
}

impl Element {
    fn build(
        kind: ElementKind,
        name: Option<String>,
        structure: Option<Arc<StructureDef>>,
        datatype: Option<String>,
        config: Config,
    ) -> Element {
        let datatype = datatype.or_else(|| structure.as_ref().and_then(|s| s.datatype.clone()));
        let layout = layout_for(kind, structure.as_ref(), datatype.as_deref(), &config);
        let long_name = structure.as_ref().and_then(|s| s.long_name.clone());
        Element(Rc::new(RefCell::new(Node {
            kind,
            name,
            long_name,
            config,
            structure,
            layout,
            datatype,
            value: None,
            encoding_chars: None,
            children: ChildList::default(),
            linkage: Linkage::Detached,
            pending: HashMap::new(),
        })))
    }

    /// Detached element called `name`, resolved against `config.schema`.
    ///
    /// Under [`ValidationLevel::Strict`] an unknown name is [`Hl7Error::InvalidName`];
    /// otherwise the element is created without a structure. Messages get their MSH
    /// header as with [`Element::message`].
    pub fn new(kind: ElementKind, name: &str, config: &Config) -> Result<Element> {
        if kind == ElementKind::Message {
            return Element::message(name, config);
        }
        let name = normalize(name);
        let structure = lookup(config, &name, kind)?;
        Ok(Element::build(kind, Some(name), structure, None, config.clone()))
    }

    /// Unnamed field/component/subcomponent of `datatype`.
    pub fn with_datatype(kind: ElementKind, datatype: &str, config: &Config) -> Result<Element> {
        if !kind.has_datatype() {
            return Err(Hl7Error::OperationNotAllowed(format!(
                "{} elements have no datatype",
                kind
            )));
        }
        let datatype = datatype.trim().to_string();
        let known = datatype == VARIES
            || config.schema.is_base_datatype(&datatype, config.version)
            || config
                .schema
                .datatype_structure(&datatype, kind, config.version)
                .is_some()
            || kind == ElementKind::SubComponent;
        if !known && config.validation_level.is_strict() {
            return Err(Hl7Error::invalid_name(kind, datatype));
        }
        Ok(Element::build(kind, None, None, Some(datatype), config.clone()))
    }

    /// New message with its MSH segment: MSH-1/MSH-2 from `config.encoding_chars`,
    /// MSH-7 set to now and MSH-12 to the version. An unknown structure (non-strict)
    /// yields an unnamed message.
    pub fn message(name: &str, config: &Config) -> Result<Element> {
        let name = normalize(name);
        let structure = lookup(config, &name, ElementKind::Message)?;
        let name = structure.as_ref().map(|_| name);
        let msg = Element::message_node(name, structure, config.clone());
        msg.init_header()?;
        Ok(msg)
    }

    /// New message whose structure comes from `profile`.
    pub fn message_with_profile(
        name: &str,
        profile: &MessageProfile,
        config: &Config,
    ) -> Result<Element> {
        let name = normalize(name);
        let structure = profile.structure(&name)?;
        let config = config.clone().version(profile.version());
        let msg = Element::message_node(Some(name), Some(structure), config);
        msg.init_header()?;
        Ok(msg)
    }

    pub(crate) fn message_node(
        name: Option<String>,
        structure: Option<Arc<StructureDef>>,
        config: Config,
    ) -> Element {
        let encoding_chars = config.encoding_chars;
        let msg = Element::build(ElementKind::Message, name, structure, None, config);
        msg.0.borrow_mut().encoding_chars = Some(encoding_chars);
        msg
    }

    fn init_header(&self) -> Result<()> {
        let enc = self.config().encoding_chars;
        let msh = self.new_child("MSH")?;
        parser::fill_raw_field(&msh, "MSH_1", &enc.msh1())?;
        parser::fill_raw_field(&msh, "MSH_2", &enc.msh2())?;
        self.add(&msh)?;
        msh.set("MSH_7", datatype::encode(&Value::now(), &enc))?;
        msh.set("MSH_12", self.version().to_string())?;
        Ok(())
    }

    // ------------------------------------------------------------------ accessors

    pub fn kind(&self) -> ElementKind {
        self.0.borrow().kind
    }

    pub fn name(&self) -> Option<String> {
        self.0.borrow().name.clone()
    }

    pub fn long_name(&self) -> Option<String> {
        self.0.borrow().long_name.clone()
    }

    pub fn datatype(&self) -> Option<String> {
        self.0.borrow().datatype.clone()
    }

    pub fn version(&self) -> SchemaVersion {
        self.0.borrow().config.version
    }

    pub fn validation_level(&self) -> ValidationLevel {
        self.0.borrow().config.validation_level
    }

    pub fn config(&self) -> Config {
        self.0.borrow().config.clone()
    }

    pub fn structure(&self) -> Option<Arc<StructureDef>> {
        self.0.borrow().structure.clone()
    }

    /// Definition of this element's children (own structure or its complex datatype).
    pub fn layout(&self) -> Option<Arc<StructureDef>> {
        self.0.borrow().layout.clone()
    }

    pub fn children(&self) -> Vec<Element> {
        self.0.borrow().children.items.clone()
    }

    pub fn children_named(&self, name: &str) -> Vec<Element> {
        self.0.borrow().children.named(&normalize(name))
    }

    pub fn child_count(&self) -> usize {
        self.0.borrow().children.len()
    }

    /// Run `f` over the child list without cloning it.
    pub fn with_children<R>(&self, f: impl FnOnce(&ChildList) -> R) -> R {
        f(&self.0.borrow().children)
    }

    /// Committed parent.
    pub fn parent(&self) -> Option<Element> {
        match &self.0.borrow().linkage {
            Linkage::Committed(w) => w.upgrade().map(Element),
            _ => None,
        }
    }

    pub fn link_state(&self) -> LinkState {
        match self.0.borrow().linkage {
            Linkage::Detached => LinkState::Detached,
            Linkage::Traversing(_) => LinkState::Traversing,
            Linkage::Committed(_) => LinkState::Committed,
        }
    }

    /// Field/component typed `varies` or with an unknown datatype.
    pub fn is_varies(&self) -> bool {
        self.0.borrow().is_varies()
    }

    pub fn is_base(&self) -> bool {
        self.0.borrow().is_base()
    }

    /// Segment whose last declared field is `varies`: any later position is accepted.
    pub fn allows_infinite_children(&self) -> bool {
        let node = self.0.borrow();
        node.kind == ElementKind::Segment
            && node
                .layout
                .as_ref()
                .and_then(|l| l.slots().last())
                .and_then(|s| s.reference.as_ref())
                .map_or(false, |r| r.is_varies())
    }

    fn key(&self) -> String {
        self.0.borrow().name.clone().unwrap_or_default()
    }

    fn label(&self) -> String {
        self.0.borrow().label()
    }

    /// Committed or traversal parent.
    fn upward(&self) -> Option<Element> {
        match &self.0.borrow().linkage {
            Linkage::Committed(w) => w.upgrade().map(Element),
            Linkage::Traversing(p) => Some(p.clone()),
            Linkage::Detached => None,
        }
    }

    /// Topmost ancestor, following traversal links too.
    pub fn root(&self) -> Element {
        let mut cur = self.clone();
        while let Some(p) = cur.upward() {
            cur = p;
        }
        cur
    }

    fn has_ancestor(&self, other: &Element) -> bool {
        let mut cur = self.upward();
        while let Some(p) = cur {
            if &p == other {
                return true;
            }
            cur = p.upward();
        }
        false
    }

    // ------------------------------------------------------------------ encoding chars

    /// Separators in effect: those decoded from the live MSH-1/MSH-2 of the enclosing
    /// message (or of a standalone MSH segment), else the configured default.
    pub fn encoding_chars(&self) -> EncodingChars {
        let root = self.root();
        let stored = {
            let node = root.0.borrow();
            node.encoding_chars.unwrap_or(node.config.encoding_chars)
        };
        let header = match root.kind() {
            ElementKind::Message => root.children_named("MSH").into_iter().next(),
            ElementKind::Segment if root.name().as_deref() == Some("MSH") => Some(root.clone()),
            _ => None,
        };
        header.map_or(stored, |msh| msh.header_encoding_chars(stored))
    }

    fn header_encoding_chars(&self, stored: EncodingChars) -> EncodingChars {
        let (Some(msh1), Some(msh2)) = (self.field_text("MSH_1"), self.field_text("MSH_2")) else {
            return stored;
        };
        let mut chars = msh1.chars();
        match (chars.next(), chars.next()) {
            (Some(field), None) => EncodingChars::new(field, &msh2)
                .map(|enc| EncodingChars {
                    segment: stored.segment,
                    ..enc
                })
                .unwrap_or(stored),
            _ => stored,
        }
    }

    /// Install new separators on a message, rewriting MSH-1 and MSH-2.
    pub fn set_encoding_chars(&self, enc: EncodingChars) -> Result<()> {
        if self.kind() != ElementKind::Message {
            return Err(Hl7Error::OperationNotAllowed(
                "encoding chars can only be set on a message".to_string(),
            ));
        }
        enc.validate()?;
        if enc.truncation.is_some() && !self.version().supports_truncation() {
            return Err(Hl7Error::InvalidEncodingChars(format!(
                "truncation character needs version 2.7 or later, message is {}",
                self.version()
            )));
        }
        let msh = match self.children_named("MSH").into_iter().next() {
            Some(m) => m,
            None => {
                let m = self.new_child("MSH")?;
                self.add(&m)?;
                m
            }
        };
        msh.replace_raw_field("MSH_1", &enc.msh1())?;
        msh.replace_raw_field("MSH_2", &enc.msh2())?;
        self.0.borrow_mut().encoding_chars = Some(enc);
        Ok(())
    }

    fn replace_raw_field(&self, name: &str, text: &str) -> Result<()> {
        let field = self.new_child(name)?;
        parser::fill_raw_leaf(&field, text)?;
        while self.remove(name, 0).is_some() {}
        self.add(&field)
    }

    /// Unescaped text of the first field `name` (single-valued fields).
    fn field_text(&self, name: &str) -> Option<String> {
        let field = self.children_named(name).into_iter().next()?;
        field.leaf_value().map(|v| v.to_string())
    }

    // ------------------------------------------------------------------ child resolution

    /// Definition of a child called `name` (already normalized).
    fn child_spec(&self, name: &str) -> Result<ChildSpec> {
        let node = self.0.borrow();
        let config = &node.config;
        let strict = config.validation_level.is_strict();
        match node.kind {
            ElementKind::Message | ElementKind::Group => {
                if let Some(slot) = node.layout.as_ref().and_then(|l| l.slot(name)) {
                    let structure = match &slot.reference {
                        Some(r) => r.clone(),
                        None => config.schema.find_structure(name, slot.kind, config.version)?,
                    };
                    return Ok(ChildSpec::named(slot.kind, name, Some(structure)));
                }
                if is_segment_code(name) {
                    if strict && node.layout.is_some() && !is_z_name(name) {
                        return Err(Hl7Error::not_valid(name, node.label()));
                    }
                    let structure = lookup(config, name, ElementKind::Segment)?;
                    return Ok(ChildSpec::named(ElementKind::Segment, name, structure));
                }
                if strict {
                    return Err(Hl7Error::ChildNotFound(name.to_string()));
                }
                match config
                    .schema
                    .find_structure(name, ElementKind::Group, config.version)
                {
                    Ok(s) => {
                        node.notice(format_args!("group {} accepted under {}", name, node.label()));
                        Ok(ChildSpec::named(ElementKind::Group, name, Some(s)))
                    }
                    Err(e) if e.is_invalid_name() => Err(Hl7Error::ChildNotFound(name.to_string())),
                    Err(e) => Err(e),
                }
            }
            ElementKind::Segment => {
                let segment = node.name.clone().unwrap_or_default();
                let position = name
                    .strip_prefix(segment.as_str())
                    .and_then(|r| r.strip_prefix('_'))
                    .and_then(|n| n.parse::<usize>().ok())
                    .filter(|&n| n > 0);
                let Some(position) = position else {
                    return Err(Hl7Error::not_valid(name, segment));
                };
                let Some(layout) = node.layout.as_ref() else {
                    if position > MAX_UNDECLARED_POSITION {
                        return Err(Hl7Error::ChildNotFound(name.to_string()));
                    }
                    return Ok(ChildSpec::named(ElementKind::Field, name, None));
                };
                if let Some(slot) = layout.slot(name) {
                    let structure = match &slot.reference {
                        Some(r) => r.clone(),
                        None => config
                            .schema
                            .find_structure(name, ElementKind::Field, config.version)?,
                    };
                    return Ok(ChildSpec::named(ElementKind::Field, name, Some(structure)));
                }
                let infinite = layout
                    .slots()
                    .last()
                    .and_then(|s| s.reference.as_ref())
                    .map_or(false, |r| r.is_varies());
                if infinite && position > layout.slots().len() {
                    return Ok(ChildSpec {
                        kind: ElementKind::Field,
                        name: Some(name.to_string()),
                        structure: None,
                        datatype: Some(VARIES.to_string()),
                    });
                }
                if strict || position > MAX_UNDECLARED_POSITION {
                    return Err(Hl7Error::ChildNotFound(name.to_string()));
                }
                node.notice(format_args!("unknown field {} accepted", name));
                Ok(ChildSpec::named(ElementKind::Field, name, None))
            }
            ElementKind::Field | ElementKind::Component => {
                let child_kind = match node.kind.datatype_child() {
                    Some(k) => k,
                    None => return Err(Hl7Error::not_valid(name, node.label())),
                };
                if let Some(layout) = &node.layout {
                    let Some(slot) = layout.slot(name) else {
                        return Err(Hl7Error::not_valid(name, node.label()));
                    };
                    let structure = match &slot.reference {
                        Some(r) => r.clone(),
                        None => config.schema.find_structure(name, child_kind, config.version)?,
                    };
                    return Ok(ChildSpec::named(child_kind, name, Some(structure)));
                }
                if node.kind == ElementKind::Field && node.is_varies() && is_varies_name(name) {
                    return Ok(ChildSpec {
                        kind: ElementKind::Component,
                        name: Some(name.to_string()),
                        structure: None,
                        datatype: Some(VARIES.to_string()),
                    });
                }
                Err(Hl7Error::not_valid(name, node.label()))
            }
            ElementKind::SubComponent => Err(Hl7Error::OperationNotAllowed(format!(
                "subcomponent {} cannot have children",
                node.label()
            ))),
        }
    }

    /// Definition of an unnamed (positional) child.
    fn unnamed_spec(&self) -> Result<ChildSpec> {
        let node = self.0.borrow();
        let child_kind = match node.kind {
            ElementKind::Field | ElementKind::Component if node.layout.is_none() => {
                node.kind.datatype_child()
            }
            ElementKind::SubComponent => {
                return Err(Hl7Error::OperationNotAllowed(format!(
                    "subcomponent {} cannot have children",
                    node.label()
                )))
            }
            _ => None,
        };
        let Some(kind) = child_kind else {
            return Err(Hl7Error::not_valid("<unnamed>", node.label()));
        };
        Ok(ChildSpec {
            kind,
            name: None,
            structure: None,
            datatype: if node.is_base() {
                node.datatype.clone()
            } else {
                None
            },
        })
    }

    fn spawn(&self, spec: ChildSpec) -> Element {
        Element::build(spec.kind, spec.name, spec.structure, spec.datatype, self.config())
    }

    /// Detached child called `name` (`""` for an unnamed one), not yet attached.
    pub fn new_child(&self, name: &str) -> Result<Element> {
        let name = normalize(name);
        let spec = if name.is_empty() {
            self.unnamed_spec()?
        } else {
            self.child_spec(&name)?
        };
        Ok(self.spawn(spec))
    }

    /// Same definition, no children: target of a re-parse.
    fn blank_copy(&self) -> Element {
        let node = self.0.borrow();
        let copy = Element::build(
            node.kind,
            node.name.clone(),
            node.structure.clone(),
            node.datatype.clone(),
            node.config.clone(),
        );
        copy.0.borrow_mut().encoding_chars = node.encoding_chars;
        copy
    }

    fn placeholder(&self, key: String, spec: ChildSpec, cache: bool) -> Element {
        if cache {
            let cached = self.0.borrow().pending.get(&key).and_then(Weak::upgrade);
            if let Some(node) = cached {
                let el = Element(node);
                if el.link_state() == LinkState::Traversing {
                    return el;
                }
            }
        }
        let el = self.spawn(spec);
        el.0.borrow_mut().linkage = Linkage::Traversing(self.clone());
        if cache {
            self.0
                .borrow_mut()
                .pending
                .insert(key, Rc::downgrade(&el.0));
        }
        el
    }

    // ------------------------------------------------------------------ navigation

    /// Children called `name`: short name (`PID_5`), long name (`PATIENT_NAME`) or
    /// positional path (`PID_5_1_1`), case-insensitive. A name the schema knows but the
    /// tree does not yet contain yields a view over a traversing placeholder.
    pub fn get(&self, name: &str) -> Result<ElementsView> {
        let name = normalize(name);
        let existing = self.children_named(&name);
        if !existing.is_empty() {
            return Ok(ElementsView::new(self.clone(), Some(name), existing, None));
        }
        if let Some(short) = self.short_name_for(&name) {
            return self.get_direct(&short);
        }
        match self.get_direct(&name) {
            Ok(view) => Ok(view),
            Err(err) => match self.get_composite(&name)? {
                Some(view) => Ok(view),
                None => Err(err),
            },
        }
    }

    /// First child called `name` (placeholder when absent).
    pub fn child(&self, name: &str) -> Result<Element> {
        self.get(name)?.first()
    }

    /// Follow a `.`/`/` separated path of names: `"PID.PID_5.XPN_1"`.
    pub fn resolve(&self, path: &str) -> Result<Element> {
        path.split(['.', '/'])
            .filter(|p| !p.trim().is_empty())
            .try_fold(self.clone(), |el, part| el.child(part))
    }

    fn short_name_for(&self, long_name: &str) -> Option<String> {
        let layout = self.layout()?;
        layout.slot_by_long_name(long_name).map(|s| s.name.clone())
    }

    fn get_direct(&self, name: &str) -> Result<ElementsView> {
        let items = self.children_named(name);
        if !items.is_empty() {
            return Ok(ElementsView::new(self.clone(), Some(name.to_string()), items, None));
        }
        let spec = self.child_spec(name)?;
        let placeholder = self.placeholder(name.to_string(), spec, true);
        Ok(ElementsView::new(
            self.clone(),
            Some(name.to_string()),
            Vec::new(),
            Some(placeholder),
        ))
    }

    fn get_composite(&self, name: &str) -> Result<Option<ElementsView>> {
        if let Some(own) = self.name() {
            let rest = name
                .strip_prefix(own.as_str())
                .and_then(|r| r.strip_prefix('_'));
            if let Some(positions) = rest.and_then(parse_positions) {
                return self.walk_positions(&positions).map(Some);
            }
        }
        let parts: Vec<&str> = name.split('_').collect();
        for cut in (1..parts.len()).rev() {
            let Some(positions) = parse_positions(&parts[cut..].join("_")) else {
                continue;
            };
            let Ok(view) = self.get_direct(&parts[..cut].join("_")) else {
                continue;
            };
            return view.first()?.walk_positions(&positions).map(Some);
        }
        Ok(None)
    }

    fn walk_positions(&self, positions: &[usize]) -> Result<ElementsView> {
        let Some((last, init)) = positions.split_last() else {
            return Err(Hl7Error::ChildNotFound(self.label()));
        };
        let mut cur = self.clone();
        for &p in init {
            cur = cur.at_position(p)?.first()?;
        }
        cur.at_position(*last)
    }

    /// Children at 1-based position `p`.
    fn at_position(&self, p: usize) -> Result<ElementsView> {
        let kind = self.kind();
        let not_found = || Hl7Error::ChildNotFound(format!("{}_{}", self.label(), p));
        match kind {
            ElementKind::Segment => self.get_direct(&format!("{}_{}", self.key(), p)),
            ElementKind::Field | ElementKind::Component => {
                if let Some(layout) = self.layout() {
                    let slot = layout.slots().get(p - 1).ok_or_else(not_found)?;
                    return self.get_direct(&slot.name);
                }
                let has_unnamed = self.with_children(|c| c.count(UNNAMED) > 0);
                if kind == ElementKind::Field && self.is_varies() && !has_unnamed {
                    return self.get_direct(&format!("VARIES_{}", p));
                }
                self.unnamed_at(p - 1)
            }
            _ => Err(not_found()),
        }
    }

    fn unnamed_at(&self, i: usize) -> Result<ElementsView> {
        let unnamed = self.children_named(UNNAMED);
        if let Some(el) = unnamed.get(i) {
            return Ok(ElementsView::new(self.clone(), None, vec![el.clone()], None));
        }
        if i == unnamed.len() && (i == 0 || self.is_varies()) {
            let spec = self.unnamed_spec()?;
            let placeholder = self.placeholder(format!("#{}", i), spec, true);
            return Ok(ElementsView::new(self.clone(), None, Vec::new(), Some(placeholder)));
        }
        Err(Hl7Error::ChildNotFound(format!("{}[{}]", self.label(), i + 1)))
    }

    // ------------------------------------------------------------------ mutation

    /// Check that `child` may become a child of `self` now.
    fn check_child(&self, child: &Element) -> Result<()> {
        let (child_kind, child_name) = {
            let c = child.0.borrow();
            (c.kind, c.name.clone())
        };
        let (kind, label, strict) = {
            let node = self.0.borrow();
            (node.kind, node.label(), node.config.validation_level.is_strict())
        };
        if kind == ElementKind::SubComponent {
            return Err(Hl7Error::OperationNotAllowed(format!(
                "subcomponent {} cannot have children",
                label
            )));
        }
        let child_label = child_name
            .clone()
            .unwrap_or_else(|| child_kind.as_str().to_string());
        if !kind.child_kinds().contains(&child_kind) {
            return Err(Hl7Error::not_valid(child_label, label));
        }
        match child_name {
            Some(name) => {
                let spec = self.child_spec(&name)?;
                if spec.kind != child_kind {
                    return Err(Hl7Error::not_valid(child_label, label));
                }
                if strict {
                    let slot_card = self
                        .layout()
                        .and_then(|l| l.slot(&name).map(|s| s.cardinality));
                    if let Some(card) = slot_card {
                        let count = self.with_children(|c| c.count(&name));
                        if card.is_reached(count) {
                            return Err(Hl7Error::MaxChildLimitReached {
                                child: name,
                                parent: label,
                                limit: card.max.unwrap_or(0),
                            });
                        }
                    }
                }
            }
            None => {
                self.unnamed_spec()?;
                let overflow = self.is_base() && self.with_children(|c| c.count(UNNAMED)) >= 1;
                if overflow && strict {
                    return Err(Hl7Error::MaxChildLimitReached {
                        child: child_label,
                        parent: label,
                        limit: 1,
                    });
                }
            }
        }
        Ok(())
    }

    /// Validated list of (parent, child) links still to commit above `self`.
    fn pending_chain(&self) -> Result<Vec<(Element, Element)>> {
        let mut chain = Vec::new();
        let mut cur = self.clone();
        loop {
            let parent = match &cur.0.borrow().linkage {
                Linkage::Traversing(p) => p.clone(),
                _ => break,
            };
            parent.check_child(&cur)?;
            chain.push((parent.clone(), cur));
            cur = parent;
        }
        Ok(chain)
    }

    /// Index before the first child whose slot comes after the slot of `child`
    /// (messages and groups only).
    fn slot_insertion(&self, child: &Element) -> Option<usize> {
        let node = self.0.borrow();
        if !matches!(node.kind, ElementKind::Message | ElementKind::Group) {
            return None;
        }
        let layout = node.layout.as_ref()?;
        let own = layout.slot_position(&child.key())?;
        node.children
            .iter()
            .position(|c| layout.slot_position(&c.key()).map_or(false, |p| p > own))
    }

    fn attach(&self, child: &Element, by_slot: bool) {
        let insert_at = if by_slot {
            self.slot_insertion(child)
        } else {
            None
        };
        child.0.borrow_mut().linkage = Linkage::Committed(Rc::downgrade(&self.0));
        let unnamed = child.0.borrow().name.is_none();
        let mut node = self.0.borrow_mut();
        let child_ptr = Rc::as_ptr(&child.0);
        node.pending.retain(|_, w| w.as_ptr() != child_ptr);
        if unnamed && node.is_base() && node.children.count(UNNAMED) >= 1 {
            node.notice(format_args!(
                "{} holds several values, datatype {:?} dropped",
                node.label(),
                node.datatype
            ));
            node.datatype = None;
            node.layout = None;
        }
        match insert_at {
            Some(pos) => node.children.insert_at(pos, child.clone()),
            None => node.children.push(child.clone()),
        }
    }

    /// Attach this element (and any traversing ancestors) to the tree.
    pub fn commit(&self) -> Result<()> {
        let chain = self.pending_chain()?;
        attach_chain(chain);
        Ok(())
    }

    /// Add `child`: a segment or group goes before the first sibling declared after
    /// it, anything else is appended. Fails with [`Hl7Error::ChildNotValid`] on a kind
    /// or name mismatch and, under strict validation, with
    /// [`Hl7Error::MaxChildLimitReached`].
    pub fn add(&self, child: &Element) -> Result<()> {
        self.add_child(child, true)
    }

    /// Append `child` after every existing child, keeping the order it was read in.
    pub(crate) fn append(&self, child: &Element) -> Result<()> {
        self.add_child(child, false)
    }

    fn add_child(&self, child: &Element, by_slot: bool) -> Result<()> {
        if child == self || self.has_ancestor(child) {
            return Err(Hl7Error::OperationNotAllowed(format!(
                "{} cannot be added below itself",
                child.label()
            )));
        }
        match child.link_state() {
            LinkState::Committed => {
                return Err(Hl7Error::OperationNotAllowed(format!(
                    "{} already has a parent",
                    child.label()
                )))
            }
            LinkState::Traversing if child.upward().as_ref() != Some(self) => {
                return Err(Hl7Error::OperationNotAllowed(format!(
                    "{} belongs to another traversal",
                    child.label()
                )))
            }
            _ => {}
        }
        self.check_child(child)?;
        let chain = self.pending_chain()?;
        attach_chain(chain);
        self.attach(child, by_slot);
        Ok(())
    }

    /// Replace the first child called `name` (or append one).
    pub fn set(&self, name: &str, value: impl Into<Assign>) -> Result<()> {
        self.set_at(name, value, 0)
    }

    /// Replace the `index`-th child called `name`, or append when `index` equals the
    /// current count.
    pub fn set_at(&self, name: &str, value: impl Into<Assign>, index: usize) -> Result<()> {
        let view = self.get(name)?;
        let parent = view.parent.clone();
        match value.into() {
            Assign::Element(el) => parent.put_element(&view, el, index),
            Assign::Text(text) => {
                let repeated = parent.kind() == ElementKind::Segment
                    && text.contains(parent.encoding_chars().repetition);
                match view.name.as_deref() {
                    Some(field) if repeated => parent.set_repetitions(field, &text),
                    _ => parent.target(&view, index)?.set_value(&text),
                }
            }
            Assign::Value(v) => parent.target(&view, index)?.set_leaf_value(v),
        }
    }

    fn target(&self, view: &ElementsView, index: usize) -> Result<Element> {
        if let Some(el) = view.items.get(index) {
            return Ok(el.clone());
        }
        if index == view.items.len() {
            if index == 0 {
                return view.first();
            }
            let spec = match &view.name {
                Some(n) => self.child_spec(n)?,
                None => self.unnamed_spec()?,
            };
            return Ok(self.placeholder(String::new(), spec, false));
        }
        Err(Hl7Error::ChildNotFound(format!(
            "{}[{}]",
            view.name.as_deref().unwrap_or("<unnamed>"),
            index
        )))
    }

    fn put_element(&self, view: &ElementsView, el: Element, index: usize) -> Result<()> {
        let expected_kind = view.first()?.kind();
        if el.kind() != expected_kind || el.name() != view.name {
            return Err(Hl7Error::not_valid(
                el.name().unwrap_or_else(|| el.kind().as_str().to_string()),
                self.label(),
            ));
        }
        let Some(old) = view.items.get(index) else {
            return self.add(&el);
        };
        if el.link_state() != LinkState::Detached {
            return Err(Hl7Error::OperationNotAllowed(format!(
                "{} already belongs to a tree",
                el.label()
            )));
        }
        let chain = self.pending_chain()?;
        let pos = self.with_children(|c| c.position(old));
        let Some(pos) = pos else {
            return self.add(&el);
        };
        el.0.borrow_mut().linkage = Linkage::Committed(Rc::downgrade(&self.0));
        let removed = self.0.borrow_mut().children.replace_at(pos, el);
        removed.0.borrow_mut().linkage = Linkage::Detached;
        attach_chain(chain);
        Ok(())
    }

    /// Replace every repetition of field `name` by the `~`-separated `text`.
    fn set_repetitions(&self, name: &str, text: &str) -> Result<()> {
        let enc = self.encoding_chars();
        let mut fields = Vec::new();
        for rep in text.split(enc.repetition) {
            let field = self.new_child(name)?;
            parser::fill_field(&field, rep, &enc)?;
            fields.push(field);
        }
        if self.validation_level().is_strict() {
            let card = self
                .layout()
                .and_then(|l| l.slot(name).map(|s| s.cardinality));
            if let Some(card) = card {
                if card.is_exceeded(fields.len()) {
                    return Err(Hl7Error::MaxChildLimitReached {
                        child: name.to_string(),
                        parent: self.label(),
                        limit: card.max.unwrap_or(0),
                    });
                }
            }
        }
        let chain = self.pending_chain()?;
        while self.remove(name, 0).is_some() {}
        for field in &fields {
            self.attach(field, true);
        }
        attach_chain(chain);
        Ok(())
    }

    /// Detach the `index`-th child called `name`.
    pub fn remove(&self, name: &str, index: usize) -> Option<Element> {
        let name = normalize(name);
        let name = self.short_name_for(&name).unwrap_or(name);
        let removed = {
            let mut node = self.0.borrow_mut();
            let pos = *node.children.index.get(&name)?.get(index)?;
            node.children.remove_at(pos)
        };
        removed.0.borrow_mut().linkage = Linkage::Detached;
        Some(removed)
    }

    /// Change the datatype of an empty field/component/subcomponent.
    pub fn set_datatype(&self, datatype: Option<&str>) -> Result<()> {
        let mut node = self.0.borrow_mut();
        if !node.kind.has_datatype() {
            return Err(Hl7Error::OperationNotAllowed(format!(
                "{} has no datatype",
                node.label()
            )));
        }
        if !node.children.is_empty() || node.value.is_some() {
            return Err(Hl7Error::OperationNotAllowed(format!(
                "datatype of {} cannot change once a value is set",
                node.label()
            )));
        }
        let datatype = datatype.map(str::to_string);
        if let Some(dt) = &datatype {
            let config = &node.config;
            let known = dt == VARIES
                || config.schema.is_base_datatype(dt, config.version)
                || config
                    .schema
                    .datatype_structure(dt, node.kind, config.version)
                    .is_some();
            if !known && config.validation_level.is_strict() {
                return Err(Hl7Error::invalid_name(node.kind, dt.clone()));
            }
        }
        let layout = layout_for(
            node.kind,
            node.structure.as_ref(),
            datatype.as_deref(),
            &node.config,
        );
        node.datatype = datatype;
        node.layout = layout;
        Ok(())
    }

    /// Clear the datatype after a value it cannot hold was accepted.
    pub(crate) fn downgrade(&self) {
        let mut node = self.0.borrow_mut();
        if node.datatype.is_some() {
            node.notice(format_args!(
                "{}: value does not match datatype {:?}, treated as text",
                node.label(),
                node.datatype
            ));
        }
        node.datatype = None;
        node.layout = None;
    }

    // ------------------------------------------------------------------ values

    /// ER7 text of this element.
    pub fn value(&self) -> String {
        self.to_er7()
    }

    /// Decoded scalar: the subcomponent's own value, or the single leaf below a
    /// base-typed field/component.
    pub fn leaf_value(&self) -> Option<Value> {
        let node = self.0.borrow();
        match node.kind {
            ElementKind::SubComponent => node.value.clone(),
            ElementKind::Field | ElementKind::Component if node.layout.is_none() => {
                let only = node.children.named(UNNAMED);
                match only.as_slice() {
                    [single] => single.leaf_value(),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Replace the content of this element by parsing `text` (ER7, escaped) with the
    /// parser of its kind. Commits traversing ancestors.
    pub fn set_value(&self, text: &str) -> Result<()> {
        match self.kind() {
            ElementKind::Message => self.set_message_value(text),
            ElementKind::SubComponent => {
                let enc = self.encoding_chars();
                let chain = self.pending_chain()?;
                let downgraded = parser::fill_subcomponent(self, text, &enc)?;
                attach_chain(chain);
                if downgraded {
                    self.propagate_downgrade();
                }
                Ok(())
            }
            _ => {
                let enc = self.encoding_chars();
                let chain = self.pending_chain()?;
                let scratch = self.blank_copy();
                let downgraded = parser::fill(&scratch, text, &enc)?;
                self.adopt(&scratch);
                attach_chain(chain);
                if downgraded {
                    self.propagate_downgrade();
                }
                Ok(())
            }
        }
    }

    /// Store a scalar in this leaf (or the single leaf of a base-typed element).
    pub fn set_leaf_value(&self, value: Value) -> Result<()> {
        match self.kind() {
            ElementKind::SubComponent => {
                let chain = self.pending_chain()?;
                let downgraded = self.store_value(value)?;
                attach_chain(chain);
                if downgraded {
                    self.propagate_downgrade();
                }
                Ok(())
            }
            ElementKind::Field | ElementKind::Component if self.layout().is_none() => {
                self.unnamed_at(0)?.first()?.set_leaf_value(value)
            }
            _ => Err(Hl7Error::OperationNotAllowed(format!(
                "{} does not hold a scalar value",
                self.label()
            ))),
        }
    }

    pub(crate) fn put_value(&self, value: Value) {
        self.0.borrow_mut().value = Some(value);
    }

    /// Returns true when the value did not fit the datatype and was kept as text.
    pub(crate) fn store_value(&self, value: Value) -> Result<bool> {
        let (datatype, level) = {
            let node = self.0.borrow();
            (node.datatype.clone(), node.config.validation_level)
        };
        let checked = match (&datatype, &value) {
            (Some(dt), Value::Text(raw)) => datatype::parse_value(dt, raw),
            (Some(dt), v) if datatype::is_text_type(dt) => Ok(Value::Text(v.to_string())),
            (_, v) => Ok(v.clone()),
        };
        match checked {
            Ok(v) => {
                self.0.borrow_mut().value = Some(v);
                Ok(false)
            }
            Err(e) if level.is_strict() => Err(e),
            Err(_) => {
                self.downgrade();
                self.0.borrow_mut().value = Some(Value::Text(value.to_string()));
                Ok(true)
            }
        }
    }

    /// A rejected value clears the datatype of the base-typed owners above it.
    fn propagate_downgrade(&self) {
        let mut cur = self.clone();
        while cur.name().is_none() {
            let Some(parent) = cur.parent() else { break };
            if !parent.is_base() {
                break;
            }
            parent.downgrade();
            cur = parent;
        }
    }

    /// Take over the children (and any datatype downgrade) of a re-parsed copy.
    fn adopt(&self, scratch: &Element) {
        let (children, datatype, layout, value) = {
            let mut s = scratch.0.borrow_mut();
            (s.children.take(), s.datatype.clone(), s.layout.clone(), s.value.take())
        };
        let old = {
            let mut node = self.0.borrow_mut();
            node.datatype = datatype;
            node.layout = layout;
            node.value = value;
            node.children.take()
        };
        for el in old {
            el.0.borrow_mut().linkage = Linkage::Detached;
        }
        for el in children {
            el.0.borrow_mut().linkage = Linkage::Committed(Rc::downgrade(&self.0));
            self.0.borrow_mut().children.push(el);
        }
    }

    fn set_message_value(&self, text: &str) -> Result<()> {
        let info = parser::get_message_info(text, &self.config())?;
        let known = self.name().is_some();
        if known {
            let same = self.name().as_deref() == Some(info.structure.as_str())
                && self.version() == info.version
                && self.encoding_chars() == info.encoding_chars;
            if !same {
                return Err(Hl7Error::OperationNotAllowed(format!(
                    "message {} {} cannot take the value of {} {}",
                    self.label(),
                    self.version(),
                    info.structure,
                    info.version
                )));
            }
        }
        let config = self
            .config()
            .version(info.version)
            .encoding_chars(info.encoding_chars);
        let scratch = if known {
            Element::message_node(self.name(), self.structure(), config)
        } else {
            let structure = lookup(&config, &info.structure, ElementKind::Message)?;
            let name = structure.as_ref().map(|_| info.structure.clone());
            Element::message_node(name, structure, config)
        };
        parser::parse_segments_into(&scratch, text, true)?;
        let (name, long_name, config, structure, layout, encoding_chars) = {
            let s = scratch.0.borrow();
            (
                s.name.clone(),
                s.long_name.clone(),
                s.config.clone(),
                s.structure.clone(),
                s.layout.clone(),
                s.encoding_chars,
            )
        };
        {
            let mut node = self.0.borrow_mut();
            node.name = name;
            node.long_name = long_name;
            node.config = config;
            node.structure = structure;
            node.layout = layout;
            node.encoding_chars = encoding_chars;
        }
        self.adopt(&scratch);
        debug!(structure = %info.structure, "message value replaced");
        Ok(())
    }

    // ------------------------------------------------------------------ output

    pub fn to_er7(&self) -> String {
        serializer::to_er7(self)
    }

    pub fn to_er7_with(&self, options: &Er7Options) -> String {
        serializer::to_er7_with(self, options)
    }

    pub fn to_mllp(&self) -> String {
        serializer::to_mllp(self)
    }

    /// Full validation report (errors and warnings).
    pub fn validation_report(&self) -> ValidationReport {
        Validator::new().validate(self)
    }

    /// Fails with the first validation error; warnings never fail.
    pub fn validate(&self) -> Result<()> {
        self.validation_report().into_result()
    }

    /// Write every error and warning to `out`, then fail with the first error.
    pub fn validate_to<W: Write>(&self, out: &mut W) -> Result<()> {
        let report = self.validation_report();
        report.write_to(out)?;
        report.into_result()
    }

    pub fn validate_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        self.validate_to(&mut file)
    }
}

/// Zero or more same-named children of one parent. Element-level calls go to the
/// first child; an empty view hands out a traversing placeholder instead.
#[derive(Debug, Clone)]
pub struct ElementsView {
    parent: Element,
    name: Option<String>,
    items: Vec<Element>,
    placeholder: Option<Element>,
}

impl ElementsView {
    fn new(
        parent: Element,
        name: Option<String>,
        items: Vec<Element>,
        placeholder: Option<Element>,
    ) -> Self {
        ElementsView {
            parent,
            name,
            items,
            placeholder,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn parent(&self) -> &Element {
        &self.parent
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Element> {
        self.items.iter()
    }

    pub fn at(&self, index: usize) -> Option<&Element> {
        self.items.get(index)
    }

    /// First existing child, else the placeholder.
    pub fn first(&self) -> Result<Element> {
        self.items
            .first()
            .or(self.placeholder.as_ref())
            .cloned()
            .ok_or_else(|| {
                Hl7Error::ChildNotFound(self.name.clone().unwrap_or_else(|| "<unnamed>".into()))
            })
    }

    pub fn get(&self, name: &str) -> Result<ElementsView> {
        self.first()?.get(name)
    }

    pub fn child(&self, name: &str) -> Result<Element> {
        self.first()?.child(name)
    }

    pub fn set(&self, name: &str, value: impl Into<Assign>) -> Result<()> {
        self.first()?.set(name, value)
    }

    pub fn set_value(&self, text: &str) -> Result<()> {
        self.first()?.set_value(text)
    }

    pub fn to_er7(&self) -> String {
        self.first().map(|e| e.to_er7()).unwrap_or_default()
    }
}

impl<'a> IntoIterator for &'a ElementsView {
    type Item = &'a Element;
    type IntoIter = std::slice::Iter<'a, Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
