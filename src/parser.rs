//! ER7 text → element tree.
//!
//! Segments are read one per line (`\r`, `\n` or `\r\n`). With group discovery on,
//! each segment is placed by searching the open group frames from the innermost one
//! outwards: a frame takes the segment when one of its own slots still has room, or
//! when a fresh instance of one of its (nested) group slots starts with a slot for it.
//! Segments no frame accepts are kept at message level.

use crate::config::Config;
use crate::datatype::{self, Value};
use crate::element::{lookup, Element};
use crate::encoding::EncodingChars;
use crate::error::{Hl7Error, Result};
use crate::profile::MessageProfile;
use crate::schema::{is_segment_code, ElementKind, SchemaVersion, StructureDef, VARIES};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, trace};

/// Knobs of [`parse_message_with`].
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Rebuild the group hierarchy; when false every segment is a direct message child.
    pub find_groups: bool,
    /// Structure overrides used instead of the reference schema.
    pub profile: Option<Arc<MessageProfile>>,
    /// Validate the parsed message and fail on the first error.
    pub force_validation: bool,
    /// Where to write the validation report when `force_validation` is set.
    pub report_file: Option<PathBuf>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            find_groups: true,
            profile: None,
            force_validation: false,
            report_file: None,
        }
    }
}

/// Identity of a message as announced by its MSH segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageInfo {
    pub encoding_chars: EncodingChars,
    /// Message structure (MSH-9.3, else `type_trigger`).
    pub structure: String,
    pub version: SchemaVersion,
}

/// Read separators, structure and version from the MSH segment of `text`. An empty
/// MSH-12 falls back to `config.version`.
pub fn get_message_info(text: &str, config: &Config) -> Result<MessageInfo> {
    let text = text.trim_start();
    if !text.starts_with("MSH") {
        return Err(Hl7Error::Parser("message must start with an MSH segment".to_string()));
    }
    let field = text[3..]
        .chars()
        .next()
        .ok_or_else(|| Hl7Error::Parser("MSH segment has no field separator".to_string()))?;
    if field == '\r' || field == '\n' {
        return Err(Hl7Error::InvalidEncodingChars(
            "field separator cannot be a segment terminator".to_string(),
        ));
    }
    let header = text.split(['\r', '\n']).next().unwrap_or_default();
    let fields: Vec<&str> = header
        .get(3 + field.len_utf8()..)
        .unwrap_or_default()
        .split(field)
        .collect();
    let msh2 = fields.first().copied().unwrap_or_default();
    let component = msh2.chars().next().unwrap_or('^');

    // fields[k] holds MSH-(k+2).
    let version = match fields
        .get(10)
        .and_then(|f| f.split(component).next())
        .filter(|v| !v.is_empty())
    {
        Some(v) => v.parse::<SchemaVersion>()?,
        None => config.version,
    };
    if !config.schema.supports_version(version) {
        return Err(Hl7Error::UnsupportedVersion(version.to_string()));
    }
    let encoding_chars = EncodingChars::from_msh(&field.to_string(), msh2, version)?;

    let msh9: Vec<&str> = fields
        .get(7)
        .copied()
        .unwrap_or_default()
        .split(component)
        .collect();
    let part = |i: usize| msh9.get(i).copied().filter(|p| !p.is_empty());
    let structure = match (part(2), part(0), part(1)) {
        (Some(s), _, _) => s.to_string(),
        (None, Some(t), Some(trigger)) => format!("{}_{}", t, trigger),
        (None, Some(t), None) => t.to_string(),
        (None, None, _) => {
            return Err(Hl7Error::Parser("MSH-9 (message type) is empty".to_string()));
        }
    };
    Ok(MessageInfo {
        encoding_chars,
        structure: structure.to_ascii_uppercase(),
        version,
    })
}

/// Parse an ER7 message with default options.
pub fn parse_message(text: &str, config: &Config) -> Result<Element> {
    parse_message_with(text, config, &ParseOptions::default())
}

pub fn parse_message_with(text: &str, config: &Config, options: &ParseOptions) -> Result<Element> {
    let info = get_message_info(text, config)?;
    let mut config = config
        .clone()
        .version(info.version)
        .encoding_chars(info.encoding_chars);
    let (name, structure) = match &options.profile {
        Some(profile) => {
            config = config.version(profile.version());
            let s = profile.structure(&info.structure)?;
            (Some(info.structure.clone()), Some(s))
        }
        None => {
            let s = lookup(&config, &info.structure, ElementKind::Message)?;
            (s.as_ref().map(|_| info.structure.clone()), s)
        }
    };
    let message = Element::message_node(name, structure, config);
    parse_segments_into(&message, text, options.find_groups)?;
    debug!(
        structure = %info.structure,
        version = %info.version,
        children = message.child_count(),
        "message parsed"
    );
    if options.force_validation {
        let report = message.validation_report();
        if let Some(path) = &options.report_file {
            let mut file = std::fs::File::create(path)?;
            report.write_to(&mut file)?;
        }
        report.into_result()?;
    }
    Ok(message)
}

/// Parse a single segment, detached, resolved against `config`.
pub fn parse_segment(text: &str, config: &Config) -> Result<Element> {
    let enc = config.encoding_chars;
    let name = segment_name(text, &enc)?;
    let segment = Element::new(ElementKind::Segment, &name, config)?;
    fill_segment(&segment, text, &enc)?;
    Ok(segment)
}

/// Parse `\r`-separated segments into a list of detached segments.
pub fn parse_segments(text: &str, config: &Config) -> Result<Vec<Element>> {
    split_segments(text)
        .map(|line| parse_segment(line, config))
        .collect()
}

/// Parse several `\r`-separated segments into a detached group `name`.
pub fn parse_group(name: &str, text: &str, config: &Config) -> Result<Element> {
    let group = Element::new(ElementKind::Group, name, config)?;
    assemble(&group, text, &config.encoding_chars, true)?;
    Ok(group)
}

/// Parse a field value into a detached field `name`.
pub fn parse_field(name: &str, text: &str, config: &Config) -> Result<Element> {
    let field = Element::new(ElementKind::Field, name, config)?;
    fill_field(&field, text, &config.encoding_chars)?;
    Ok(field)
}

pub fn parse_component(name: &str, text: &str, config: &Config) -> Result<Element> {
    let component = Element::new(ElementKind::Component, name, config)?;
    fill_component(&component, text, &config.encoding_chars)?;
    Ok(component)
}

pub fn parse_subcomponent(name: &str, text: &str, config: &Config) -> Result<Element> {
    let sub = Element::new(ElementKind::SubComponent, name, config)?;
    fill_subcomponent(&sub, text, &config.encoding_chars)?;
    Ok(sub)
}

pub(crate) fn parse_segments_into(root: &Element, text: &str, find_groups: bool) -> Result<()> {
    let enc = root.encoding_chars();
    assemble(root, text, &enc, find_groups)
}

/// Fill an empty element of any kind below message level from its ER7 text.
/// Returns true when a value was downgraded to text.
pub(crate) fn fill(el: &Element, text: &str, enc: &EncodingChars) -> Result<bool> {
    match el.kind() {
        ElementKind::Group => assemble(el, text, enc, true).map(|_| false),
        ElementKind::Segment => fill_segment(el, text, enc).map(|_| false),
        ElementKind::Field => fill_field(el, text, enc),
        ElementKind::Component => fill_component(el, text, enc),
        ElementKind::SubComponent => fill_subcomponent(el, text, enc),
        ElementKind::Message => Err(Hl7Error::OperationNotAllowed(
            "messages are parsed with parse_message".to_string(),
        )),
    }
}

fn split_segments(text: &str) -> impl Iterator<Item = &str> {
    text.split(['\r', '\n']).filter(|s| !s.trim().is_empty())
}

fn segment_name(text: &str, enc: &EncodingChars) -> Result<String> {
    let invalid = || Hl7Error::Parser(format!("invalid segment {:?}", truncate(text)));
    let name = text.get(..3).ok_or_else(invalid)?;
    let rest = &text[3..];
    if !is_segment_code(name) || !(rest.is_empty() || rest.starts_with(enc.field)) {
        return Err(invalid());
    }
    Ok(name.to_string())
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(20) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

/// Open group instance during assembly.
struct Frame {
    node: Element,
    layout: Option<Arc<StructureDef>>,
}

fn assemble(root: &Element, text: &str, enc: &EncodingChars, find_groups: bool) -> Result<()> {
    let mut stack = vec![Frame {
        node: root.clone(),
        layout: root.layout(),
    }];
    for line in split_segments(text) {
        let name = segment_name(line, enc)?;
        let parent = if find_groups {
            place(&mut stack, &name)?
        } else {
            None
        };
        let parent = match parent {
            Some(p) => p,
            None => {
                if find_groups {
                    trace!(segment = %name, "no open group accepts segment, kept at top level");
                }
                root.clone()
            }
        };
        let segment = parent.new_child(&name)?;
        fill_segment(&segment, line, enc)?;
        parent.append(&segment)?;
    }
    Ok(())
}

/// Parent for the next segment `name`, opening group instances as needed.
fn place(stack: &mut Vec<Frame>, name: &str) -> Result<Option<Element>> {
    let mut found = None;
    for i in (0..stack.len()).rev() {
        if let Some(path) = find_path(&stack[i], name, true) {
            found = Some((i, path));
            break;
        }
    }
    if found.is_none() {
        found = find_path(&stack[0], name, false).map(|path| (0, path));
    }
    let Some((depth, path)) = found else {
        return Ok(None);
    };
    stack.truncate(depth + 1);
    let mut parent = stack[depth].node.clone();
    for group in path {
        let instance = parent.new_child(&group)?;
        parent.append(&instance)?;
        trace!(group = %group, "group opened");
        stack.push(Frame {
            node: instance.clone(),
            layout: instance.layout(),
        });
        parent = instance;
    }
    Ok(Some(parent))
}

/// Group names to open below `frame` so that `segment` lands in a slot; empty when
/// one of the frame's own slots takes it.
fn find_path(frame: &Frame, segment: &str, respect_max: bool) -> Option<Vec<String>> {
    let layout = frame.layout.as_ref()?;
    let has_room = |slot: &str, card: crate::schema::Cardinality| {
        !respect_max || !card.is_reached(frame.node.with_children(|c| c.count(slot)))
    };
    for slot in layout.slots() {
        if slot.kind == ElementKind::Segment && slot.name == segment && has_room(&slot.name, slot.cardinality) {
            return Some(Vec::new());
        }
    }
    for slot in layout.slots() {
        if slot.kind != ElementKind::Group || !has_room(&slot.name, slot.cardinality) {
            continue;
        }
        if let Some(mut path) = slot.reference.as_deref().and_then(|g| group_path(g, segment)) {
            path.insert(0, slot.name.clone());
            return Some(path);
        }
    }
    None
}

/// Path inside a fresh instance of `group` to a slot for `segment`.
fn group_path(group: &StructureDef, segment: &str) -> Option<Vec<String>> {
    if group
        .slots()
        .iter()
        .any(|s| s.kind == ElementKind::Segment && s.name == segment)
    {
        return Some(Vec::new());
    }
    group
        .slots()
        .iter()
        .filter(|s| s.kind == ElementKind::Group)
        .find_map(|s| {
            let mut path = group_path(s.reference.as_deref()?, segment)?;
            path.insert(0, s.name.clone());
            Some(path)
        })
}

/// Fill a segment from its ER7 line (which must start with the segment name).
pub(crate) fn fill_segment(segment: &Element, text: &str, enc: &EncodingChars) -> Result<()> {
    let name = segment.name().unwrap_or_default();
    let body = text.strip_prefix(name.as_str()).ok_or_else(|| {
        Hl7Error::Parser(format!("{:?} is not a {} segment", truncate(text), name))
    })?;
    if body.is_empty() {
        return Ok(());
    }
    let body = body.strip_prefix(enc.field).ok_or_else(|| {
        Hl7Error::Parser(format!("{} is not followed by the field separator", name))
    })?;
    if name == "MSH" {
        let mut fields = body.split(enc.field);
        let msh2 = fields.next().unwrap_or_default();
        fill_raw_field(segment, "MSH_1", &enc.msh1())?;
        fill_raw_field(segment, "MSH_2", msh2)?;
        for (i, f) in fields.enumerate() {
            fill_repetitions(segment, &format!("MSH_{}", i + 3), f, enc)?;
        }
    } else {
        for (i, f) in body.split(enc.field).enumerate() {
            fill_repetitions(segment, &format!("{}_{}", name, i + 1), f, enc)?;
        }
    }
    Ok(())
}

fn fill_repetitions(segment: &Element, name: &str, text: &str, enc: &EncodingChars) -> Result<()> {
    if text.is_empty() {
        return Ok(());
    }
    for rep in text.split(enc.repetition) {
        let field = segment.new_child(name)?;
        fill_field(&field, rep, enc)?;
        segment.add(&field)?;
    }
    Ok(())
}

/// Store MSH-1/MSH-2 verbatim: these fields are never split nor unescaped.
pub(crate) fn fill_raw_field(segment: &Element, name: &str, text: &str) -> Result<()> {
    let field = segment.new_child(name)?;
    fill_raw_leaf(&field, text)?;
    segment.add(&field)
}

pub(crate) fn fill_raw_leaf(field: &Element, text: &str) -> Result<()> {
    let component = field.new_child("")?;
    let sub = component.new_child("")?;
    sub.put_value(Value::text(text));
    component.add(&sub)?;
    field.add(&component)
}

fn too_many(el: &Element, found: usize, allowed: usize) -> Hl7Error {
    Hl7Error::MaxChildLimitReached {
        child: format!("{} values", found),
        parent: el.name().unwrap_or_else(|| el.kind().to_string()),
        limit: allowed as u32,
    }
}

/// Returns true when the field lost its datatype.
pub(crate) fn fill_field(field: &Element, text: &str, enc: &EncodingChars) -> Result<bool> {
    let strict = field.validation_level().is_strict();
    let parts: Vec<&str> = text.split(enc.component).collect();
    if let Some(layout) = field.layout() {
        let slots = layout.slots();
        if parts.len() > slots.len() {
            if strict {
                return Err(too_many(field, parts.len(), slots.len()));
            }
            field.downgrade();
            fill_varies_field(field, &parts, enc)?;
            return Ok(true);
        }
        for (part, slot) in parts.iter().zip(slots) {
            if part.is_empty() {
                continue;
            }
            let component = field.new_child(&slot.name)?;
            fill_component(&component, part, enc)?;
            field.add(&component)?;
        }
        return Ok(false);
    }
    if field.is_base() {
        if parts.len() > 1 {
            if strict {
                return Err(too_many(field, parts.len(), 1));
            }
            field.downgrade();
            fill_varies_field(field, &parts, enc)?;
            return Ok(true);
        }
        let component = field.new_child("")?;
        let downgraded = fill_component(&component, text, enc)?;
        field.add(&component)?;
        if downgraded {
            field.downgrade();
        }
        return Ok(downgraded);
    }
    fill_varies_field(field, &parts, enc)?;
    Ok(false)
}

fn fill_varies_field(field: &Element, parts: &[&str], enc: &EncodingChars) -> Result<()> {
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        let component = field.new_child(&format!("VARIES_{}", i + 1))?;
        fill_component(&component, part, enc)?;
        field.add(&component)?;
    }
    Ok(())
}

/// Returns true when the component lost its datatype.
pub(crate) fn fill_component(component: &Element, text: &str, enc: &EncodingChars) -> Result<bool> {
    let strict = component.validation_level().is_strict();
    let parts: Vec<&str> = text.split(enc.subcomponent).collect();
    if let Some(layout) = component.layout() {
        let slots = layout.slots();
        if parts.len() > slots.len() {
            if strict {
                return Err(too_many(component, parts.len(), slots.len()));
            }
            component.downgrade();
            fill_varies_component(component, &parts, enc)?;
            return Ok(true);
        }
        for (part, slot) in parts.iter().zip(slots) {
            if part.is_empty() {
                continue;
            }
            let sub = component.new_child(&slot.name)?;
            fill_subcomponent(&sub, part, enc)?;
            component.add(&sub)?;
        }
        return Ok(false);
    }
    if component.is_base() {
        if parts.len() > 1 {
            if strict {
                return Err(too_many(component, parts.len(), 1));
            }
            component.downgrade();
            fill_varies_component(component, &parts, enc)?;
            return Ok(true);
        }
        let sub = component.new_child("")?;
        let downgraded = fill_subcomponent(&sub, text, enc)?;
        component.add(&sub)?;
        if downgraded {
            component.downgrade();
        }
        return Ok(downgraded);
    }
    fill_varies_component(component, &parts, enc)?;
    Ok(false)
}

/// Positional, unnamed subcomponents; empty ones are kept so positions survive.
fn fill_varies_component(component: &Element, parts: &[&str], enc: &EncodingChars) -> Result<()> {
    for part in parts {
        let sub = component.new_child("")?;
        fill_subcomponent(&sub, part, enc)?;
        component.add(&sub)?;
    }
    Ok(())
}

/// Decode a leaf. Under strict validation a value the datatype rejects is an error;
/// otherwise it is kept as text and the datatype dropped (returns true).
pub(crate) fn fill_subcomponent(sub: &Element, text: &str, enc: &EncodingChars) -> Result<bool> {
    let decoded = match sub.datatype().as_deref() {
        Some(dt) if dt != VARIES => datatype::decode(dt, text, enc),
        _ => Ok(Value::Text(datatype::unescape(text, enc))),
    };
    match decoded {
        Ok(value) => {
            sub.put_value(value);
            Ok(false)
        }
        Err(e) if sub.validation_level().is_strict() => Err(e),
        Err(_) => {
            sub.downgrade();
            sub.put_value(Value::Text(datatype::unescape(text, enc)));
            Ok(true)
        }
    }
}
