//! Element tree → ER7 text.
//!
//! Fields, components and subcomponents are written at their declared position.
//! Segments and groups keep the order of the tree, which is the order they were read
//! in plus schema order for those added later; under strict validation they are
//! sorted by slot, unknown children staying right after the known sibling they
//! followed. Missing positions become empty and trailing empty positions are dropped
//! unless [`Er7Options::trailing_children`] asks for every declared position.

use crate::datatype;
use crate::element::Element;
use crate::encoding::EncodingChars;
use crate::mllp;
use crate::schema::{name_position, ElementKind};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default)]
pub struct Er7Options {
    /// Separators to write with instead of the element's own.
    pub encoding_chars: Option<EncodingChars>,
    /// Pad every segment/field/component to its declared number of children.
    pub trailing_children: bool,
}

pub fn to_er7(el: &Element) -> String {
    to_er7_with(el, &Er7Options::default())
}

pub fn to_er7_with(el: &Element, options: &Er7Options) -> String {
    let writer = Writer {
        enc: options
            .encoding_chars
            .unwrap_or_else(|| el.encoding_chars()),
        trailing: options.trailing_children,
    };
    writer.element(el)
}

/// ER7 text of `el` inside an MLLP frame.
pub fn to_mllp(el: &Element) -> String {
    mllp::wrap(&to_er7(el))
}

struct Writer {
    enc: EncodingChars,
    trailing: bool,
}

impl Writer {
    fn element(&self, el: &Element) -> String {
        match el.kind() {
            ElementKind::Message | ElementKind::Group => self.group(el),
            ElementKind::Segment => self.segment(el),
            ElementKind::Field | ElementKind::Component => self.composite(el),
            ElementKind::SubComponent => self.leaf(el),
        }
    }

    fn group(&self, el: &Element) -> String {
        let children = if el.validation_level().is_strict() {
            slot_order(el)
        } else {
            el.children()
        };
        let sep = self.enc.separator(el.kind()).unwrap_or(self.enc.segment);
        children
            .iter()
            .map(|c| self.element(c))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(&sep.to_string())
    }

    fn segment(&self, el: &Element) -> String {
        let name = el.name().unwrap_or_default();
        let mut positions: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for field in el.children() {
            if let Some(p) = field.name().as_deref().and_then(name_position) {
                positions.entry(p).or_default().push(self.composite(&field));
            }
        }
        let declared = el.layout().map_or(0, |l| l.slots().len());
        let rep = self.enc.repetition.to_string();
        let mut fields = self.fill_gaps(
            positions.into_iter().map(|(p, reps)| (p, reps.join(&rep))),
            declared,
        );
        let sep = self.enc.field.to_string();
        if name == "MSH" {
            // Positions 1 and 2 are the delimiters themselves.
            let rest: Vec<String> = fields.drain(..).skip(2).collect();
            let mut out = format!("MSH{}{}", self.enc.msh1(), self.enc.msh2());
            if !rest.is_empty() {
                out.push(self.enc.field);
                out.push_str(&rest.join(&sep));
            }
            return out;
        }
        std::iter::once(name).chain(fields).collect::<Vec<_>>().join(&sep)
    }

    fn composite(&self, el: &Element) -> String {
        if el.kind() == ElementKind::Field
            && matches!(el.name().as_deref(), Some("MSH_1") | Some("MSH_2"))
        {
            return el.leaf_value().map(|v| v.to_string()).unwrap_or_default();
        }
        let layout = el.layout();
        let mut positions: BTreeMap<usize, String> = BTreeMap::new();
        let mut next = 1;
        for child in el.children() {
            let pos = match child.name() {
                Some(n) => layout
                    .as_ref()
                    .and_then(|l| l.slot_position(&n).map(|p| p + 1))
                    .or_else(|| name_position(&n))
                    .unwrap_or(next),
                None => next,
            };
            next = pos + 1;
            positions
                .entry(pos)
                .or_insert_with(|| self.element(&child));
        }
        let declared = layout.map_or(0, |l| l.slots().len());
        let sep = self
            .enc
            .separator(el.kind())
            .unwrap_or(self.enc.subcomponent);
        self.fill_gaps(positions.into_iter(), declared)
            .join(&sep.to_string())
    }

    fn leaf(&self, el: &Element) -> String {
        el.leaf_value()
            .map(|v| datatype::encode(&v, &self.enc))
            .unwrap_or_default()
    }

    /// Dense 1-based list from sparse `(position, text)` pairs.
    fn fill_gaps(&self, items: impl Iterator<Item = (usize, String)>, declared: usize) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for (pos, text) in items {
            if pos == 0 {
                continue;
            }
            if out.len() < pos {
                out.resize(pos, String::new());
            }
            out[pos - 1] = text;
        }
        if self.trailing {
            if out.len() < declared {
                out.resize(declared, String::new());
            }
        } else {
            while out.last().map_or(false, String::is_empty) {
                out.pop();
            }
        }
        out
    }
}

/// Children of a message or group sorted by slot index.
fn slot_order(el: &Element) -> Vec<Element> {
    let layout = el.layout();
    let mut last = 0;
    let mut keyed: Vec<(usize, Element)> = el
        .children()
        .into_iter()
        .map(|c| {
            let key = c
                .name()
                .and_then(|n| layout.as_ref().and_then(|l| l.slot_position(&n)))
                .unwrap_or(last);
            last = key;
            (key, c)
        })
        .collect();
    keyed.sort_by_key(|(k, _)| *k);
    keyed.into_iter().map(|(_, c)| c).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::parser::{parse_field, parse_message, parse_segment};

    fn config() -> Config {
        Config::new().expect("config")
    }

    #[test]
    fn gaps_and_trailing_empties() {
        let seg = parse_segment("PID|1||||DOE^^^^^^L||", &config()).expect("pid");
        assert_eq!(seg.to_er7(), "PID|1||||DOE^^^^^^L");
    }

    #[test]
    fn trailing_children_pads_to_declaration() {
        let field = parse_field("PID_5", "DOE", &config()).expect("field");
        let options = Er7Options {
            trailing_children: true,
            ..Er7Options::default()
        };
        // Existing children are padded too: FN has five subcomponents.
        assert_eq!(field.to_er7_with(&options), format!("DOE&&&&{}", "^".repeat(13)));
    }

    #[test]
    fn other_encoding_chars() {
        let msg = parse_message(
            "MSH|^~\\&|||||||ADT^A01^ADT_A01|1|P|2.5\rPID|1||A^^^B~C||DOE^JOHN",
            &config(),
        )
        .expect("parse");
        let enc = EncodingChars::new('#', "$%*!").expect("enc");
        let options = Er7Options {
            encoding_chars: Some(enc),
            ..Er7Options::default()
        };
        assert_eq!(
            msg.to_er7_with(&options),
            "MSH#$%*!#######ADT$A01$ADT_A01#1#P#2.5\rPID#1##A$$$B%C##DOE$JOHN"
        );
    }

    #[test]
    fn escapes_text_values() {
        let seg = parse_segment("NTE|1||a\\F\\b\\S\\c", &config()).expect("nte");
        let comment = seg.child("NTE_3").expect("comment");
        assert_eq!(
            comment.leaf_value().map(|v| v.to_string()).as_deref(),
            Some("a|b^c")
        );
        assert_eq!(seg.to_er7(), "NTE|1||a\\F\\b\\S\\c");
    }
}
