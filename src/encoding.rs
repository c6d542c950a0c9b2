//! ER7 delimiter set.

use crate::error::{Hl7Error, Result};
use crate::schema::{ElementKind, SchemaVersion};

/// Separators and escape character of one message; MSH-1 is `field`, MSH-2 is the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingChars {
    pub field: char,
    pub component: char,
    pub repetition: char,
    pub escape: char,
    pub subcomponent: char,
    /// Fifth MSH-2 character, v2.7 and later.
    pub truncation: Option<char>,
    pub segment: char,
}

impl Default for EncodingChars {
    fn default() -> Self {
        EncodingChars {
            field: '|',
            component: '^',
            repetition: '~',
            escape: '\\',
            subcomponent: '&',
            truncation: None,
            segment: '\r',
        }
    }
}

impl EncodingChars {
    /// Build from MSH-1 and MSH-2 without any version constraint on the MSH-2 length.
    pub fn new(field: char, msh2: &str) -> Result<Self> {
        let chars: Vec<char> = msh2.chars().collect();
        if chars.len() < 4 {
            return Err(Hl7Error::InvalidEncodingChars(format!(
                "expected at least 4 encoding characters, found {:?}",
                msh2
            )));
        }
        if chars.len() > 5 {
            return Err(Hl7Error::InvalidEncodingChars(format!(
                "too many encoding characters: {:?}",
                msh2
            )));
        }
        let enc = EncodingChars {
            field,
            component: chars[0],
            repetition: chars[1],
            escape: chars[2],
            subcomponent: chars[3],
            truncation: chars.get(4).copied(),
            segment: '\r',
        };
        enc.validate()?;
        Ok(enc)
    }

    /// Decode MSH-1/MSH-2 as read from a message header of `version`.
    pub fn from_msh(msh1: &str, msh2: &str, version: SchemaVersion) -> Result<Self> {
        let mut field_chars = msh1.chars();
        let field = match (field_chars.next(), field_chars.next()) {
            (Some(c), None) => c,
            _ => {
                return Err(Hl7Error::InvalidEncodingChars(format!(
                    "field separator must be a single character, found {:?}",
                    msh1
                )))
            }
        };
        let count = msh2.chars().count();
        let allowed = if version.supports_truncation() {
            count == 4 || count == 5
        } else {
            count == 4
        };
        if !allowed {
            return Err(Hl7Error::InvalidEncodingChars(format!(
                "{} encoding characters {:?} not allowed for version {}",
                count, msh2, version
            )));
        }
        Self::new(field, msh2)
    }

    pub fn with_truncation(mut self, truncation: char) -> Result<Self> {
        self.truncation = Some(truncation);
        self.validate()?;
        Ok(self)
    }

    /// Every delimiter must be distinct.
    pub fn validate(&self) -> Result<()> {
        let all = self.delimiters();
        for (i, c) in all.iter().enumerate() {
            if all[i + 1..].contains(c) {
                return Err(Hl7Error::InvalidEncodingChars(format!(
                    "duplicate encoding character {:?}",
                    c
                )));
            }
            if c.is_alphanumeric() {
                return Err(Hl7Error::InvalidEncodingChars(format!(
                    "alphanumeric encoding character {:?}",
                    c
                )));
            }
        }
        Ok(())
    }

    pub fn delimiters(&self) -> Vec<char> {
        let mut all = vec![
            self.segment,
            self.field,
            self.component,
            self.repetition,
            self.escape,
            self.subcomponent,
        ];
        all.extend(self.truncation);
        all
    }

    /// Value of MSH-1.
    pub fn msh1(&self) -> String {
        self.field.to_string()
    }

    /// Value of MSH-2, in fixed order component, repetition, escape, subcomponent[, truncation].
    pub fn msh2(&self) -> String {
        let mut s: String = [self.component, self.repetition, self.escape, self.subcomponent]
            .iter()
            .collect();
        s.extend(self.truncation);
        s
    }

    /// Separator joining the children of an element of `kind`.
    pub fn separator(&self, kind: ElementKind) -> Option<char> {
        match kind {
            ElementKind::Message | ElementKind::Group => Some(self.segment),
            ElementKind::Segment => Some(self.field),
            ElementKind::Field => Some(self.component),
            ElementKind::Component => Some(self.subcomponent),
            ElementKind::SubComponent => None,
        }
    }
}
