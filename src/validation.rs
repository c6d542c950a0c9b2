//! Schema conformance checks over an element tree.
//!
//! Errors: unknown elements, children the structure does not declare, occurrence
//! counts outside a slot's cardinality, several alternatives of a choice, and a
//! datatype that differs from the declared one (`varies` is exempt). Warnings: codes
//! missing from a table the schema carries, and values longer than the declared
//! maximum length.

use crate::datatype;
use crate::element::Element;
use crate::error::{Hl7Error, Result};
use crate::schema::{is_z_name, ElementKind, StructureDef, VARIES};
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Slash-separated element path, repetitions as `NAME[n]` (1-based).
    pub path: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn first_error(&self) -> Option<&ValidationIssue> {
        self.errors.first()
    }

    /// One `Error: …` / `Warning: …` line per finding.
    pub fn write_to<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        for e in &self.errors {
            writeln!(out, "Error: {}", e)?;
        }
        for w in &self.warnings {
            writeln!(out, "Warning: {}", w)?;
        }
        out.flush()
    }

    /// Fails with the first error, if any.
    pub fn into_result(self) -> Result<()> {
        match self.errors.into_iter().next() {
            Some(issue) => Err(Hl7Error::Validation(issue)),
            None => Ok(()),
        }
    }

    fn error(&mut self, path: &str, message: String) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message,
        });
    }

    fn warning(&mut self, path: &str, message: String) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message,
        });
    }
}

/// Walks a tree and collects every finding.
#[derive(Debug, Default, Clone, Copy)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Validator
    }

    pub fn validate(&self, root: &Element) -> ValidationReport {
        let mut report = ValidationReport::default();
        let path = label(root);
        self.node(root, &path, false, &mut report);
        debug!(
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "validation finished"
        );
        report
    }

    fn node(&self, el: &Element, path: &str, in_z: bool, report: &mut ValidationReport) {
        let kind = el.kind();
        let name = el.name();
        let structure = el.structure();
        let z = in_z || name.as_deref().map_or(false, is_z_name);

        match kind {
            ElementKind::Message if name.is_none() || structure.is_none() => {
                report.error(path, "unknown message structure".to_string());
            }
            ElementKind::Group | ElementKind::Segment if structure.is_none() && !z => {
                report.error(
                    path,
                    format!("unknown {} {}", kind, name.as_deref().unwrap_or("<unnamed>")),
                );
            }
            _ => {}
        }

        if let Some(s) = &structure {
            if kind.has_datatype() {
                self.datatype(el, s, path, report);
                self.leaf_value(el, s, path, report);
            }
        }

        if let Some(layout) = el.layout() {
            self.children(el, &layout, path, report);
        }

        let mut seen: HashMap<String, usize> = HashMap::new();
        for child in el.children() {
            let key = label(&child);
            let n = seen.entry(key.clone()).or_insert(0);
            *n += 1;
            let child_path = if *n > 1 {
                format!("{}/{}[{}]", path, key, n)
            } else {
                format!("{}/{}", path, key)
            };
            self.node(&child, &child_path, z, report);
        }
    }

    /// Children against the slots of `layout`.
    fn children(
        &self,
        el: &Element,
        layout: &Arc<StructureDef>,
        path: &str,
        report: &mut ValidationReport,
    ) {
        let infinite = el.allows_infinite_children();
        let declared = layout.slots().len();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for child in el.children() {
            let Some(name) = child.name() else {
                report.error(path, format!("unnamed {} not allowed", child.kind()));
                continue;
            };
            *counts.entry(name.clone()).or_insert(0) += 1;
            if layout.slot(&name).is_some() || is_z_name(&name) {
                continue;
            }
            let beyond = crate::schema::name_position(&name).map_or(false, |p| p > declared);
            if infinite && beyond {
                continue;
            }
            report.error(
                path,
                format!("{} is not a valid child of {}", name, label(el)),
            );
        }
        let count = |name: &str| counts.get(name).copied().unwrap_or(0);
        if layout.is_choice() {
            let present: Vec<&str> = layout
                .slots()
                .iter()
                .filter(|s| count(&s.name) > 0)
                .map(|s| s.name.as_str())
                .collect();
            if present.len() > 1 {
                report.error(
                    path,
                    format!("only one of {} may be present", present.join(", ")),
                );
            }
            return;
        }
        for slot in layout.slots() {
            let n = count(&slot.name);
            if slot.cardinality.is_missing(n) {
                report.error(
                    path,
                    format!(
                        "missing {} (found {}, expected {})",
                        slot.name, n, slot.cardinality
                    ),
                );
            } else if slot.cardinality.is_exceeded(n) {
                report.error(
                    path,
                    format!(
                        "too many {} (found {}, expected {})",
                        slot.name, n, slot.cardinality
                    ),
                );
            }
        }
    }

    fn datatype(&self, el: &Element, s: &StructureDef, path: &str, report: &mut ValidationReport) {
        let Some(declared) = s.datatype.as_deref() else {
            return;
        };
        if declared == VARIES {
            return;
        }
        let actual = el.datatype();
        if actual.as_deref() != Some(declared) {
            report.error(
                path,
                format!(
                    "datatype {} expected, found {}",
                    declared,
                    actual.as_deref().unwrap_or("none")
                ),
            );
        }
    }

    /// Table membership and length of base-typed values.
    fn leaf_value(&self, el: &Element, s: &StructureDef, path: &str, report: &mut ValidationReport) {
        let Some(dt) = el.datatype() else {
            return;
        };
        let text = el.to_er7();
        let max = s.max_length.or_else(|| datatype::max_length(&dt));
        if let Some(max) = max {
            let len = text.chars().count();
            if len > max {
                report.warning(
                    path,
                    format!("value length {} exceeds maximum {}", len, max),
                );
            }
        }
        let (Some(table), Some(value)) = (s.table.as_deref(), el.leaf_value()) else {
            return;
        };
        let config = el.config();
        if let Some(codes) = config.schema.table(table, el.version()) {
            let code = value.to_string();
            if !code.is_empty() && !codes.iter().any(|c| *c == code) {
                report.warning(
                    path,
                    format!("value {:?} is not in table {}", code, table),
                );
            }
        }
    }
}

/// Full report for `root`.
pub fn validate_with_report(root: &Element) -> ValidationReport {
    Validator::new().validate(root)
}

fn label(el: &Element) -> String {
    el.name().unwrap_or_else(|| el.kind().to_string())
}
