//! # hl7er7: HL7 v2.x ER7 message model
//!
//! A schema-driven object model for HL7 v2.x messages in the ER7 (pipe-delimited)
//! encoding: parse text into a tree, navigate and edit it by name, validate it
//! against a versioned reference schema and serialize it back, byte for byte.
//!
//! ## Tree
//!
//! - **Message** → **Group** (optional, repeatable) → **Segment** → **Field** (repeatable)
//!   → **Component** → **SubComponent**
//! - Names: short (`PID_5`), long (`PATIENT_NAME`) or positional (`PID_5_1_1`),
//!   case-insensitive
//! - Reads never change the tree; the first write through a not-yet-existing path
//!   creates every missing element on it
//! - `Strict` validation level rejects unknown names, cardinality overflow and bad
//!   values on construction; `Tolerant`/`Quiet` accept them (values that do not fit
//!   their datatype are kept as text with the datatype cleared)
//!
//! ## Reference schemas
//!
//! Structures come from a small DSL (pest grammar in `schema.pest`), bundled for a
//! subset of v2.5 and v2.7:
//!
//! ```text
//! version "2.5";
//! base ST, ID, SI, varies;
//! table 0001 "ADMINISTRATIVE_SEX" { "F", "M", "U" }
//! datatype XPN { XPN_1: ST (194) "FAMILY_NAME"; XPN_2: ST (30) "GIVEN_NAME"; }
//! segment PID "PATIENT_IDENTIFICATION" {
//!     PID_1: SI [0..1] (4) "SET_ID_PID";
//!     PID_5: XPN [1..*] (250) "PATIENT_NAME";
//! }
//! message ADT_A01 { MSH [1..1]; PID [1..1]; group ADT_A01_PROCEDURE [0..*] { PR1 [1..1]; } }
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use hl7er7::{parse_message, Config};
//!
//! let config = Config::new()?;
//! let msg = parse_message("MSH|^~\\&|A|B|C|D|20240101||ADT^A01^ADT_A01|1|P|2.5\rPID|1||7||DOE^JOHN", &config)?;
//! assert_eq!(msg.child("PID")?.child("PID_5_1")?.to_er7(), "DOE");
//! msg.child("PID")?.set("PATIENT_NAME", "ROE^JANE")?;
//! println!("{}", msg.to_er7());
//! # Ok::<(), hl7er7::Hl7Error>(())
//! ```
//!
//! See `tests/integration.rs` for complete scenarios.

pub mod ast;
pub mod config;
pub mod datatype;
pub mod element;
pub mod encoding;
pub mod error;
pub mod mllp;
pub mod parser;
pub mod profile;
pub mod reference;
pub mod schema;
pub mod schema_parser;
pub mod serializer;
pub mod validation;

pub use config::{Config, ValidationLevel};
pub use datatype::Value;
pub use element::{Assign, ChildList, Element, ElementsView, LinkState};
pub use encoding::EncodingChars;
pub use error::{Hl7Error, Result};
pub use parser::{get_message_info, parse_message, parse_message_with, MessageInfo, ParseOptions};
pub use profile::MessageProfile;
pub use reference::ReferenceLibrary;
pub use schema::{ElementKind, SchemaProvider, SchemaVersion, StructureDef};
pub use serializer::Er7Options;
pub use validation::{validate_with_report, ValidationIssue, ValidationReport, Validator};
