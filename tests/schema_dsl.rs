//! Reference-schema DSL: parsing, resolution errors, custom schemas driving the
//! message model, and message profiles.

use hl7er7::parser::parse_message_with;
use hl7er7::schema::{Content, ElementKind, SchemaProvider};
use hl7er7::schema_parser::{load_schema, parse_schema};
use hl7er7::{
    parse_message, Config, Hl7Error, MessageProfile, ParseOptions, ReferenceLibrary,
    SchemaVersion,
};
use std::sync::Arc;

const NOTIFY: &str = r#"
// Minimal notification schema.
version "2.5";

base ST, ID, SI;

table 0008 "ACKNOWLEDGMENT_CODE" { "AA", "AE", "AR" }

datatype MSG {
    MSG_1: ID (3) "MESSAGE_CODE";
    MSG_2: ID (3) "TRIGGER_EVENT";
    MSG_3: ID (7) "MESSAGE_STRUCTURE";
}

segment MSH "MESSAGE_HEADER" {
    MSH_1: ST [1..1] (1) "FIELD_SEPARATOR";
    MSH_2: ST [1..1] (4) "ENCODING_CHARACTERS";
    MSH_3: ST [0..1] (20) "SENDING_APPLICATION";
    MSH_4: ST [0..1] (20) "SENDING_FACILITY";
    MSH_5: ST [0..1] (20) "RECEIVING_APPLICATION";
    MSH_6: ST [0..1] (20) "RECEIVING_FACILITY";
    MSH_7: ST [1..1] (26) "DATE_TIME_OF_MESSAGE";
    MSH_8: ST [0..1] (40) "SECURITY";
    MSH_9: MSG [1..1] (15) "MESSAGE_TYPE";
    MSH_10: ST [1..1] (20) "MESSAGE_CONTROL_ID";
    MSH_11: ST [1..1] (3) "PROCESSING_ID";
    MSH_12: ST [1..1] (60) "VERSION_ID";
}

segment NTE "NOTES_AND_COMMENTS" {
    NTE_1: SI [0..1] (4) "SET_ID_NTE";
    NTE_2: ST [0..*] (200) "COMMENT";
}

segment DSC "CONTINUATION_POINTER" {
    DSC_1: ST [0..1] (180) "CONTINUATION_POINTER";
}

segment MSA "MESSAGE_ACKNOWLEDGMENT" {
    MSA_1: ID [1..1] (2) "ACKNOWLEDGMENT_CODE" table 0008;
    MSA_2: ST [1..1] (20) "MESSAGE_CONTROL_ID";
}

message NTF_N01 {
    MSH [1..1];
    group NTF_N01_BODY [1..1] choice {
        NTE [0..*];
        DSC [0..1];
    }
    MSA [0..1];
}
"#;

const HEADER: &str = "MSH|^~\\&|A|B|C|D|20240101000000||NTF^N01^NTF_N01|1|P|2.5";

fn notify_config() -> Config {
    let schema = load_schema(NOTIFY).expect("schema");
    Config::with_schema(Arc::new(schema))
}

#[test]
fn test_parse_schema_ast() {
    let ast = parse_schema(NOTIFY).expect("parse");
    assert_eq!(ast.version, "2.5");
    assert_eq!(ast.base_types, ["ST", "ID", "SI"]);
    assert_eq!(ast.tables.len(), 1);
    assert_eq!(ast.tables[0].codes, ["AA", "AE", "AR"]);
    assert_eq!(ast.tables[0].description.as_deref(), Some("ACKNOWLEDGMENT_CODE"));
    assert_eq!(ast.datatypes[0].components.len(), 3);
    assert!(ast.datatypes[0].components[0].cardinality.is_none());
    let names: Vec<_> = ast.segments.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["MSH", "NTE", "DSC", "MSA"]);
    let msa1 = &ast.segments[3].fields[0];
    assert_eq!(msa1.table.as_deref(), Some("0008"));
    assert_eq!(msa1.max_length, Some(2));
    assert_eq!(ast.messages[0].members.len(), 3);
    assert_eq!(ast.messages[0].members[1].name(), "NTF_N01_BODY");
}

#[test]
fn test_resolved_structures() {
    let schema = load_schema(NOTIFY).expect("schema");
    assert_eq!(schema.version(), SchemaVersion::V2_5);
    let msg = schema.message("NTF_N01").expect("message");
    let slots: Vec<_> = msg.slots().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(slots, ["MSH", "NTF_N01_BODY", "MSA"]);
    let body = msg.slot("NTF_N01_BODY").and_then(|s| s.reference.clone()).expect("group");
    assert!(body.is_choice());
    assert_eq!(body.kind, ElementKind::Group);

    let nte2 = schema
        .find_structure("NTE_2", ElementKind::Field, SchemaVersion::V2_5)
        .expect("NTE_2");
    assert!(nte2.is_leaf());
    assert_eq!(nte2.long_name.as_deref(), Some("COMMENT"));
    let msh9 = schema
        .find_structure("MSH_9", ElementKind::Field, SchemaVersion::V2_5)
        .expect("MSH_9");
    match &msh9.content {
        Content::Sequence(slots) => assert_eq!(slots.len(), 3),
        other => panic!("unexpected content {:?}", other),
    }
    assert!(schema.has_table("0008"));
    assert!(schema.is_base_datatype("varies", SchemaVersion::V2_5));
}

#[test]
fn test_syntax_errors() {
    let err = parse_schema("segment MSH { }").expect_err("no version");
    assert!(matches!(err, Hl7Error::Schema(_)));
    let err = parse_schema("version \"2.5\"; segment PID { PID_1: SI [0..1] }").expect_err("bad field");
    assert!(matches!(err, Hl7Error::Schema(_)));
}

#[test]
fn test_resolution_errors() {
    let duplicate = r#"
        version "2.5";
        base ST;
        segment NTE "A" { NTE_1: ST [0..1] "X"; }
        segment NTE "B" { NTE_2: ST [0..1] "Y"; }
    "#;
    match load_schema(duplicate) {
        Err(Hl7Error::Schema(msg)) => assert!(msg.contains("Duplicate segment: NTE"), "{}", msg),
        other => panic!("unexpected {:?}", other.map(|s| s.version())),
    }

    let unknown_type = r#"
        version "2.5";
        base ST;
        segment NTE "A" { NTE_1: XYZ [0..1] "X"; }
    "#;
    assert!(matches!(load_schema(unknown_type), Err(Hl7Error::Schema(_))));

    let foreign_field = r#"
        version "2.5";
        base ST;
        segment NTE "A" { PID_1: ST [0..1] "X"; }
    "#;
    assert!(matches!(load_schema(foreign_field), Err(Hl7Error::Schema(_))));

    let unknown_segment = r#"
        version "2.5";
        base ST;
        message ACK { MSH [1..1]; }
    "#;
    match load_schema(unknown_segment) {
        Err(Hl7Error::Schema(msg)) => assert!(msg.contains("unknown segment MSH"), "{}", msg),
        other => panic!("unexpected {:?}", other.map(|s| s.version())),
    }

    let repeated_member = r#"
        version "2.5";
        base ST;
        segment NTE "A" { NTE_1: ST [0..1] "X"; }
        message NTF_N02 { NTE [0..1]; NTE [0..*]; }
    "#;
    match load_schema(repeated_member) {
        Err(Hl7Error::Schema(msg)) => assert!(msg.contains("NTF_N02 declares NTE twice"), "{}", msg),
        other => panic!("unexpected {:?}", other.map(|s| s.version())),
    }

    assert!(matches!(
        load_schema("version \"two\";"),
        Err(Hl7Error::UnsupportedVersion(_))
    ));
}

#[test]
fn test_custom_schema_drives_parsing() {
    let cfg = notify_config();
    let text = format!("{}\rNTE|1|first~second\rMSA|AA|1", HEADER);
    let msg = parse_message(&text, &cfg).expect("parse");
    assert_eq!(msg.name().as_deref(), Some("NTF_N01"));
    let body = msg.child("NTF_N01_BODY").expect("body");
    assert_eq!(body.kind(), ElementKind::Group);
    let nte = body.child("NTE").expect("nte");
    assert_eq!(nte.children_named("NTE_2").len(), 2);
    assert_eq!(nte.child("COMMENT").expect("long name").to_er7(), "first");
    assert_eq!(msg.to_er7(), text);
    assert!(msg.validation_report().is_valid());
}

#[test]
fn test_choice_allows_one_alternative() {
    let cfg = notify_config();
    let text = format!("{}\rNTE|1|note\rDSC|next", HEADER);
    let msg = parse_message(&text, &cfg).expect("parse");
    let report = msg.validation_report();
    assert_eq!(report.errors.len(), 1, "{:?}", report.errors);
    assert_eq!(report.errors[0].path, "NTF_N01/NTF_N01_BODY");
    assert!(report.errors[0].message.contains("only one of NTE, DSC"));
}

#[test]
fn test_table_from_custom_schema() {
    let cfg = notify_config();
    let text = format!("{}\rNTE|1\rMSA|CA|1", HEADER);
    let msg = parse_message(&text, &cfg).expect("parse");
    let report = msg.validation_report();
    assert!(report.is_valid());
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].path, "NTF_N01/MSA/MSA_1");
}

#[test]
fn test_unknown_version_for_custom_schema() {
    let cfg = notify_config();
    let text = HEADER.replace("|2.5", "|2.7");
    assert!(matches!(
        parse_message(&text, &cfg),
        Err(Hl7Error::UnsupportedVersion(_))
    ));
}

const PID_PROFILE: &str = r#"
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
fn test_profile_overrides_structure() {
    let base = ReferenceLibrary::bundled().expect("bundled");
    let profile = MessageProfile::from_dsl(PID_PROFILE, base.as_ref()).expect("profile");
    let options = ParseOptions {
        profile: Some(Arc::new(profile)),
        ..ParseOptions::default()
    };
    let cfg = Config::new().expect("config");
    let text = "MSH|^~\\&|A|B|C|D|20240101000000||ADT^A01^ADT_A01|1|P|2.5\r\
EVN||20240101000000\r\
PID|||123^^^HOSP^MR||DOE^JOHN";
    let msg = parse_message_with(text, &cfg, &options).expect("parse");
    // PV1 is optional in the profile, PID_1 is required.
    let report = msg.validation_report();
    assert_eq!(report.errors.len(), 1, "{:?}", report.errors);
    assert_eq!(report.errors[0].path, "ADT_A01/PID");
    assert!(report.errors[0].message.contains("missing PID_1"));

    let pid = msg.child("PID").expect("pid");
    assert_eq!(pid.layout().map(|l| l.slots().len()), Some(3));
}

#[test]
fn test_profile_without_structure() {
    let base = ReferenceLibrary::bundled().expect("bundled");
    let profile = MessageProfile::from_dsl(PID_PROFILE, base.as_ref()).expect("profile");
    let options = ParseOptions {
        profile: Some(Arc::new(profile)),
        ..ParseOptions::default()
    };
    let ack = "MSH|^~\\&|A|B|C|D|20240101000000||ACK^A01^ACK|1|P|2.5\rMSA|AA|1";
    assert!(matches!(
        parse_message_with(ack, &Config::new().expect("config"), &options),
        Err(Hl7Error::MessageProfileNotFound(_))
    ));
}

#[test]
fn test_profile_from_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("adt.hl7s");
    std::fs::write(&path, PID_PROFILE).expect("write profile");
    let base = ReferenceLibrary::bundled().expect("bundled");
    let profile = MessageProfile::from_file(&path, base.as_ref()).expect("profile");
    assert_eq!(profile.version(), SchemaVersion::V2_5);
    assert_eq!(profile.structure_names().collect::<Vec<_>>(), ["ADT_A01"]);
    // Alone, the profile does not know CX or XPN.
    assert!(matches!(load_schema(PID_PROFILE), Err(Hl7Error::Schema(_))));
}
