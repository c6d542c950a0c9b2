//! Integration tests: parse, navigate, build, serialize and validate ER7 messages
//! against the bundled reference schemas.

use hl7er7::mllp;
use hl7er7::parser::{parse_segment, parse_segments};
use hl7er7::schema::ElementKind;
use hl7er7::{
    get_message_info, parse_message, parse_message_with, Config, Element, EncodingChars,
    Er7Options, Hl7Error, LinkState, ParseOptions, SchemaVersion, ValidationLevel, Value,
};

const ADT: &str = "MSH|^~\\&|A|B|C|D|20240101000000||ADT^A01^ADT_A01|1|P|2.5\r\
EVN||20240101000000\r\
PID|1||123^^^HOSP^MR||DOE^JOHN\r";

const ORU: &str = "MSH|^~\\&|LAB|HOSP|EMR|HOSP|20240101120000||ORU^R01^ORU_R01|42|P|2.5\r\
PID|1||123^^^HOSP^MR||DOE^JOHN\r\
OBR|1||A1|GLU^GLUCOSE\r\
OBX|1|NM|GLU^GLUCOSE||5.4|mmol/L\r\
OBR|2||A2|NA^SODIUM\r\
OBX|1|NM|NA^SODIUM||140|mmol/L\r\
NTE|1||hemolyzed\r\
OBR|3||A3|K^POTASSIUM\r\
OBX|1|NM|K^POTASSIUM||4.1|mmol/L";

const ACK: &str = "MSH|^~\\&|A|B|C|D|20240101000000||ACK^A01^ACK|1|P|2.5\rMSA|AA|1";

fn config() -> Config {
    Config::new().expect("bundled schemas")
}

#[test]
fn test_parse_adt_without_groups() {
    let msg = parse_message(ADT, &config()).expect("parse");
    assert_eq!(msg.kind(), ElementKind::Message);
    assert_eq!(msg.name().as_deref(), Some("ADT_A01"));
    let children = msg.children();
    let names: Vec<_> = children.iter().filter_map(Element::name).collect();
    assert_eq!(names, ["MSH", "EVN", "PID"]);
    assert!(children.iter().all(|c| c.kind() == ElementKind::Segment));
    let family = msg
        .child("PID")
        .and_then(|p| p.child("PID_5"))
        .and_then(|f| f.child("PID_5_1"))
        .expect("family name");
    assert_eq!(family.to_er7(), "DOE");
    assert_eq!(msg.to_er7(), ADT.trim_end_matches('\r'));
}

#[test]
fn test_segment_order_kept_unless_strict() {
    let text = "MSH|^~\\&|A|B|C|D|20240101000000||ADT^A01^ADT_A01|1|P|2.5\r\
EVN||20240101000000\r\
PID|1\r\
AL1|1\r\
PV1|1";
    let msg = parse_message(text, &config()).expect("tolerant");
    assert_eq!(msg.to_er7(), text);

    // A segment added afterwards goes before the first sibling declared after it.
    msg.child("OBX").expect("obx").set("OBX_1", "1").expect("new segment");
    assert_eq!(msg.to_er7(), text.replace("AL1|1", "OBX|1\rAL1|1"));

    let strict = parse_message(text, &config().strict()).expect("strict");
    assert_eq!(strict.to_er7(), text.replace("AL1|1\rPV1|1", "PV1|1\rAL1|1"));
}

#[test]
fn test_build_serialize_and_reparse() {
    let cfg = config();
    let msg = Element::message("ADT_A01", &cfg).expect("message");
    msg.child("MSH")
        .expect("msh")
        .set("MSH_9", "ADT^A01^ADT_A01")
        .expect("message type");
    msg.child("PID")
        .expect("pid")
        .set("PID_5", "DOE^JOHN")
        .expect("patient name");
    let text = msg.to_er7();
    assert!(text.starts_with("MSH|^~\\&|"));

    let back = parse_message(&text, &cfg).expect("reparse");
    assert_eq!(back.name().as_deref(), Some("ADT_A01"));
    let pid5 = back.child("PID").and_then(|p| p.child("PID_5")).expect("pid_5");
    let components: Vec<_> = pid5.children().iter().map(Element::to_er7).collect();
    assert_eq!(components, ["DOE", "JOHN"]);
    assert_eq!(back.to_er7(), text);
}

#[test]
fn test_delimiters_in_text_are_escaped() {
    let msg = parse_message(ACK, &config()).expect("parse");
    let msa = msg.child("MSA").expect("msa");
    msa.set("MSA_3", "AB|CD").expect("text message");
    let text = msg.to_er7();
    assert!(text.ends_with("MSA|AA|1|AB\\F\\CD"), "{}", text);

    let back = parse_message(&text, &config()).expect("reparse");
    let msa3 = back.child("MSA").and_then(|s| s.child("MSA_3")).expect("msa_3");
    assert_eq!(msa3.leaf_value(), Some(Value::text("AB|CD")));
    assert_eq!(msa3.value(), "AB|CD");
}

#[test]
fn test_escape_round_trip_all_delimiters() {
    let seg = parse_segment("NTE|1", &config()).expect("nte");
    let comment = "a|b^c~d\\e&f";
    seg.set("NTE_3", Value::text(comment)).expect("comment");
    let text = seg.to_er7();
    assert_eq!(text, "NTE|1||a\\F\\b\\S\\c\\R\\d\\E\\e\\T\\f");
    let back = parse_segment(&text, &config()).expect("reparse");
    assert_eq!(
        back.child("NTE_3").expect("nte_3").leaf_value(),
        Some(Value::text(comment))
    );
}

#[test]
fn test_fields_after_trailing_varies_are_varies() {
    let text = "QPD|Q1^QUERY^HL7|T1|a|b|c^d|e|f|g|h|i|j|k";
    let seg = parse_segment(text, &config()).expect("qpd");
    assert!(seg.allows_infinite_children());
    for n in 4..=12 {
        let name = format!("QPD_{}", n);
        let field = seg.child(&name).expect("extra field");
        assert_eq!(field.datatype().as_deref(), Some("varies"), "{}", name);
    }
    assert_eq!(seg.child("QPD_6").expect("qpd_6").to_er7(), "c^d");
    assert_eq!(seg.child("QPD_12").expect("qpd_12").to_er7(), "k");
    assert_eq!(seg.to_er7(), text);
}

#[test]
fn test_foreign_field_rejected_at_every_level() {
    for level in [
        ValidationLevel::Strict,
        ValidationLevel::Tolerant,
        ValidationLevel::Quiet,
    ] {
        let cfg = config().validation_level(level);
        let spm = Element::new(ElementKind::Segment, "SPM", &cfg).expect("spm");
        let pid1 = Element::new(ElementKind::Field, "PID_1", &cfg).expect("pid_1");
        let err = spm.add(&pid1).expect_err("PID_1 under SPM");
        assert!(matches!(err, Hl7Error::ChildNotValid { .. }), "{:?}", err);
        assert_eq!(pid1.link_state(), LinkState::Detached);
        assert_eq!(spm.child_count(), 0);
    }
}

#[test]
fn test_repeating_groups_are_siblings() {
    let msg = parse_message(ORU, &config()).expect("parse");
    let result = msg.child("ORU_R01_PATIENT_RESULT").expect("patient result");
    assert_eq!(msg.children_named("ORU_R01_PATIENT_RESULT").len(), 1);
    let orders = result.children_named("ORU_R01_ORDER_OBSERVATION");
    assert_eq!(orders.len(), 3);
    for (i, order) in orders.iter().enumerate() {
        assert_eq!(order.kind(), ElementKind::Group);
        assert_eq!(order.children_named("OBR").len(), 1);
        let observations = order.children_named("ORU_R01_OBSERVATION");
        assert_eq!(observations.len(), 1);
        let obr1 = order.child("OBR").and_then(|s| s.child("OBR_1")).expect("obr_1");
        assert_eq!(obr1.to_er7(), (i + 1).to_string());
    }
    let second = &orders[1];
    let note = second
        .child("ORU_R01_OBSERVATION")
        .and_then(|g| g.child("NTE"))
        .expect("note follows its observation");
    assert_eq!(note.to_er7(), "NTE|1||hemolyzed");
    let patient = result.child("ORU_R01_PATIENT").expect("patient");
    assert_eq!(patient.children_named("PID").len(), 1);
    assert_eq!(msg.to_er7(), ORU);
}

#[test]
fn test_orders_reachable_by_index() {
    let msg = parse_message(ORU, &config()).expect("parse");
    let view = msg
        .child("ORU_R01_PATIENT_RESULT")
        .and_then(|r| r.get("ORU_R01_ORDER_OBSERVATION"))
        .expect("orders");
    assert_eq!(view.len(), 3);
    let third = view.at(2).expect("third order");
    assert_eq!(
        third.resolve("OBR/OBR_4/CE_2").expect("text").to_er7(),
        "POTASSIUM"
    );
    assert!(view.at(3).is_none());
}

#[test]
fn test_reading_does_not_change_the_message() {
    let msg = parse_message(ADT, &config()).expect("parse");
    let before = msg.to_er7();
    let pid = msg.child("PID").expect("pid");
    let middle = pid.resolve("PID_5.XPN_3").expect("middle name");
    assert_eq!(middle.to_er7(), "");
    assert_eq!(middle.link_state(), LinkState::Traversing);
    let sex = pid.child("PID_8").expect("sex");
    assert_eq!(sex.to_er7(), "");
    let visit = msg.child("PV1").expect("visit");
    assert_eq!(visit.link_state(), LinkState::Traversing);
    assert_eq!(msg.to_er7(), before);
    assert!(msg.children_named("PV1").is_empty());

    sex.set_value("M").expect("write");
    assert_eq!(sex.link_state(), LinkState::Committed);
    assert_eq!(msg.to_er7(), format!("{}|||M", before));
}

#[test]
fn test_cardinality_strict_and_tolerant() {
    let strict = config().strict();
    let msg = Element::message("ACK", &strict).expect("ack");
    msg.add(&msg.new_child("MSA").expect("msa")).expect("first");
    let err = msg
        .add(&msg.new_child("MSA").expect("msa"))
        .expect_err("second MSA");
    assert!(matches!(
        err,
        Hl7Error::MaxChildLimitReached { limit: 1, .. }
    ));
    assert_eq!(msg.children_named("MSA").len(), 1);

    let tolerant = Element::message("ACK", &config()).expect("ack");
    tolerant.add(&tolerant.new_child("MSA").expect("msa")).expect("first");
    tolerant.add(&tolerant.new_child("MSA").expect("msa")).expect("second");
    assert_eq!(tolerant.children_named("MSA").len(), 2);
    let report = tolerant.validation_report();
    assert!(!report.is_valid());
    assert!(report.errors.iter().any(|e| e.message.contains("too many MSA")));
}

#[test]
fn test_custom_encoding_chars_survive_serialization() {
    let cfg = config();
    let enc = EncodingChars::new('#', "$%*!").expect("encoding chars");
    let msg = Element::message("ADT_A01", &cfg).expect("message");
    msg.set_encoding_chars(enc).expect("set encoding chars");
    msg.child("MSH")
        .expect("msh")
        .set("MSH_9", "ADT$A01$ADT_A01")
        .expect("message type");
    msg.child("PID")
        .expect("pid")
        .set("PID_5", "DOE$JOHN")
        .expect("name");
    let text = msg.to_er7();
    assert!(text.starts_with("MSH#$%*!#"));
    assert!(text.ends_with("PID#####DOE$JOHN"), "{}", text);

    let info = get_message_info(&text, &cfg).expect("info");
    assert_eq!(info.encoding_chars, enc);
    let back = parse_message(&text, &cfg).expect("reparse");
    assert_eq!(back.encoding_chars(), enc);
    assert_eq!(back.child("PID_5_2").expect("given").to_er7(), "JOHN");
    assert_eq!(back.to_er7(), text);

    let options = Er7Options {
        encoding_chars: Some(EncodingChars::default()),
        ..Er7Options::default()
    };
    assert!(back.to_er7_with(&options).ends_with("PID|||||DOE^JOHN"));
}

#[test]
fn test_truncation_character_from_2_7() {
    let text = "MSH|^~\\&#|A|B|C|D|20240101000000||ACK^A01^ACK|1|P|2.7\rMSA|AA|1";
    let info = get_message_info(text, &config()).expect("info");
    assert_eq!(info.version, SchemaVersion::V2_7);
    assert_eq!(info.encoding_chars.truncation, Some('#'));
    let msg = parse_message(text, &config()).expect("parse");
    assert_eq!(msg.version(), SchemaVersion::V2_7);
    assert_eq!(msg.encoding_chars().msh2(), "^~\\&#");
    assert_eq!(msg.to_er7(), text);

    let old = text.replace("|2.7", "|2.5");
    assert!(matches!(
        parse_message(&old, &config()),
        Err(Hl7Error::InvalidEncodingChars(_))
    ));
}

#[test]
fn test_validation_report_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("report.txt");

    let msg = parse_message(&ACK.replace("MSA|AA", "MSA|XX"), &config()).expect("parse");
    msg.validate_to_file(&path).expect("warnings only");
    let report = std::fs::read_to_string(&path).expect("read report");
    assert_eq!(report, "Warning: ACK/MSA/MSA_1: value \"XX\" is not in table 0008\n");

    let broken = "MSH|^~\\&|A|B|C|D|20240101000000||ACK^A01^ACK|1|P|2.5";
    let options = ParseOptions {
        force_validation: true,
        report_file: Some(dir.path().join("forced.txt")),
        ..ParseOptions::default()
    };
    let err = parse_message_with(broken, &config(), &options).expect_err("MSA missing");
    assert!(matches!(err, Hl7Error::Validation(_)));
    let forced = std::fs::read_to_string(dir.path().join("forced.txt")).expect("read forced");
    assert!(forced.starts_with("Error: ACK: missing MSA"), "{}", forced);
}

#[test]
fn test_tolerant_downgrade_is_reported() {
    let text = "MSH|^~\\&|A|B|C|D|20240101000000||ADT^A01^ADT_A01|1|P|2.5\r\
EVN||20240101000000\r\
PID|one||123^^^HOSP^MR||DOE^JOHN\r\
PV1|1|I";
    let msg = parse_message(text, &config()).expect("tolerant parse");
    let set_id = msg.child("PID").and_then(|p| p.child("PID_1")).expect("pid_1");
    assert_eq!(set_id.datatype(), None);
    assert_eq!(set_id.to_er7(), "one");
    assert_eq!(msg.to_er7(), text);
    let report = msg.validation_report();
    assert_eq!(report.errors.len(), 1, "{:?}", report.errors);
    assert_eq!(report.errors[0].path, "ADT_A01/PID/PID_1");

    let strict = config().strict();
    assert!(matches!(
        parse_message(text, &strict),
        Err(Hl7Error::InvalidValue { .. })
    ));
}

#[test]
fn test_valid_messages_validate() {
    parse_message(ACK, &config())
        .expect("ack")
        .validate()
        .expect("valid ack");
    let adt = format!("{}PV1|1|I", ADT);
    let msg = parse_message(&adt, &config()).expect("adt");
    let report = msg.validation_report();
    assert!(report.is_valid(), "{:?}", report.errors);
}

#[test]
fn test_segments_outside_message() {
    let segments = parse_segments("PID|1||7||DOE\rPV1|1|O", &config()).expect("segments");
    assert_eq!(segments.len(), 2);
    assert!(segments.iter().all(|s| s.link_state() == LinkState::Detached));
    assert_eq!(segments[1].to_er7(), "PV1|1|O");
}

#[test]
fn test_to_mllp() {
    let msg = parse_message(ACK, &config()).expect("parse");
    let framed = msg.to_mllp();
    let bytes = framed.as_bytes();
    assert_eq!(bytes[0], mllp::START_BLOCK);
    assert_eq!(
        &bytes[bytes.len() - 2..],
        &[mllp::END_BLOCK, mllp::CARRIAGE_RETURN]
    );
    let inner = mllp::unwrap(bytes).expect("unwrap");
    assert_eq!(inner, ACK);
    assert_eq!(parse_message(&inner, &config()).expect("reparse").to_er7(), ACK);
}
