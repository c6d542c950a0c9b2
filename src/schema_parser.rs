//! Parse reference-schema DSL source into AST using PEST.

use crate::ast::*;
use crate::error::{Hl7Error, Result};
use crate::schema::{Cardinality, Schema};
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "schema.pest"]
struct SchemaParser;

type Pair<'i> = pest::iterators::Pair<'i, Rule>;

/// Parse schema source into AST.
pub fn parse_schema(source: &str) -> Result<SchemaSource> {
    let pairs = SchemaParser::parse(Rule::schema, source)
        .map_err(|e| Hl7Error::Schema(format!("Parse error: {}", e)))?;
    let pair = pairs
        .into_iter()
        .next()
        .ok_or_else(|| Hl7Error::Schema("Empty parse".to_string()))?;
    build_schema(pair).map_err(Hl7Error::Schema)
}

/// Parse and resolve in one step.
pub fn load_schema(source: &str) -> Result<Schema> {
    Schema::resolve(parse_schema(source)?)
}

fn build_schema(pair: Pair) -> std::result::Result<SchemaSource, String> {
    let mut out = SchemaSource::default();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::version_decl => {
                let s = inner.into_inner().next().ok_or("version: missing string")?;
                out.version = string_value(s);
            }
            Rule::base_decl => {
                out.base_types
                    .extend(inner.into_inner().map(|p| p.as_str().to_string()));
            }
            Rule::table_def => out.tables.push(build_table(inner)?),
            Rule::datatype_def => out.datatypes.push(build_datatype(inner)?),
            Rule::segment_def => out.segments.push(build_segment(inner)?),
            Rule::message_def => out.messages.push(build_message(inner)?),
            _ => {}
        }
    }
    if out.version.is_empty() {
        return Err("schema: missing version".to_string());
    }
    Ok(out)
}

fn build_table(pair: Pair) -> std::result::Result<TableSection, String> {
    let mut id = String::new();
    let mut description = None;
    let mut codes = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::table_id => id = inner.as_str().to_string(),
            Rule::table_desc => {
                description = inner.into_inner().next().map(string_value);
            }
            Rule::string => codes.push(string_value(inner)),
            _ => {}
        }
    }
    if id.is_empty() {
        return Err("table: missing id".to_string());
    }
    Ok(TableSection {
        id,
        description,
        codes,
    })
}

fn build_datatype(pair: Pair) -> std::result::Result<DatatypeSection, String> {
    let mut name = String::new();
    let mut components = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => name = inner.as_str().to_string(),
            Rule::component_def => components.push(build_leaf(inner)?),
            _ => {}
        }
    }
    if name.is_empty() {
        return Err("datatype: missing name".to_string());
    }
    Ok(DatatypeSection { name, components })
}

fn build_segment(pair: Pair) -> std::result::Result<SegmentSection, String> {
    let mut name = String::new();
    let mut description = None;
    let mut fields = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => name = inner.as_str().to_string(),
            Rule::string => description = Some(string_value(inner)),
            Rule::field_def => fields.push(build_leaf(inner)?),
            _ => {}
        }
    }
    if name.is_empty() {
        return Err("segment: missing name".to_string());
    }
    Ok(SegmentSection {
        name,
        description,
        fields,
    })
}

/// Shared by `field_def` and `component_def`: `NAME: TYPE [card]? (len)? "LONG" table X?;`
fn build_leaf(pair: Pair) -> std::result::Result<LeafField, String> {
    let mut idents = Vec::new();
    let mut cardinality = None;
    let mut max_length = None;
    let mut long_name = None;
    let mut table = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => idents.push(inner.as_str().to_string()),
            Rule::cardinality => cardinality = Some(build_cardinality(inner)?),
            Rule::max_length => {
                let n = inner.into_inner().next().ok_or("max length: number")?;
                max_length = Some(parse_number(n.as_str())? as usize);
            }
            Rule::string => long_name = Some(string_value(inner)),
            Rule::table_ref => {
                let id = inner.into_inner().next().ok_or("table ref: id")?;
                table = Some(id.as_str().to_string());
            }
            _ => {}
        }
    }
    let mut idents = idents.into_iter();
    let name = idents.next().ok_or("leaf: missing name")?;
    let datatype = idents
        .next()
        .ok_or_else(|| format!("{}: missing datatype", name))?;
    let long_name = long_name.ok_or_else(|| format!("{}: missing long name", name))?;
    Ok(LeafField {
        name,
        datatype,
        cardinality,
        max_length,
        long_name,
        table,
    })
}

fn build_message(pair: Pair) -> std::result::Result<MessageSection, String> {
    let mut name = String::new();
    let mut choice = false;
    let mut members = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => name = inner.as_str().to_string(),
            Rule::choice_kw => choice = true,
            Rule::group_def => members.push(Member::Group(build_group(inner)?)),
            Rule::segment_ref => members.push(build_segment_ref(inner)?),
            _ => {}
        }
    }
    if name.is_empty() {
        return Err("message: missing name".to_string());
    }
    Ok(MessageSection {
        name,
        choice,
        members,
    })
}

fn build_group(pair: Pair) -> std::result::Result<GroupSection, String> {
    let mut name = String::new();
    let mut cardinality = None;
    let mut choice = false;
    let mut members = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => name = inner.as_str().to_string(),
            Rule::cardinality => cardinality = Some(build_cardinality(inner)?),
            Rule::choice_kw => choice = true,
            Rule::group_def => members.push(Member::Group(build_group(inner)?)),
            Rule::segment_ref => members.push(build_segment_ref(inner)?),
            _ => {}
        }
    }
    Ok(GroupSection {
        cardinality: cardinality.ok_or_else(|| format!("group {}: missing cardinality", name))?,
        name,
        choice,
        members,
    })
}

fn build_segment_ref(pair: Pair) -> std::result::Result<Member, String> {
    let mut it = pair.into_inner();
    let name = it.next().ok_or("segment ref: name")?.as_str().to_string();
    let card = it
        .next()
        .ok_or_else(|| format!("segment ref {}: cardinality", name))?;
    Ok(Member::Segment {
        name,
        cardinality: build_cardinality(card)?,
    })
}

fn build_cardinality(pair: Pair) -> std::result::Result<Cardinality, String> {
    let mut it = pair.into_inner();
    let min = parse_number(it.next().ok_or("cardinality: min")?.as_str())?;
    let max_pair = it.next().ok_or("cardinality: max")?;
    let max = match max_pair.as_rule() {
        Rule::unbounded => None,
        _ => Some(parse_number(max_pair.as_str())?),
    };
    if let Some(m) = max {
        if m < min {
            return Err(format!("cardinality: max {} < min {}", m, min));
        }
    }
    Ok(Cardinality::new(min, max))
}

fn parse_number(s: &str) -> std::result::Result<u32, String> {
    s.parse::<u32>()
        .map_err(|_| format!("Invalid number: {}", s))
}

fn string_value(pair: Pair) -> String {
    pair.into_inner()
        .next()
        .map(|p| p.as_str().to_string())
        .unwrap_or_default()
}
