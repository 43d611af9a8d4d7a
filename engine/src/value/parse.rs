//! Text schema-file loader.
//!
//! Schema files live under the configured scripts directory and hold any
//! number of records:
//!
//! ```text
//! # a comment
//! Position {
//!   x: double
//!   y: double
//!   z: double
//! }
//!
//! Inventory {
//!   label: bytes[16]
//!   slots: array<int>
//!   lookup: map<string, entity>
//! }
//! ```
//!
//! The parser is forgiving about whitespace and accepts fields on the same
//! line as the braces; an unknown tag fails the whole load.

use std::path::Path;

use crate::error::{Error, Result};
use crate::value::schema::{Schema, SchemaBuilder, Tag};

/// A record parsed out of a schema file, not yet registered.
#[derive(Debug)]
pub struct ParsedSchema {
    pub name: String,
    pub builder: SchemaBuilder,
}

/// Parse schema records from `source`.
///
/// Syntax failures log the offending line and return
/// [`Error::Unknown`]; unknown tags return
/// [`Error::IncompatibleDataTypes`].
pub fn parse_schemas(source: &str) -> Result<Vec<ParsedSchema>> {
    let mut records = Vec::new();
    let mut current: Option<(String, SchemaBuilder)> = None;

    for (line_no, raw) in source.lines().enumerate() {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        // Braces may share a line with the record name or a field, so each
        // line is processed as brace-delimited segments.
        for segment in segments(line) {
            match segment {
                Segment::Open(name) => {
                    if current.is_some() || !is_ident(name) {
                        return malformed(line_no, raw);
                    }
                    current = Some((name.to_owned(), SchemaBuilder::new()));
                }
                Segment::Close => {
                    let Some((name, builder)) = current.take() else {
                        return malformed(line_no, raw);
                    };
                    records.push(ParsedSchema { name, builder });
                }
                Segment::Field(text) => match current.take() {
                    Some((name, builder)) => {
                        let builder = parse_field(builder, text, line_no, raw)?;
                        current = Some((name, builder));
                    }
                    None => return malformed(line_no, raw),
                },
            }
        }
    }

    if current.is_some() {
        log::error!("schema source ended inside a record");
        return Err(Error::Unknown);
    }
    Ok(records)
}

enum Segment<'a> {
    /// `name {` - a record opens.
    Open(&'a str),
    /// `}` - the record closes.
    Close,
    /// Anything between braces: a single field declaration.
    Field(&'a str),
}

/// Split one comment-stripped line into brace-delimited segments.
fn segments(line: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = line;
    loop {
        match rest.find(['{', '}']) {
            Some(idx) => {
                let (head, tail) = rest.split_at(idx);
                let head = head.trim();
                if tail.starts_with('{') {
                    out.push(Segment::Open(head));
                } else {
                    if !head.is_empty() {
                        out.push(Segment::Field(head));
                    }
                    out.push(Segment::Close);
                }
                rest = &tail[1..];
            }
            None => {
                let tail = rest.trim();
                if !tail.is_empty() {
                    out.push(Segment::Field(tail));
                }
                return out;
            }
        }
    }
}

/// Load a schema file and register every record it contains.
///
/// Registration is atomic per record: a name collision fails the load after
/// earlier records in the same file have registered, mirroring the
/// fail-fast contract of the parser.
pub fn load_schema_file(path: &Path) -> Result<Vec<Schema>> {
    let source = std::fs::read_to_string(path).map_err(|err| {
        log::error!("failed to read schema file {}: {err}", path.display());
        Error::NotFound
    })?;
    let parsed = parse_schemas(&source)?;
    let mut schemas = Vec::with_capacity(parsed.len());
    for record in parsed {
        schemas.push(Schema::create(record.name, record.builder)?);
    }
    Ok(schemas)
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn malformed<T>(line_no: usize, raw: &str) -> Result<T> {
    log::error!("malformed schema line {}: {raw:?}", line_no + 1);
    Err(Error::Unknown)
}

fn parse_field(
    builder: SchemaBuilder,
    field: &str,
    line_no: usize,
    raw: &str,
) -> Result<SchemaBuilder> {
    // Trailing commas and semicolons are tolerated.
    let field = field.trim_end_matches([',', ';']).trim();
    let Some((key, ty)) = field.split_once(':') else {
        return malformed(line_no, raw);
    };
    let key = key.trim();
    let ty = ty.trim();
    if !is_ident(key) {
        return malformed(line_no, raw);
    }

    if let Some(size) = parse_sized_bytes(ty) {
        return Ok(builder.bytes(key, size?));
    }
    if let Some(elem) = ty.strip_prefix("array<").and_then(|t| t.strip_suffix('>')) {
        return Ok(builder.array(key, parse_scalar_tag(elem.trim())?));
    }
    if let Some(pair) = ty.strip_prefix("map<").and_then(|t| t.strip_suffix('>')) {
        let Some((k, v)) = pair.split_once(',') else {
            return malformed(line_no, raw);
        };
        return Ok(builder.map(key, parse_scalar_tag(k.trim())?, parse_scalar_tag(v.trim())?));
    }
    Ok(builder.scalar(key, parse_scalar_tag(ty)?))
}

fn parse_sized_bytes(ty: &str) -> Option<Result<usize>> {
    let inner = ty.strip_prefix("bytes[")?.strip_suffix(']')?;
    Some(inner.trim().parse::<usize>().map_err(|_| Error::Unknown))
}

fn parse_scalar_tag(name: &str) -> Result<Tag> {
    match name {
        "int" => Ok(Tag::Int),
        "uint" => Ok(Tag::Uint),
        "double" => Ok(Tag::Double),
        "bool" => Ok(Tag::Bool),
        "string" => Ok(Tag::String),
        "ptr" => Ok(Tag::Ptr),
        "entity" => Ok(Tag::Entity),
        other => {
            log::error!("unknown schema tag {other:?}");
            Err(Error::IncompatibleDataTypes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_records() {
        let source = r"
            # particles and their emitter
            Particle {
              x: double
              y: double
              ttl: int
            }

            Emitter {
              rate: double
            }
        ";

        let records = parse_schemas(source).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "Particle");
        assert_eq!(records[0].builder.len(), 3);
        assert_eq!(records[1].name, "Emitter");
        assert_eq!(records[1].builder.len(), 1);
    }

    #[test]
    fn parses_sized_and_container_fields() {
        let source = "
            Inventory {
              label: bytes[16]
              slots: array<int>
              lookup: map<string, entity>
            }
        ";

        let records = parse_schemas(source).unwrap();
        let schema = Schema::create("parse_test_inventory", records.into_iter().next().unwrap().builder)
            .unwrap();

        assert_eq!(schema.field(0).unwrap().tag(), Tag::Bytes);
        assert_eq!(schema.field(0).unwrap().size(), 16);
        assert_eq!(schema.field(1).unwrap().element(), Some(Tag::Int));
        assert_eq!(schema.field(2).unwrap().value_element(), Some(Tag::Entity));
    }

    #[test]
    fn tolerates_dense_whitespace_and_inline_braces() {
        let source = "Vec2 {   x: double\n  y: double }";

        let records = parse_schemas(source).unwrap();
        assert_eq!(records[0].name, "Vec2");
        assert_eq!(records[0].builder.len(), 2);
    }

    #[test]
    fn comments_can_trail_fields() {
        let source = "
            Health {
              current: int # starts at max
              max: int
            }
        ";

        let records = parse_schemas(source).unwrap();
        assert_eq!(records[0].builder.len(), 2);
    }

    #[test]
    fn unknown_tag_fails_the_load() {
        let source = "Broken { field: quaternion }";
        assert_eq!(parse_schemas(source).err(), Some(Error::IncompatibleDataTypes));
    }

    #[test]
    fn unterminated_record_fails() {
        let source = "Broken {\n  field: int\n";
        assert_eq!(parse_schemas(source).err(), Some(Error::Unknown));
    }

    #[test]
    fn field_outside_record_fails() {
        let source = "x: double";
        assert_eq!(parse_schemas(source).err(), Some(Error::Unknown));
    }
}
