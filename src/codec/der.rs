//! DER sequence primitives.
//!
//! Letro payloads are a universal `SEQUENCE` whose fields carry implicit
//! context-specific tags `[0]`, `[1]`, ... in schema order. Strings and blobs
//! are primitive fields; nested composites are constructed fields holding
//! the nested sequence's content.

use crate::error::CodecError;

const SEQUENCE_TAG: u8 = 0x30;
const CONTEXT_CLASS: u8 = 0x80;
const CONSTRUCTED: u8 = 0x20;
const HIGH_TAG_NUMBER: u8 = 0x1F;
const MAX_LENGTH_OCTETS: usize = 4;

fn malformed(reason: impl Into<String>) -> CodecError {
    CodecError::Malformed(reason.into())
}

// ============================================================================
// LENGTH ENCODING
// ============================================================================

fn write_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let first_non_zero = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    let significant = &bytes[first_non_zero..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}

/// Reads a DER length, rejecting indefinite and non-minimal forms.
/// Returns the length and the number of bytes consumed.
fn read_length(input: &[u8]) -> Result<(usize, usize), CodecError> {
    let first = *input.first().ok_or_else(|| malformed("truncated length"))?;
    if first < 0x80 {
        return Ok((first as usize, 1));
    }
    if first == 0x80 {
        return Err(malformed("indefinite length is not allowed in DER"));
    }
    let count = (first & 0x7F) as usize;
    if count > MAX_LENGTH_OCTETS {
        return Err(malformed(format!("length uses {} octets", count)));
    }
    let octets = input
        .get(1..1 + count)
        .ok_or_else(|| malformed("truncated length"))?;
    if octets[0] == 0 {
        return Err(malformed("non-minimal length encoding"));
    }
    let len = octets.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
    if len < 0x80 {
        return Err(malformed("non-minimal length encoding"));
    }
    Ok((len, 1 + count))
}

/// Splits one TLV off the front of `input`: `(tag, value, rest)`.
fn read_tlv(input: &[u8]) -> Result<(u8, &[u8], &[u8]), CodecError> {
    let tag = *input.first().ok_or_else(|| malformed("empty input"))?;
    if tag & HIGH_TAG_NUMBER == HIGH_TAG_NUMBER {
        return Err(malformed("high tag numbers are not supported"));
    }
    let (len, len_size) = read_length(&input[1..])?;
    let start = 1 + len_size;
    let end = start
        .checked_add(len)
        .filter(|end| *end <= input.len())
        .ok_or_else(|| malformed(format!("value of {} bytes exceeds input", len)))?;
    Ok((tag, &input[start..end], &input[end..]))
}

// ============================================================================
// WRITER
// ============================================================================

/// Builds a sequence of implicitly tagged fields.
#[derive(Debug, Default, Clone)]
pub struct SequenceWriter {
    content: Vec<u8>,
    next_tag: u8,
}

impl SequenceWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_field(&mut self, constructed: bool, value: &[u8]) {
        let mut tag = CONTEXT_CLASS | self.next_tag;
        if constructed {
            tag |= CONSTRUCTED;
        }
        self.content.push(tag);
        write_length(&mut self.content, value.len());
        self.content.extend_from_slice(value);
        self.next_tag += 1;
    }

    pub fn utf8_string(mut self, value: &str) -> Self {
        self.push_field(false, value.as_bytes());
        self
    }

    /// Appends a VisibleString; only printable ASCII (0x20..=0x7E) is allowed.
    pub fn visible_string(mut self, field: &'static str, value: &str) -> Result<Self, CodecError> {
        if let Some(c) = value.chars().find(|c| !is_visible(*c as u32)) {
            return Err(CodecError::InvalidField {
                field,
                reason: format!("character {:?} is not a VisibleString character", c),
            });
        }
        self.push_field(false, value.as_bytes());
        Ok(self)
    }

    pub fn octets(mut self, value: &[u8]) -> Self {
        self.push_field(false, value);
        self
    }

    pub fn sequence(mut self, nested: SequenceWriter) -> Self {
        self.push_field(true, &nested.content);
        self
    }

    pub fn optional_utf8_string(mut self, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.utf8_string(value),
            None => {
                self.next_tag += 1;
                self
            }
        }
    }

    /// Wraps the fields in a universal SEQUENCE.
    pub fn finish(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.content.len() + 6);
        out.push(SEQUENCE_TAG);
        write_length(&mut out, self.content.len());
        out.extend_from_slice(&self.content);
        out
    }
}

fn is_visible(c: u32) -> bool {
    (0x20..=0x7E).contains(&c)
}

// ============================================================================
// READER
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Field<'a> {
    number: u8,
    constructed: bool,
    value: &'a [u8],
}

/// A parsed sequence of implicitly tagged fields.
#[derive(Debug, Clone)]
pub struct TaggedSequence<'a> {
    fields: Vec<Field<'a>>,
}

impl<'a> TaggedSequence<'a> {
    /// Parses a complete DER `SEQUENCE` with at least `min_fields` fields.
    /// Trailing bytes after the sequence are rejected.
    pub fn parse(input: &'a [u8], min_fields: usize) -> Result<Self, CodecError> {
        let (tag, content, rest) = read_tlv(input)?;
        if tag != SEQUENCE_TAG {
            return Err(malformed(format!("expected SEQUENCE, found tag 0x{:02x}", tag)));
        }
        if !rest.is_empty() {
            return Err(malformed(format!("{} trailing bytes after SEQUENCE", rest.len())));
        }
        Self::parse_fields(content, min_fields)
    }

    fn parse_fields(mut content: &'a [u8], min_fields: usize) -> Result<Self, CodecError> {
        let mut fields: Vec<Field<'a>> = Vec::new();
        while !content.is_empty() {
            let (tag, value, rest) = read_tlv(content)?;
            if tag & 0xC0 != CONTEXT_CLASS {
                return Err(malformed(format!(
                    "field tag 0x{:02x} is not context-specific",
                    tag
                )));
            }
            let number = tag & HIGH_TAG_NUMBER;
            if let Some(previous) = fields.last() {
                if number <= previous.number {
                    return Err(malformed(format!(
                        "field [{}] out of order after [{}]",
                        number, previous.number
                    )));
                }
            }
            fields.push(Field {
                number,
                constructed: tag & CONSTRUCTED != 0,
                value,
            });
            content = rest;
        }
        if fields.len() < min_fields {
            return Err(malformed(format!(
                "sequence has {} fields, at least {} required",
                fields.len(),
                min_fields
            )));
        }
        Ok(Self { fields })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn find(&self, number: u8) -> Option<Field<'a>> {
        self.fields.iter().copied().find(|f| f.number == number)
    }

    fn primitive(&self, number: u8) -> Result<Option<&'a [u8]>, CodecError> {
        match self.find(number) {
            None => Ok(None),
            Some(field) if field.constructed => Err(malformed(format!(
                "field [{}] must be primitive",
                number
            ))),
            Some(field) => Ok(Some(field.value)),
        }
    }

    fn required(&self, number: u8) -> Result<&'a [u8], CodecError> {
        self.primitive(number)?
            .ok_or_else(|| malformed(format!("missing field [{}]", number)))
    }

    pub fn utf8_string(&self, number: u8) -> Result<String, CodecError> {
        decode_utf8(number, self.required(number)?)
    }

    pub fn optional_utf8_string(&self, number: u8) -> Result<Option<String>, CodecError> {
        self.primitive(number)?
            .map(|value| decode_utf8(number, value))
            .transpose()
    }

    pub fn visible_string(&self, number: u8) -> Result<String, CodecError> {
        let value = self.required(number)?;
        if let Some(b) = value.iter().find(|b| !is_visible(**b as u32)) {
            return Err(malformed(format!(
                "field [{}] has byte 0x{:02x} outside VisibleString",
                number, b
            )));
        }
        // All bytes are ASCII, so this cannot fail.
        Ok(value.iter().map(|b| *b as char).collect())
    }

    pub fn octets(&self, number: u8) -> Result<Vec<u8>, CodecError> {
        Ok(self.required(number)?.to_vec())
    }

    /// Reads a constructed field as a nested sequence.
    pub fn sequence(&self, number: u8, min_fields: usize) -> Result<TaggedSequence<'a>, CodecError> {
        let field = self
            .find(number)
            .ok_or_else(|| malformed(format!("missing field [{}]", number)))?;
        if !field.constructed {
            return Err(malformed(format!("field [{}] must be constructed", number)));
        }
        Self::parse_fields(field.value, min_fields)
    }
}

fn decode_utf8(number: u8, value: &[u8]) -> Result<String, CodecError> {
    String::from_utf8(value.to_vec())
        .map_err(|_| malformed(format!("field [{}] is not valid UTF-8", number)))
}

// ============================================================================
// TESTS
// ============================================================================
