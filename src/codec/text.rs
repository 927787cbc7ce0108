// src/codec/text.rs
//
// Text form of records:
//   x,y            <- header row, one column name per field
//   7,1.5          <- one line per record, values in header order
//
// Integers are decimal. Floats use the shortest representation that parses
// back to the same value; NaNs other than the canonical one are written as
// their raw bits (0x7fc00001) so the payload survives bit for bit. Byte
// arrays are lowercase hex.

use byteorder::{ByteOrder, LittleEndian as LE};
use std::fmt::Display;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use super::{CodecError, FieldLayoutTable, FieldSpec, FieldType, RecordLayout, DELIMITER};
use crate::record::Record;

// ============================================================================
// Record <-> line
// ============================================================================

/// Render one record as a text line (no trailing newline). The record may
/// be a fragment or a heartbeat: fields outside the window it carries,
/// `[offset, offset + size)`, render as zero.
pub fn to_text(record: &Record, table: &FieldLayoutTable) -> Result<String, CodecError> {
    let layout = table
        .get(record.kind())
        .ok_or(CodecError::UnknownKind(record.kind()))?;

    let image = layout_image(record, layout.size);
    let values: Vec<String> = layout
        .fields
        .iter()
        .map(|field| format_value(field.field_type, &image[field.range()]))
        .collect();
    Ok(values.join(&DELIMITER.to_string()))
}

/// Zeroed layout-sized buffer with the record's payload copied in at its
/// offset. Bytes past the layout are dropped.
fn layout_image(record: &Record, size: usize) -> Vec<u8> {
    let mut image = vec![0u8; size];
    let start = record.offset() as usize;
    if start < size {
        let len = record.payload().len().min(size - start);
        image[start..start + len].copy_from_slice(&record.payload()[..len]);
    }
    image
}

/// Parse one text line into a record of `kind`. `headers` names the column
/// of each value; layout fields missing from it stay zero and columns the
/// layout does not know are ignored.
pub fn from_text<S: AsRef<str>>(
    line: &str,
    headers: &[S],
    kind: u32,
    table: &FieldLayoutTable,
) -> Result<Record, CodecError> {
    let layout = table.get(kind).ok_or(CodecError::UnknownKind(kind))?;

    let values: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(DELIMITER).collect();
    if values.len() != headers.len() {
        return Err(CodecError::ColumnCount {
            expected: headers.len(),
            found: values.len(),
        });
    }

    let mut payload = vec![0u8; layout.size];
    for (header, value) in headers.iter().zip(values) {
        if let Some(field) = layout.field(header.as_ref().trim()) {
            parse_value(field, value.trim(), &mut payload[field.range()])?;
        }
    }
    Ok(Record::new(kind, 0, payload)?)
}

fn format_value(field_type: FieldType, bytes: &[u8]) -> String {
    match field_type {
        FieldType::I8 => (bytes[0] as i8).to_string(),
        FieldType::U8 => bytes[0].to_string(),
        FieldType::I16 => LE::read_i16(bytes).to_string(),
        FieldType::U16 => LE::read_u16(bytes).to_string(),
        FieldType::I32 => LE::read_i32(bytes).to_string(),
        FieldType::U32 => LE::read_u32(bytes).to_string(),
        FieldType::I64 => LE::read_i64(bytes).to_string(),
        FieldType::U64 => LE::read_u64(bytes).to_string(),
        FieldType::F32 => {
            let bits = LE::read_u32(bytes);
            let value = f32::from_bits(bits);
            if value.is_nan() && bits != f32::NAN.to_bits() {
                format!("0x{:08x}", bits)
            } else {
                value.to_string()
            }
        }
        FieldType::F64 => {
            let bits = LE::read_u64(bytes);
            let value = f64::from_bits(bits);
            if value.is_nan() && bits != f64::NAN.to_bits() {
                format!("0x{:016x}", bits)
            } else {
                value.to_string()
            }
        }
        FieldType::Bytes => hex::encode(bytes),
    }
}

fn parse_value(field: &FieldSpec, value: &str, out: &mut [u8]) -> Result<(), CodecError> {
    match field.field_type {
        FieldType::I8 => out[0] = parse_number::<i8>(field, value)? as u8,
        FieldType::U8 => out[0] = parse_number::<u8>(field, value)?,
        FieldType::I16 => LE::write_i16(out, parse_number(field, value)?),
        FieldType::U16 => LE::write_u16(out, parse_number(field, value)?),
        FieldType::I32 => LE::write_i32(out, parse_number(field, value)?),
        FieldType::U32 => LE::write_u32(out, parse_number(field, value)?),
        FieldType::I64 => LE::write_i64(out, parse_number(field, value)?),
        FieldType::U64 => LE::write_u64(out, parse_number(field, value)?),
        FieldType::F32 => {
            let bits = match raw_bits(value) {
                Some(hex) => u32::from_str_radix(hex, 16)
                    .map_err(|e| parse_error(field, value, e))?,
                None => parse_number::<f32>(field, value)?.to_bits(),
            };
            LE::write_u32(out, bits);
        }
        FieldType::F64 => {
            let bits = match raw_bits(value) {
                Some(hex) => u64::from_str_radix(hex, 16)
                    .map_err(|e| parse_error(field, value, e))?,
                None => parse_number::<f64>(field, value)?.to_bits(),
            };
            LE::write_u64(out, bits);
        }
        FieldType::Bytes => {
            let bytes = hex::decode(value).map_err(|e| parse_error(field, value, e))?;
            if bytes.len() != out.len() {
                return Err(parse_error(
                    field,
                    value,
                    format!("expected {} bytes, found {}", out.len(), bytes.len()),
                ));
            }
            out.copy_from_slice(&bytes);
        }
    }
    Ok(())
}

fn raw_bits(value: &str) -> Option<&str> {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
}

fn parse_number<T>(field: &FieldSpec, value: &str) -> Result<T, CodecError>
where
    T: FromStr,
    T::Err: Display,
{
    value.parse::<T>().map_err(|e| parse_error(field, value, e))
}

fn parse_error(field: &FieldSpec, value: &str, reason: impl Display) -> CodecError {
    CodecError::ParseError {
        column: field.name.clone(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

// ============================================================================
// Header row
// ============================================================================

/// Header line for every field of `layout`, in table order.
pub fn header_row(layout: &RecordLayout) -> String {
    layout.columns().join(&DELIMITER.to_string())
}

pub fn write_header_row<W: Write, S: AsRef<str>>(
    out: &mut W,
    columns: &[S],
) -> Result<(), CodecError> {
    let names: Vec<&str> = columns.iter().map(AsRef::as_ref).collect();
    writeln!(out, "{}", names.join(&DELIMITER.to_string()))?;
    Ok(())
}

/// Read the column names from the first line of a text source.
pub fn read_header_row<R: BufRead>(input: &mut R) -> Result<Vec<String>, CodecError> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(CodecError::MissingHeader);
    }
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Err(CodecError::MissingHeader);
    }
    Ok(line
        .split(DELIMITER)
        .map(|name| name.trim().to_string())
        .collect())
}

// ============================================================================
// Text log files
// ============================================================================

/// Writes records of one kind as a self-describing text file.
pub struct TextLogWriter<'t, W: Write> {
    out: W,
    kind: u32,
    table: &'t FieldLayoutTable,
    records_written: u64,
}

impl<'t> TextLogWriter<'t, BufWriter<File>> {
    pub fn create(path: &Path, kind: u32, table: &'t FieldLayoutTable) -> Result<Self, CodecError> {
        let file = File::create(path)?;
        let writer = Self::new(BufWriter::new(file), kind, table)?;
        tlog!("[text] Writing kind {} records to {}", kind, path.display());
        Ok(writer)
    }
}

impl<'t, W: Write> TextLogWriter<'t, W> {
    /// Start a text log; the header row is written immediately.
    pub fn new(mut out: W, kind: u32, table: &'t FieldLayoutTable) -> Result<Self, CodecError> {
        let layout = table.get(kind).ok_or(CodecError::UnknownKind(kind))?;
        write_header_row(&mut out, &layout.columns())?;
        Ok(Self {
            out,
            kind,
            table,
            records_written: 0,
        })
    }

    pub fn write_record(&mut self, record: &Record) -> Result<(), CodecError> {
        if record.kind() != self.kind {
            return Err(CodecError::WrongKind {
                expected: self.kind,
                found: record.kind(),
            });
        }
        let line = to_text(record, self.table)?;
        writeln!(self.out, "{}", line)?;
        self.records_written += 1;
        Ok(())
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Flush and hand back the underlying writer.
    pub fn finish(mut self) -> Result<W, CodecError> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Reads a text log back into records. Yields one `Result` per data line,
/// so a bad line is reported (with its line number) and the next one is
/// still read. Blank lines are skipped.
pub struct TextLogReader<'t, R: BufRead> {
    input: R,
    headers: Vec<String>,
    kind: u32,
    table: &'t FieldLayoutTable,
    line_no: usize,
    done: bool,
}

impl<'t> TextLogReader<'t, BufReader<File>> {
    pub fn open(path: &Path, kind: u32, table: &'t FieldLayoutTable) -> Result<Self, CodecError> {
        Self::new(BufReader::new(File::open(path)?), kind, table)
    }
}

impl<'t, R: BufRead> TextLogReader<'t, R> {
    pub fn new(mut input: R, kind: u32, table: &'t FieldLayoutTable) -> Result<Self, CodecError> {
        if table.get(kind).is_none() {
            return Err(CodecError::UnknownKind(kind));
        }
        let headers = read_header_row(&mut input)?;
        Ok(Self {
            input,
            headers,
            kind,
            table,
            line_no: 1,
            done: false,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }
}

impl<R: BufRead> Iterator for TextLogReader<'_, R> {
    type Item = Result<Record, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        while !self.done {
            line.clear();
            match self.input.read_line(&mut line) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    self.line_no += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let parsed = from_text(&line, &self.headers, self.kind, self.table);
                    return Some(parsed.map_err(|e| CodecError::AtLine {
                        line: self.line_no,
                        source: Box::new(e),
                    }));
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(CodecError::Io(e)));
                }
            }
        }
        None
    }
}
