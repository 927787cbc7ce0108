// src/codec/layout.rs
//
// Field layout table: for each record kind, the named fields of its payload
// with their byte offset and scalar type. Loaded from TOML or JSON:
//
//   [[layout]]
//   kind = 5
//   name = "point"
//   fields = [
//       { name = "x", type = "i32" },
//       { name = "y", type = "f32", offset = 4 },
//       { name = "id", type = "bytes", len = 6 },
//   ]
//
// A field without an offset is packed directly after the previous one.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::record::MAX_BODY_SIZE;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("kind {0} is registered twice")]
    DuplicateKind(u32),

    #[error("kind {kind}: field '{name}' appears twice")]
    DuplicateField { kind: u32, name: String },

    #[error("kind {kind}: invalid field name '{name}'")]
    InvalidFieldName { kind: u32, name: String },

    #[error("kind {kind}: field '{field}' overlaps an earlier field")]
    Overlap { kind: u32, field: String },

    #[error("kind {kind}: bytes field '{field}' needs a non-zero len")]
    MissingLength { kind: u32, field: String },

    #[error("kind {0}: layout has no fields")]
    NoFields(u32),

    #[error("kind {kind}: layout spans {size} bytes, more than the {max} byte body limit")]
    TooLarge { kind: u32, size: usize, max: usize },

    #[error("failed to read layout file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML layout: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid JSON layout: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Field types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    /// Opaque byte array, written as lowercase hex
    Bytes,
}

impl FieldType {
    /// Width in bytes of a scalar type; `None` for `Bytes`, whose width
    /// comes from the field's `len`.
    pub fn scalar_width(self) -> Option<usize> {
        match self {
            FieldType::I8 | FieldType::U8 => Some(1),
            FieldType::I16 | FieldType::U16 => Some(2),
            FieldType::I32 | FieldType::U32 | FieldType::F32 => Some(4),
            FieldType::I64 | FieldType::U64 | FieldType::F64 => Some(8),
            FieldType::Bytes => None,
        }
    }
}

/// One named field inside a record payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub name: String,
    pub offset: usize,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub width: usize,
}

impl FieldSpec {
    pub fn scalar(name: &str, offset: usize, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            offset,
            field_type,
            width: field_type.scalar_width().unwrap_or(0),
        }
    }

    pub fn bytes(name: &str, offset: usize, len: usize) -> Self {
        Self {
            name: name.to_string(),
            offset,
            field_type: FieldType::Bytes,
            width: len,
        }
    }

    /// One past the last byte. Saturates; `RecordLayout::new` rejects
    /// fields this far out.
    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.width)
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.end()
    }
}

/// Field list for one record kind. `size` is the payload span the fields
/// cover; bytes a record does not carry render as zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordLayout {
    pub kind: u32,
    pub name: String,
    pub size: usize,
    pub fields: Vec<FieldSpec>,
}

impl RecordLayout {
    /// Validate a field list and compute the layout size.
    pub fn new(kind: u32, name: &str, fields: Vec<FieldSpec>) -> Result<Self, LayoutError> {
        // An empty header row cannot be told apart from a one-column one
        if fields.is_empty() {
            return Err(LayoutError::NoFields(kind));
        }

        for (i, field) in fields.iter().enumerate() {
            if !is_valid_field_name(&field.name) {
                return Err(LayoutError::InvalidFieldName {
                    kind,
                    name: field.name.clone(),
                });
            }
            if field.field_type == FieldType::Bytes && field.width == 0 {
                return Err(LayoutError::MissingLength {
                    kind,
                    field: field.name.clone(),
                });
            }

            match field.offset.checked_add(field.width) {
                Some(end) if end <= MAX_BODY_SIZE => {}
                _ => {
                    return Err(LayoutError::TooLarge {
                        kind,
                        size: field.end(),
                        max: MAX_BODY_SIZE,
                    })
                }
            }

            for earlier in &fields[..i] {
                if earlier.name == field.name {
                    return Err(LayoutError::DuplicateField {
                        kind,
                        name: field.name.clone(),
                    });
                }
                // Overlapping fields would make the text form ambiguous
                if field.offset < earlier.end() && earlier.offset < field.end() {
                    return Err(LayoutError::Overlap {
                        kind,
                        field: field.name.clone(),
                    });
                }
            }
        }

        let size = fields.iter().map(FieldSpec::end).max().unwrap_or(0);

        Ok(Self {
            kind,
            name: name.to_string(),
            size,
            fields,
        })
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Column names in table order.
    pub fn columns(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

/// Names end up as header-row columns, so they cannot carry the delimiter
/// or line breaks.
fn is_valid_field_name(name: &str) -> bool {
    !name.trim().is_empty() && !name.contains([',', '\n', '\r'])
}

// ============================================================================
// Table
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldLayoutTable {
    layouts: BTreeMap<u32, RecordLayout>,
}

impl FieldLayoutTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, layout: RecordLayout) -> Result<(), LayoutError> {
        if self.layouts.contains_key(&layout.kind) {
            return Err(LayoutError::DuplicateKind(layout.kind));
        }
        self.layouts.insert(layout.kind, layout);
        Ok(())
    }

    pub fn get(&self, kind: u32) -> Option<&RecordLayout> {
        self.layouts.get(&kind)
    }

    pub fn columns(&self, kind: u32) -> Option<Vec<&str>> {
        self.get(kind).map(RecordLayout::columns)
    }

    pub fn kinds(&self) -> impl Iterator<Item = u32> + '_ {
        self.layouts.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    pub fn from_toml_str(text: &str) -> Result<Self, LayoutError> {
        let doc: LayoutDocument = toml::from_str(text)?;
        Self::from_document(doc)
    }

    pub fn from_json_str(text: &str) -> Result<Self, LayoutError> {
        let doc: LayoutDocument = serde_json::from_str(text)?;
        Self::from_document(doc)
    }

    /// Load a table from disk; `.json` files are parsed as JSON, anything
    /// else as TOML.
    pub fn load(path: &Path) -> Result<Self, LayoutError> {
        let text = std::fs::read_to_string(path)?;
        let table = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::from_json_str(&text)?,
            _ => Self::from_toml_str(&text)?,
        };
        tlog!(
            "[text] Loaded {} record layout(s) from {}",
            table.len(),
            path.display()
        );
        Ok(table)
    }

    fn from_document(doc: LayoutDocument) -> Result<Self, LayoutError> {
        let mut table = Self::new();
        for def in doc.layout {
            table.register(def.into_layout()?)?;
        }
        Ok(table)
    }
}

#[derive(Deserialize)]
struct LayoutDocument {
    #[serde(default)]
    layout: Vec<LayoutDef>,
}

#[derive(Deserialize)]
struct LayoutDef {
    kind: u32,
    #[serde(default)]
    name: String,
    #[serde(default)]
    fields: Vec<FieldDef>,
}

#[derive(Deserialize)]
struct FieldDef {
    name: String,
    #[serde(rename = "type")]
    field_type: FieldType,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    len: Option<usize>,
}

impl LayoutDef {
    fn into_layout(self) -> Result<RecordLayout, LayoutError> {
        let mut next_offset = 0;
        let mut fields = Vec::with_capacity(self.fields.len());
        for def in self.fields {
            let offset = def.offset.unwrap_or(next_offset);
            let field = match def.field_type {
                FieldType::Bytes => FieldSpec::bytes(&def.name, offset, def.len.unwrap_or(0)),
                ty => FieldSpec::scalar(&def.name, offset, ty),
            };
            next_offset = field.end();
            fields.push(field);
        }
        RecordLayout::new(self.kind, &self.name, fields)
    }
}

// ============================================================================
// Process-wide table
// ============================================================================

static GLOBAL_TABLE: OnceCell<FieldLayoutTable> = OnceCell::new();

/// Install the process-wide table. It can be set once; a second call hands
/// the rejected table back.
pub fn install_global(table: FieldLayoutTable) -> Result<(), FieldLayoutTable> {
    GLOBAL_TABLE.set(table)
}

pub fn global() -> Option<&'static FieldLayoutTable> {
    GLOBAL_TABLE.get()
}
