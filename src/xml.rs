//! # XML Persistence
//!
//! Saves a dataset's schema and current values as an XML document and loads
//! them back.
//!
//! ```xml
//! <persons>
//!   <Structure caption="Structure">
//!     <Field id="0" type="4" typename="INTEGER">ID</Field>
//!     <Field id="1" type="12" typename="VARCHAR">NAME</Field>
//!   </Structure>
//!   <Records caption="Records">
//!     <Record caption="Record">
//!       <Field id="0" type="4" name="ID">1</Field>
//!       <Field id="1" type="12" name="NAME">Anna</Field>
//!     </Record>
//!   </Records>
//! </persons>
//! ```
//!
//! The root element is named by the caller. Element names and the `id`,
//! `type`, `typename` and `name` attributes never change. The [`Language`]
//! passed to save only decides the `caption` attributes, which load ignores,
//! so a document saved in one language loads under any other.
//!
//! Values are stored in their string form; `type="0"` marks a null. Empty
//! values are written as empty elements, so indentation never leaks into
//! them.

use std::path::Path;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::row::Row;
use crate::value::{Value, ValueType};

// =============================================================================
// Language
// =============================================================================

/// Display language for the captions of a saved document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Language {
    #[default]
    English,
    Dutch,
    German,
    French,
}

/// A localizable label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Structure,
    Records,
    Record,
}

impl Language {
    fn caption(self, label: Label) -> &'static str {
        use Label::*;
        use Language::*;
        match (self, label) {
            (English, Structure) => "Structure",
            (English, Records) => "Records",
            (English, Record) => "Record",
            (Dutch, Structure) => "Structuur",
            (Dutch, Records) => "Records",
            (Dutch, Record) => "Record",
            (German, Structure) => "Struktur",
            (German, Records) => "Datensätze",
            (German, Record) => "Datensatz",
            (French, Structure) => "Structure",
            (French, Records) => "Enregistrements",
            (French, Record) => "Enregistrement",
        }
    }
}

const STRUCTURE: &str = "Structure";
const RECORDS: &str = "Records";
const RECORD: &str = "Record";
const FIELD: &str = "Field";

// =============================================================================
// Saving
// =============================================================================

impl Dataset<'_> {
    /// Renders the schema and current values as an XML document.
    pub fn save_xml(&self, root: &str, language: Language) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::Start(BytesStart::new(root)))?;

        let mut structure = BytesStart::new(STRUCTURE);
        structure.push_attribute(("caption", language.caption(Label::Structure)));
        writer.write_event(Event::Start(structure))?;
        for (id, (name, ty)) in self.columns.iter().enumerate() {
            let id = id.to_string();
            let code = ty.code().to_string();
            let mut field = BytesStart::new(FIELD);
            field.push_attribute(("id", id.as_str()));
            field.push_attribute(("type", code.as_str()));
            field.push_attribute(("typename", ty.name()));
            write_field(&mut writer, field, name)?;
        }
        writer.write_event(Event::End(BytesEnd::new(STRUCTURE)))?;

        let mut records = BytesStart::new(RECORDS);
        records.push_attribute(("caption", language.caption(Label::Records)));
        writer.write_event(Event::Start(records))?;
        for (_, row) in self.rows.iter() {
            let mut record = BytesStart::new(RECORD);
            record.push_attribute(("caption", language.caption(Label::Record)));
            writer.write_event(Event::Start(record))?;
            for (id, ((name, _), value)) in self.columns.iter().zip(row.values()).enumerate() {
                let id = id.to_string();
                let code = value.value_type().code().to_string();
                let mut field = BytesStart::new(FIELD);
                field.push_attribute(("id", id.as_str()));
                field.push_attribute(("type", code.as_str()));
                field.push_attribute(("name", name.as_str()));
                write_field(&mut writer, field, &value.to_string())?;
            }
            writer.write_event(Event::End(BytesEnd::new(RECORD)))?;
        }
        writer.write_event(Event::End(BytesEnd::new(RECORDS)))?;
        writer.write_event(Event::End(BytesEnd::new(root)))?;

        String::from_utf8(writer.into_inner()).map_err(|e| Error::InvalidXml(e.to_string()))
    }

    /// Saves the document to a file.
    pub fn save_xml_file(&self, path: impl AsRef<Path>, root: &str, language: Language) -> Result<()> {
        std::fs::write(path, self.save_xml(root, language)?)?;
        Ok(())
    }

    /// Replaces the contents with a document produced by
    /// [`save_xml`](Dataset::save_xml).
    ///
    /// Returns `Ok(false)`, leaving the dataset untouched, when the document
    /// root is not named `root`. Loaded rows count as read from the database.
    pub fn load_xml(&mut self, xml: &str, root: &str, _language: Language) -> Result<bool> {
        let Some(document) = parse_document(xml, root)? else {
            tracing::debug!(dataset = %self.name, root, "document root does not match");
            return Ok(false);
        };

        self.close();
        self.columns = document.columns;
        for values in document.records {
            if values.len() != self.columns.len() {
                let found = values.len();
                self.close();
                return Err(Error::InvalidXml(format!(
                    "record has {found} fields, structure has {}",
                    self.columns.len()
                )));
            }
            self.push_loaded_row(Row::from_values(values));
        }
        self.mark_loaded();
        tracing::debug!(dataset = %self.name, rows = self.rows.len(), "dataset loaded from xml");
        Ok(true)
    }

    /// Loads a document from a file.
    pub fn load_xml_file(&mut self, path: impl AsRef<Path>, root: &str, language: Language) -> Result<bool> {
        let xml = std::fs::read_to_string(path)?;
        self.load_xml(&xml, root, language)
    }
}

fn write_field(writer: &mut Writer<Vec<u8>>, field: BytesStart<'_>, content: &str) -> Result<()> {
    if content.is_empty() {
        writer.write_event(Event::Empty(field))?;
    } else {
        writer.write_event(Event::Start(field))?;
        writer.write_event(Event::Text(BytesText::new(content)))?;
        writer.write_event(Event::End(BytesEnd::new(FIELD)))?;
    }
    Ok(())
}

// =============================================================================
// Loading
// =============================================================================

#[derive(Debug, Default)]
struct Document {
    columns: Vec<(String, ValueType)>,
    records: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Outside,
    Structure,
    Records,
}

/// An open `Field` element.
#[derive(Debug)]
struct OpenField {
    id: usize,
    ty: ValueType,
    text: String,
}

fn parse_document(xml: &str, root: &str) -> Result<Option<Document>> {
    let mut reader = Reader::from_str(xml);
    let mut document = Document::default();
    let mut in_root = false;
    let mut section = Section::Outside;
    let mut record: Option<Vec<Value>> = None;
    let mut field: Option<OpenField> = None;

    loop {
        let event = reader.read_event()?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let empty = matches!(event, Event::Empty(_));
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if !in_root {
                    if name != root {
                        return Ok(None);
                    }
                    if empty {
                        return Ok(Some(document));
                    }
                    in_root = true;
                    continue;
                }
                match name.as_str() {
                    STRUCTURE if !empty => section = Section::Structure,
                    RECORDS if !empty => section = Section::Records,
                    RECORD if section == Section::Records => {
                        if empty {
                            document.records.push(Vec::new());
                        } else {
                            record = Some(Vec::new());
                        }
                    }
                    FIELD => {
                        let (id, ty) = field_attributes(e)?;
                        let open = OpenField {
                            id,
                            ty,
                            text: String::new(),
                        };
                        if empty {
                            finish_field(&mut document, section, record.as_mut(), open)?;
                        } else {
                            field = Some(open);
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(ref t) => {
                if let Some(open) = field.as_mut() {
                    open.text.push_str(&t.unescape()?);
                }
            }
            Event::CData(ref t) => {
                if let Some(open) = field.as_mut() {
                    open.text.push_str(&String::from_utf8_lossy(t));
                }
            }
            Event::End(ref e) => {
                let name = e.name();
                match name.as_ref() {
                    b"Field" => {
                        if let Some(open) = field.take() {
                            finish_field(&mut document, section, record.as_mut(), open)?;
                        }
                    }
                    b"Record" => {
                        if let Some(values) = record.take() {
                            document.records.push(values);
                        }
                    }
                    b"Structure" | b"Records" => section = Section::Outside,
                    other if other == root.as_bytes() => break,
                    _ => {}
                }
            }
            Event::Eof => {
                if !in_root {
                    return Err(Error::InvalidXml("empty document".into()));
                }
                break;
            }
            _ => {}
        }
    }
    Ok(Some(document))
}

fn field_attributes(e: &BytesStart<'_>) -> Result<(usize, ValueType)> {
    let mut id = None;
    let mut ty = None;
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let value = attr.unescape_value()?;
        match attr.key.as_ref() {
            b"id" => {
                id = Some(value.trim().parse::<usize>().map_err(|_| {
                    Error::InvalidXml(format!("field id '{value}' is not a number"))
                })?);
            }
            b"type" => {
                let code = value
                    .trim()
                    .parse::<i32>()
                    .ok()
                    .and_then(ValueType::from_code)
                    .ok_or_else(|| Error::InvalidXml(format!("unknown type code '{value}'")))?;
                ty = Some(code);
            }
            _ => {}
        }
    }
    match (id, ty) {
        (Some(id), Some(ty)) => Ok((id, ty)),
        _ => Err(Error::InvalidXml("field without id or type".into())),
    }
}

fn finish_field(
    document: &mut Document,
    section: Section,
    record: Option<&mut Vec<Value>>,
    field: OpenField,
) -> Result<()> {
    match (section, record) {
        (Section::Structure, _) => {
            if field.id != document.columns.len() {
                return Err(Error::InvalidXml(format!(
                    "structure field {} out of order",
                    field.id
                )));
            }
            document.columns.push((field.text, field.ty));
        }
        (Section::Records, Some(values)) => {
            if field.id != values.len() {
                return Err(Error::InvalidXml(format!("record field {} out of order", field.id)));
            }
            let value = Value::parse(field.ty, &field.text).ok_or_else(|| {
                Error::InvalidXml(format!("'{}' is not a valid {}", field.text, field.ty))
            })?;
            values.push(value);
        }
        _ => return Err(Error::InvalidXml("field outside structure or record".into())),
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
