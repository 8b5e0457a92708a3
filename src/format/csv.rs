//! CSV output formatter (SPEC_FULL.md §B.8, grounded on
//! `include/geodesk/format/CsvWriter.h` and `FilteredTagWalker.h`).
//!
//! Like the original, this writer takes a fixed [`KeySchema`] up front --
//! one column per requested tag key, plus `id`/`type`/`lon`/`lat` -- rather
//! than discovering columns from the data, since a GOL's tag space is open
//! and a CSV needs a stable column count decided before the first row.

use std::io::{self, Write};

use crate::error::Result;
use crate::feature::Feature;
use crate::tag::TagValue;

/// The fixed set of tag keys a [`CsvWriter`] emits one column per, in the
/// order given (spec grounding: `KeySchema` in `CsvWriter.h`, walked by a
/// `FilteredTagWalker` so only requested keys are ever resolved per row).
#[derive(Debug, Clone)]
pub struct KeySchema {
    keys: Vec<String>,
}

impl KeySchema {
    pub fn new(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        KeySchema { keys: keys.into_iter().map(Into::into).collect() }
    }

    pub fn columns(&self) -> &[String] {
        &self.keys
    }
}

/// Writes features as CSV rows: `id,type,lon,lat` followed by one column
/// per [`KeySchema`] key, in on-disk tag order irrelevant -- each requested
/// key is looked up directly rather than walked.
pub struct CsvWriter<'a, W: Write> {
    out: W,
    schema: &'a KeySchema,
}

impl<'a, W: Write> CsvWriter<'a, W> {
    pub fn new(out: W, schema: &'a KeySchema) -> Self {
        CsvWriter { out, schema }
    }

    pub fn write_header(&mut self) -> io::Result<()> {
        write!(self.out, "id,type,lon,lat")?;
        for key in self.schema.columns() {
            write!(self.out, ",{}", escape(key))?;
        }
        writeln!(self.out)
    }

    pub fn write_feature(&mut self, feature: &Feature) -> io::Result<()> {
        write!(self.out, "{},{}", feature.id(), feature.type_name())?;
        match feature.geometry() {
            Some(crate::filter::Geometry::Point(p)) => write!(self.out, ",{},{}", p.x(), p.y())?,
            _ => write!(self.out, ",,")?,
        }
        for key in self.schema.columns() {
            write!(self.out, ",{}", escape(&render(feature, feature.tag(key))))?;
        }
        writeln!(self.out)
    }

    pub fn write_footer(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn render(feature: &Feature, value: Option<TagValue>) -> String {
    match value {
        None => String::new(),
        Some(TagValue::Num(n)) => n.to_string(),
        Some(TagValue::Str(crate::tag::StrRef::Local(s))) => s.to_string(),
        Some(TagValue::Str(crate::tag::StrRef::Global(code))) => {
            feature.store().get_global_string(code).unwrap_or("").to_string()
        }
    }
}

fn escape(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Writes a full CSV document (header, one row per feature, footer) for a
/// query result stream, stopping at the first error.
pub fn write_csv<W: Write>(out: W, schema: &KeySchema, features: impl Iterator<Item = Result<Feature>>) -> Result<()> {
    let mut writer = CsvWriter::new(out, schema);
    writer.write_header().map_err(io_err)?;
    for feature in features {
        writer.write_feature(&feature?).map_err(io_err)?;
    }
    writer.write_footer().map_err(io_err)
}

fn io_err(e: io::Error) -> crate::error::GeodeskError {
    crate::error::GeodeskError::io("<csv output>", e)
}
