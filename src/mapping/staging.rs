//! Staging file output
//!
//! Writes vertex records in the loader's CSV layout:
//! `~id,<property:Type>...,~label`, one row per vertex.

use super::VertexRecord;

/// The single CSV file staged for one resource type.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedVertexFile {
    pub resource_type: String,
    pub header: Vec<String>,
    pub records: Vec<VertexRecord>,
}

impl StagedVertexFile {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Render the file. Always ends with a newline; an empty file is just
    /// the header.
    pub fn to_csv(&self) -> String {
        let mut output = String::new();
        push_line(&mut output, self.header.iter().map(|h| h.as_str()));

        for record in &self.records {
            let cells = std::iter::once(record.id.as_str())
                .chain(record.properties.iter().map(|(_, v)| v.as_str()))
                .chain(std::iter::once(record.label.as_str()));
            push_line(&mut output, cells);
        }

        output
    }
}

fn push_line<'a>(output: &mut String, cells: impl Iterator<Item = &'a str>) {
    let line: Vec<String> = cells.map(escape_value).collect();
    output.push_str(&line.join(","));
    output.push('\n');
}

/// Escape a string value for CSV
///
/// Wraps in quotes if the value contains comma, newline, or quote.
/// Doubles any existing quotes.
fn escape_value(s: &str) -> String {
    if s.contains(',') || s.contains('\n') || s.contains('\r') || s.contains('"') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
