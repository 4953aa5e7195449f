use crate::melt::group::Sheets;
use crate::melt::table::Table;
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Worksheet names are capped at this many characters
pub const MAX_SHEET_NAME_LEN: usize = 31;

static INVALID_SHEET_CHARS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\[\]:*?/\\]").unwrap()
});

/// Make a label usable as a worksheet (and file) name
pub fn sanitize_sheet_name(label: &str) -> String {
    let cleaned = INVALID_SHEET_CHARS.replace_all(label, "_");
    let truncated: String = cleaned.chars().take(MAX_SHEET_NAME_LEN).collect();
    if truncated.is_empty() {
        String::from("Sheet")
    } else {
        truncated
    }
}

/// Writes each sheet to its own JSON Lines file: a header line, then one array per row
pub struct SheetWriter {
    output_dir: PathBuf,
    used_names: HashSet<String>,
}

impl SheetWriter {
    /// Create a writer targeting `output_dir`, creating it if needed
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Result<Self> {
        std::fs::create_dir_all(&output_dir)
            .context("Failed to create output directory")?;

        Ok(SheetWriter {
            output_dir: output_dir.as_ref().to_path_buf(),
            used_names: HashSet::new(),
        })
    }

    /// Write all sheets, returning the files created in sheet order
    pub fn write_sheets(&mut self, sheets: &Sheets) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(sheets.len());
        for (label, records) in sheets.iter() {
            let name = self.unique_name(label);
            let path = self.output_dir.join(format!("{}.jsonl", name));
            let table = Table::from_records(records);
            write_table(&path, &table)?;
            tracing::debug!(sheet = %name, rows = table.rows.len(), "wrote sheet");
            written.push(path);
        }
        Ok(written)
    }

    /// Sanitized name, suffixed with a counter when already taken
    fn unique_name(&mut self, label: &str) -> String {
        let base = sanitize_sheet_name(label);
        let mut candidate = base.clone();
        let mut n = 2;
        while !self.used_names.insert(candidate.to_lowercase()) {
            let suffix = format!("_{}", n);
            let keep = MAX_SHEET_NAME_LEN.saturating_sub(suffix.chars().count());
            candidate = base.chars().take(keep).collect::<String>() + &suffix;
            n += 1;
        }
        candidate
    }
}

fn write_table(path: &Path, table: &Table) -> Result<()> {
    let file = File::create(path)
        .context(format!("Failed to create file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    let header = serde_json::to_string(&json!({ "columns": table.columns }))
        .context("Failed to serialize header")?;
    writeln!(writer, "{}", header).context("Failed to write header")?;

    for row in &table.rows {
        let line = serde_json::to_string(row).context("Failed to serialize row")?;
        writeln!(writer, "{}", line).context("Failed to write row")?;
    }

    writer.flush().context("Failed to flush sheet")
}

/// Writes every flat record to a single stream, tagged with its sheet label
pub struct StreamWriter<W: Write> {
    writer: W,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(writer: W) -> Self {
        StreamWriter { writer }
    }

    pub fn write_sheets(&mut self, sheets: &Sheets) -> Result<()> {
        for (label, records) in sheets.iter() {
            for record in records {
                let mut data = record.clone();
                data.insert("_sheet".to_string(), Value::String(label.to_string()));

                let line = serde_json::to_string(&data)
                    .context("Failed to serialize record")?;
                writeln!(self.writer, "{}", line)
                    .context("Failed to write record")?;
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush writer")
    }
}
