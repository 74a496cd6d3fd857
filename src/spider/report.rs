use crate::spider::crawler::PageRecord;
use crate::spider::error::SpiderError;
use log::info;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Write records as a pretty JSON array to `writer`
pub fn write_json<W: Write>(records: &[PageRecord], writer: W) -> Result<(), SpiderError> {
    let mut writer = BufWriter::new(writer);
    serde_json::to_writer_pretty(&mut writer, records)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// Save the report to `path`, or to stdout when the path is `-`
pub fn save_report(records: &[PageRecord], path: &str) -> Result<(), SpiderError> {
    if path == "-" {
        return write_json(records, io::stdout().lock());
    }

    let path = Path::new(path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(path)?;
    write_json(records, file)?;

    info!("Saved {} records to {}", records.len(), path.display());
    Ok(())
}

/// Broken records only, keeping the input order
pub fn broken_pages(records: &[PageRecord]) -> impl Iterator<Item = &PageRecord> {
    records.iter().filter(|record| record.broken)
}
