use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// A CSV table held in memory. Empty cells are `None`, which is how the
/// pipeline tells "never attempted" apart from a recorded value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    headers: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl Dataset {
    pub fn new(headers: Vec<String>) -> Self {
        Self { headers, rows: Vec::new() }
    }

    pub fn read_csv(path: &Path) -> Result<Self> {
        let file = fs::File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
        Self::from_reader(file).with_context(|| format!("cannot parse {}", path.display()))
    }

    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let body = bytes.strip_prefix(BOM).unwrap_or(&bytes);

        let mut csv = csv::ReaderBuilder::new().has_headers(true).from_reader(body);
        let headers: Vec<String> = csv.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for (i, record) in csv.records().enumerate() {
            let record = record.with_context(|| format!("bad record at row {}", i + 1))?;
            rows.push(
                record
                    .iter()
                    .map(|cell| if cell.is_empty() { None } else { Some(cell.to_string()) })
                    .collect(),
            );
        }
        Ok(Self { headers, rows })
    }

    /// Writes UTF-8 with a BOM so spreadsheet tools pick the right encoding.
    pub fn to_writer<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(BOM)?;
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(&self.headers)?;
        for row in &self.rows {
            csv.write_record(row.iter().map(|c| c.as_deref().unwrap_or("")))?;
        }
        csv.flush()?;
        Ok(())
    }

    /// Replaces `path` atomically: the table goes to a sibling temp file
    /// which is then renamed over the target.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        let tmp = temp_path(path);
        let file = fs::File::create(&tmp).with_context(|| format!("cannot create {}", tmp.display()))?;
        let result = self
            .to_writer(std::io::BufWriter::new(file))
            .and_then(|_| fs::rename(&tmp, path).map_err(Into::into));
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result.with_context(|| format!("cannot write {}", path.display()))
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Index of `name`, appending it as an all-empty column if absent.
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.column_index(name) {
            return idx;
        }
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.push(None);
        }
        self.headers.len() - 1
    }

    pub fn push_row(&mut self, cells: Vec<Option<String>>) -> Result<()> {
        if cells.len() != self.headers.len() {
            bail!("row has {} cells, table has {} columns", cells.len(), self.headers.len());
        }
        self.rows.push(cells);
        Ok(())
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.get(column)?.as_deref()
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        self.cell(row, self.column_index(column)?)
    }

    pub fn set(&mut self, row: usize, column: usize, value: String) -> Result<()> {
        let width = self.headers.len();
        let cells = self
            .rows
            .get_mut(row)
            .with_context(|| format!("row {} out of range", row))?;
        let slot = cells
            .get_mut(column)
            .with_context(|| format!("column {} out of range ({} columns)", column, width))?;
        *slot = Some(value);
        Ok(())
    }

    /// Every cell of one column, top to bottom. Empty for an unknown column.
    pub fn column(&self, name: &str) -> impl Iterator<Item = Option<&str>> + '_ {
        let idx = self.column_index(name);
        self.rows
            .iter()
            .filter(move |_| idx.is_some())
            .map(move |row| idx.and_then(|i| row.get(i)?.as_deref()))
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        let mut d = Dataset::new(vec!["url".into(), "label".into()]);
        d.push_row(vec![Some("http://a.test/".into()), Some("1".into())]).unwrap();
        d.push_row(vec![Some("http://b.test/?q=x,y".into()), None]).unwrap();
        d
    }

    #[test]
    fn reads_with_and_without_bom() {
        let plain = Dataset::from_reader("url,label\nhttp://a.test/,1\n".as_bytes()).unwrap();
        let bom = Dataset::from_reader("\u{feff}url,label\nhttp://a.test/,1\n".as_bytes()).unwrap();
        assert_eq!(plain, bom);
        assert_eq!(bom.headers(), &["url".to_string(), "label".to_string()]);
        assert_eq!(bom.get(0, "label"), Some("1"));
    }

    #[test]
    fn empty_cells_are_none() {
        let d = Dataset::from_reader("url,fetch_status\nhttp://a.test/,\n".as_bytes()).unwrap();
        assert_eq!(d.get(0, "fetch_status"), None);
        assert_eq!(d.get(0, "url"), Some("http://a.test/"));
    }

    #[test]
    fn written_file_starts_with_bom_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let d = sample();
        d.write_csv(&path).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(BOM));
        assert_eq!(Dataset::read_csv(&path).unwrap(), d);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn ensure_column_appends_once() {
        let mut d = sample();
        let idx = d.ensure_column("fetch_status");
        assert_eq!(idx, 2);
        assert_eq!(d.ensure_column("fetch_status"), 2);
        assert_eq!(d.column("fetch_status").collect::<Vec<_>>(), vec![None, None]);
        d.set(1, idx, "OK".into()).unwrap();
        assert_eq!(d.get(1, "fetch_status"), Some("OK"));
    }

    #[test]
    fn set_out_of_range_fails() {
        let mut d = sample();
        assert!(d.set(5, 0, "x".into()).is_err());
        assert!(d.set(0, 9, "x".into()).is_err());
        assert!(d.push_row(vec![None]).is_err());
    }

    #[test]
    fn ragged_rows_are_rejected() {
        assert!(Dataset::from_reader("a,b\n1,2,3\n".as_bytes()).is_err());
    }

    #[test]
    fn unknown_column_is_empty() {
        assert_eq!(sample().column("nope").count(), 0);
    }
}
