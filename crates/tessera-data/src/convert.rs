//! Tabular (CSV/TSV) to JSON Lines conversion.
//!
//! Rows are streamed one at a time, so input size is bounded only by disk. Each
//! data row becomes one JSON object keyed by the header names, in header order,
//! followed by a newline. Output is written to a temporary file next to the
//! target and renamed into place only once every row has been written.

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tessera_core::{Result, RunConfig, TesseraError};

/// How to handle data rows whose cell count differs from the header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RaggedRows {
    /// Fail the conversion, naming the offending record.
    #[default]
    Reject,
    /// Pad short rows with empty strings and drop surplus cells.
    Pad,
}

/// Outcome of a successful conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionReport {
    /// Source file.
    pub source: PathBuf,
    /// Written artifact.
    pub target: PathBuf,
    /// Number of JSON lines written (header excluded).
    pub rows_written: usize,
}

/// One data row paired with the header names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabularRecord {
    headers: Arc<[String]>,
    values: Vec<String>,
}

impl TabularRecord {
    /// Iterate `(column, value)` pairs in header order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }

    /// Value of a column, if present.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields().find(|(k, _)| *k == column).map(|(_, v)| v)
    }

    /// Convert into a JSON object of string values.
    pub fn into_json(self) -> serde_json::Value {
        let map = self
            .headers
            .iter()
            .cloned()
            .zip(self.values.into_iter().map(serde_json::Value::String))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl Serialize for TabularRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (key, value) in self.fields() {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Streaming iterator over the data rows of a tabular file.
pub struct TabularRecords {
    reader: csv::Reader<File>,
    headers: Arc<[String]>,
    ragged_rows: RaggedRows,
    source: PathBuf,
    buffer: csv::StringRecord,
    rows_read: usize,
}

impl TabularRecords {
    /// Header names in file order.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }
}

impl Iterator for TabularRecords {
    type Item = Result<TabularRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record(&mut self.buffer) {
            Ok(false) => None,
            Ok(true) => {
                self.rows_read += 1;
                let mut values: Vec<String> = self.buffer.iter().map(str::to_string).collect();
                if values.len() != self.headers.len() {
                    if self.ragged_rows == RaggedRows::Reject {
                        return Some(Err(TesseraError::Conversion(format!(
                            "{}: record {} has {} fields, expected {}",
                            self.source.display(),
                            self.rows_read,
                            values.len(),
                            self.headers.len()
                        ))));
                    }
                    tracing::debug!(
                        source = %self.source.display(),
                        expected = self.headers.len(),
                        found = values.len(),
                        "Padding ragged row"
                    );
                    values.resize(self.headers.len(), String::new());
                }
                Some(Ok(TabularRecord {
                    headers: Arc::clone(&self.headers),
                    values,
                }))
            }
            Err(e) => Some(Err(conversion_error(&self.source, e))),
        }
    }
}

/// Converts delimited tabular files into JSON Lines.
#[derive(Debug, Clone, Default)]
pub struct TabularToJsonlConverter {
    delimiter: Option<u8>,
    ragged_rows: RaggedRows,
}

impl TabularToJsonlConverter {
    /// Create a converter that infers the delimiter from the file extension.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed delimiter instead of inferring it.
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = Some(delimiter);
        self
    }

    /// Create a converter with the ragged-row policy a run config asks for.
    ///
    /// The loader and the preprocessing coordinator both build their converter
    /// here, so one run reads and converts tabular sources the same way.
    pub fn for_config(config: &RunConfig) -> Self {
        let ragged_rows = if config.pad_ragged_rows {
            RaggedRows::Pad
        } else {
            RaggedRows::Reject
        };
        Self::new().with_ragged_rows(ragged_rows)
    }

    /// Set the ragged-row policy.
    pub fn with_ragged_rows(mut self, ragged_rows: RaggedRows) -> Self {
        self.ragged_rows = ragged_rows;
        self
    }

    /// Open `source` and validate its header row.
    pub fn records<P: AsRef<Path>>(&self, source: P) -> Result<TabularRecords> {
        let source = source.as_ref();
        let file = File::open(source).map_err(|e| {
            TesseraError::Conversion(format!("cannot open {}: {}", source.display(), e))
        })?;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter.unwrap_or_else(|| delimiter_for(source)))
            .has_headers(true)
            .flexible(self.ragged_rows == RaggedRows::Pad)
            .from_reader(file);

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| conversion_error(source, e))?
            .iter()
            .map(str::to_string)
            .collect();
        validate_headers(source, &headers)?;

        Ok(TabularRecords {
            reader,
            headers: headers.into(),
            ragged_rows: self.ragged_rows,
            source: source.to_path_buf(),
            buffer: csv::StringRecord::new(),
            rows_read: 0,
        })
    }

    /// Convert `source` into a JSON Lines file at `target`.
    ///
    /// Either the complete artifact appears at `target` or nothing does: on
    /// failure the temporary file is discarded and any parent directories this
    /// call created are removed.
    pub fn convert<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        source: P,
        target: Q,
    ) -> Result<ConversionReport> {
        let source = source.as_ref();
        let target = target.as_ref();
        let records = self.records(source)?;

        let created = create_missing_parents(target)?;
        match write_atomically(records, target) {
            Ok(rows_written) => {
                tracing::info!(
                    rows = rows_written,
                    target = %target.display(),
                    "Converted {} to JSON Lines",
                    source.display()
                );
                Ok(ConversionReport {
                    source: source.to_path_buf(),
                    target: target.to_path_buf(),
                    rows_written,
                })
            }
            Err(e) => {
                if let Some(dir) = created {
                    if let Err(cleanup) = fs::remove_dir_all(&dir) {
                        tracing::warn!("Could not remove {}: {}", dir.display(), cleanup);
                    }
                }
                Err(e)
            }
        }
    }
}

/// Artifact location for a converted source: `<prepared_dir>/<stem>.jsonl`.
pub fn artifact_path(prepared_dir: &Path, source: &Path) -> Result<PathBuf> {
    let stem = source.file_stem().ok_or_else(|| {
        TesseraError::Conversion(format!("{} has no file name", source.display()))
    })?;
    let mut name = stem.to_os_string();
    name.push(".jsonl");
    Ok(prepared_dir.join(name))
}

fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
        _ => b',',
    }
}

fn validate_headers(source: &Path, headers: &[String]) -> Result<()> {
    if headers.is_empty() {
        return Err(TesseraError::Conversion(format!(
            "{} has no header row",
            source.display()
        )));
    }
    if let Some(i) = headers.iter().position(|h| h.trim().is_empty()) {
        return Err(TesseraError::Conversion(format!(
            "{}: header column {} is blank",
            source.display(),
            i + 1
        )));
    }
    let mut seen = HashSet::with_capacity(headers.len());
    if let Some(dup) = headers.iter().find(|h| !seen.insert(h.as_str())) {
        return Err(TesseraError::Conversion(format!(
            "{}: duplicate header `{}`",
            source.display(),
            dup
        )));
    }
    Ok(())
}

fn write_atomically(records: TabularRecords, target: &Path) -> Result<usize> {
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let io_error = |e: std::io::Error| {
        TesseraError::Conversion(format!("writing {}: {}", target.display(), e))
    };

    let tmp = tempfile::Builder::new()
        .prefix(".tessera-")
        .suffix(".jsonl.tmp")
        .tempfile_in(dir)
        .map_err(io_error)?;
    let mut writer = BufWriter::new(tmp);

    let mut rows = 0usize;
    for record in records {
        let record = record?;
        serde_json::to_writer(&mut writer, &record)
            .map_err(|e| TesseraError::Conversion(format!("row {}: {}", rows + 1, e)))?;
        writer.write_all(b"\n").map_err(io_error)?;
        rows += 1;
    }

    let tmp = writer.into_inner().map_err(|e| io_error(e.into_error()))?;
    tmp.as_file().sync_all().map_err(io_error)?;
    tmp.persist(target).map_err(|e| io_error(e.error))?;
    Ok(rows)
}

/// Create the missing ancestors of `target`, returning the topmost one created.
fn create_missing_parents(target: &Path) -> Result<Option<PathBuf>> {
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() && !p.exists() => p,
        _ => return Ok(None),
    };
    let mut topmost = parent;
    while let Some(up) = topmost.parent() {
        if up.as_os_str().is_empty() || up.exists() {
            break;
        }
        topmost = up;
    }
    fs::create_dir_all(parent).map_err(|e| {
        TesseraError::Conversion(format!("cannot create {}: {}", parent.display(), e))
    })?;
    Ok(Some(topmost.to_path_buf()))
}

fn conversion_error(source: &Path, err: csv::Error) -> TesseraError {
    TesseraError::Conversion(format!("{}: {}", source.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_prompt_response_example() {
        let dir = TempDir::new().unwrap();
        let source = write(
            &dir,
            "train.csv",
            "prompt,response\nWhat is Rust?,A language.\nSay hi,hi\n",
        );
        let target = dir.path().join("out/train.jsonl");

        let report = TabularToJsonlConverter::new().convert(&source, &target).unwrap();
        assert_eq!(report.rows_written, 2);

        let lines = read_lines(&target);
        assert_eq!(
            lines,
            vec![
                r#"{"prompt":"What is Rust?","response":"A language."}"#,
                r#"{"prompt":"Say hi","response":"hi"}"#,
            ]
        );
    }

    #[test]
    fn test_keys_follow_header_order() {
        let dir = TempDir::new().unwrap();
        let source = write(&dir, "z.csv", "zeta,alpha\n1,2\n");
        let target = dir.path().join("z.jsonl");
        TabularToJsonlConverter::new().convert(&source, &target).unwrap();
        assert_eq!(read_lines(&target), vec![r#"{"zeta":"1","alpha":"2"}"#]);
    }

    #[test]
    fn test_quoted_newlines_stay_on_one_line() {
        let dir = TempDir::new().unwrap();
        let source = write(
            &dir,
            "q.csv",
            "prompt,response\n\"multi\nline, with comma\",\"say \"\"hi\"\"\"\n",
        );
        let target = dir.path().join("q.jsonl");
        TabularToJsonlConverter::new().convert(&source, &target).unwrap();

        let content = fs::read_to_string(&target).unwrap();
        assert_eq!(content.matches('\n').count(), 1);
        assert!(content.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(content.trim_end()).unwrap();
        assert_eq!(value["prompt"], "multi\nline, with comma");
        assert_eq!(value["response"], "say \"hi\"");
    }

    #[test]
    fn test_row_count_and_order_preserved() {
        let dir = TempDir::new().unwrap();
        let mut csv = String::from("id,text\n");
        for i in 0..5000 {
            csv.push_str(&format!("{},row {}\n", i, i));
        }
        let source = write(&dir, "big.csv", &csv);
        let target = dir.path().join("big.jsonl");

        let report = TabularToJsonlConverter::new().convert(&source, &target).unwrap();
        assert_eq!(report.rows_written, 5000);

        let lines = read_lines(&target);
        assert_eq!(lines.len(), 5000);
        for (i, line) in lines.iter().enumerate() {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["id"], i.to_string());
        }
    }

    #[test]
    fn test_output_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let source = write(&dir, "d.csv", "a,b,c\n1,2,3\nx,y,z\n");
        let first = dir.path().join("first.jsonl");
        let second = dir.path().join("second.jsonl");
        let converter = TabularToJsonlConverter::new();

        converter.convert(&source, &first).unwrap();
        converter.convert(&source, &second).unwrap();
        let before = fs::read(&first).unwrap();
        assert_eq!(before, fs::read(&second).unwrap());

        // Re-running onto an existing artifact replaces it with identical bytes.
        converter.convert(&source, &first).unwrap();
        assert_eq!(before, fs::read(&first).unwrap());
    }

    #[test]
    fn test_header_only_yields_empty_file() {
        let dir = TempDir::new().unwrap();
        let source = write(&dir, "h.csv", "prompt,response\n");
        let target = dir.path().join("h.jsonl");
        let report = TabularToJsonlConverter::new().convert(&source, &target).unwrap();
        assert_eq!(report.rows_written, 0);
        assert_eq!(fs::read(&target).unwrap(), b"");
    }

    #[test]
    fn test_empty_file_rejected() {
        let dir = TempDir::new().unwrap();
        let source = write(&dir, "e.csv", "");
        let target = dir.path().join("e.jsonl");
        let err = TabularToJsonlConverter::new().convert(&source, &target).unwrap_err();
        assert!(matches!(err, TesseraError::Conversion(_)));
        assert!(!target.exists());
    }

    #[test]
    fn test_duplicate_header_rejected() {
        let dir = TempDir::new().unwrap();
        let source = write(&dir, "dup.csv", "a,a\n1,2\n");
        let err = TabularToJsonlConverter::new()
            .convert(&source, dir.path().join("dup.jsonl"))
            .unwrap_err();
        assert!(err.to_string().contains("duplicate header"));
    }

    #[test]
    fn test_ragged_row_rejected_atomically() {
        let dir = TempDir::new().unwrap();
        let source = write(&dir, "r.csv", "a,b\n1,2\n3\n4,5\n");
        let target = dir.path().join("nested/deeper/r.jsonl");

        let err = TabularToJsonlConverter::new().convert(&source, &target).unwrap_err();
        assert!(matches!(err, TesseraError::Conversion(_)));
        assert!(!target.exists());
        assert!(!dir.path().join("nested").exists());
    }

    #[test]
    fn test_ragged_row_padded() {
        let dir = TempDir::new().unwrap();
        let source = write(&dir, "p.csv", "a,b\n1\n2,3,4\n");
        let target = dir.path().join("p.jsonl");

        TabularToJsonlConverter::new()
            .with_ragged_rows(RaggedRows::Pad)
            .convert(&source, &target)
            .unwrap();
        assert_eq!(
            read_lines(&target),
            vec![r#"{"a":"1","b":""}"#, r#"{"a":"2","b":"3"}"#]
        );
    }

    #[test]
    fn test_converter_follows_config_policy() {
        let dir = TempDir::new().unwrap();
        let source = write(&dir, "c.csv", "a,b\n1\n");

        let mut config = RunConfig::default();
        assert!(TabularToJsonlConverter::for_config(&config)
            .convert(&source, dir.path().join("strict.jsonl"))
            .is_err());

        config.pad_ragged_rows = true;
        let target = dir.path().join("padded.jsonl");
        TabularToJsonlConverter::for_config(&config)
            .convert(&source, &target)
            .unwrap();
        assert_eq!(read_lines(&target), vec![r#"{"a":"1","b":""}"#]);
    }

    #[test]
    fn test_missing_source_has_no_side_effects() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("new_dir/x.jsonl");
        let err = TabularToJsonlConverter::new()
            .convert(dir.path().join("missing.csv"), &target)
            .unwrap_err();
        assert!(matches!(err, TesseraError::Conversion(_)));
        assert!(!dir.path().join("new_dir").exists());
    }

    #[test]
    fn test_tsv_uses_tab_delimiter() {
        let dir = TempDir::new().unwrap();
        let source = write(&dir, "t.tsv", "prompt\tresponse\nhello, world\tok\n");
        let target = dir.path().join("t.jsonl");
        TabularToJsonlConverter::new().convert(&source, &target).unwrap();
        assert_eq!(
            read_lines(&target),
            vec![r#"{"prompt":"hello, world","response":"ok"}"#]
        );
    }

    #[test]
    fn test_records_iterator() {
        let dir = TempDir::new().unwrap();
        let source = write(&dir, "r.csv", "prompt,response\nq,a\n");
        let mut records = TabularToJsonlConverter::new().records(&source).unwrap();
        assert_eq!(records.headers(), ["prompt", "response"]);
        let record = records.next().unwrap().unwrap();
        assert_eq!(record.get("response"), Some("a"));
        assert!(records.next().is_none());
    }

    #[test]
    fn test_artifact_path_uses_stem() {
        let prepared = Path::new("last_run_prepared");
        assert_eq!(
            artifact_path(prepared, Path::new("data/train.csv")).unwrap(),
            PathBuf::from("last_run_prepared/train.jsonl")
        );
        assert_eq!(
            artifact_path(prepared, Path::new("/abs/rows.v2.csv")).unwrap(),
            PathBuf::from("last_run_prepared/rows.v2.jsonl")
        );
    }
}
