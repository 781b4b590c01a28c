//! Posterior table and its CSV checkpoint.
//!
//! Rows are `(lnprob, parameters..., derived...)` and are collected in an
//! arrow fixed-size-list builder. After every sampler iteration the whole
//! table is written to a sibling temporary file which then replaces the
//! checkpoint, so the file on disk is always a complete snapshot. A run that
//! finds an existing checkpoint resumes from it and keeps appending to it.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use arrow::array::{Array, ArrayBuilder, AsArray, FixedSizeListBuilder, PrimitiveBuilder};
use arrow::datatypes::Float64Type;
use itertools::Itertools;
use tracing::debug;

use crate::error::{Error, Result};

/// Append-only table of posterior samples with a fixed column schema.
pub struct PosteriorTable {
    columns: Vec<String>,
    rows: FixedSizeListBuilder<PrimitiveBuilder<Float64Type>>,
    source: Option<PathBuf>,
}

impl std::fmt::Debug for PosteriorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PosteriorTable")
            .field("columns", &self.columns)
            .field("rows", &self.len())
            .field("source", &self.source)
            .finish()
    }
}

impl PosteriorTable {
    pub fn new(columns: Vec<String>) -> Self {
        let rows = FixedSizeListBuilder::new(PrimitiveBuilder::new(), columns.len() as _);
        Self {
            columns,
            rows,
            source: None,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        ArrayBuilder::len(&self.rows)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The checkpoint this table was read from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn append_row(&mut self, row: &[f64]) -> Result<()> {
        if row.len() != self.width() {
            return Err(Error::Evaluation(format!(
                "posterior row has {} values, the table {} columns",
                row.len(),
                self.width()
            )));
        }
        self.rows.values().append_slice(row);
        self.rows.append(true);
        Ok(())
    }

    /// Append a walker's state, padding missing derived values with NaN.
    pub fn append_sample(&mut self, log_prob: f64, position: &[f64], derived: &[f64]) -> Result<()> {
        let derived_width = self
            .width()
            .checked_sub(1 + position.len())
            .ok_or_else(|| {
                Error::Evaluation(format!(
                    "{} parameters do not fit a table of {} columns",
                    position.len(),
                    self.width()
                ))
            })?;
        if derived.len() > derived_width {
            return Err(Error::Evaluation(format!(
                "{} derived values for {} derived columns",
                derived.len(),
                derived_width
            )));
        }
        let mut row = Vec::with_capacity(self.width());
        row.push(log_prob);
        row.extend_from_slice(position);
        row.extend_from_slice(derived);
        row.resize(self.width(), f64::NAN);
        self.append_row(&row)
    }

    /// Row-major copy of all values.
    pub fn values(&self) -> Vec<f64> {
        let rows = ArrayBuilder::finish_cloned(&self.rows);
        let list = rows.as_fixed_size_list();
        let values = list.values().as_primitive::<Float64Type>();
        let offset = list.offset() * self.width();
        values.values()[offset..offset + list.len() * self.width()].to_vec()
    }

    /// The last `n` rows, oldest first.
    pub fn tail(&self, n: usize) -> Vec<Vec<f64>> {
        let width = self.width().max(1);
        let values = self.values();
        let start = values.len().saturating_sub(n * width);
        values[start..]
            .chunks_exact(width)
            .map(<[f64]>::to_vec)
            .collect()
    }

    /// All values of one column.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let index = self.columns.iter().position(|c| c == name)?;
        let values = self.values();
        Some(
            values
                .chunks_exact(self.width())
                .map(|row| row[index])
                .collect(),
        )
    }
}

/// Configuration of the CSV checkpoint.
#[derive(Debug, Clone)]
pub struct CsvConfig {
    path: PathBuf,
    /// Number of decimal places for floating point values, shortest exact
    /// representation when unset.
    precision: Option<usize>,
}

impl CsvConfig {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            precision: None,
        }
    }

    /// Set the precision (number of decimal places) for floating point values.
    ///
    /// By default values are written so that they read back unchanged.
    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn format_value(&self, v: f64) -> String {
        if v.is_nan() {
            "NA".to_string()
        } else if v.is_infinite() {
            if v > 0.0 { "Inf" } else { "-Inf" }.to_string()
        } else if let Some(prec) = self.precision {
            format!("{:.prec$}", v, prec = prec)
        } else {
            format!("{}", v)
        }
    }

    fn temporary_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Replace the checkpoint with the full contents of `table`.
    pub fn write(&self, table: &PosteriorTable) -> Result<()> {
        let tmp = self.temporary_path();
        let file = File::create(&tmp).map_err(|e| Error::io(&tmp, e))?;
        let mut writer = BufWriter::new(file);
        let io = |e| Error::io(&tmp, e);

        writeln!(writer, "{}", table.columns().join(",")).map_err(io)?;
        for row in table.values().chunks_exact(table.width().max(1)) {
            let line = row.iter().map(|&v| self.format_value(v)).join(",");
            writeln!(writer, "{}", line).map_err(io)?;
        }
        let file = writer.into_inner().map_err(|e| io(e.into_error()))?;
        file.sync_all().map_err(io)?;
        drop(file);

        std::fs::rename(&tmp, &self.path).map_err(|e| Error::io(&self.path, e))?;
        debug!(path = %self.path.display(), rows = table.len(), "wrote checkpoint");
        Ok(())
    }

    /// Read the checkpoint back, `None` when no file exists yet.
    pub fn read(&self) -> Result<Option<PosteriorTable>> {
        let path = &self.path;
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(path, e)),
        };
        let mut lines = BufReader::new(file).lines();

        let header = match lines.next() {
            Some(line) => line.map_err(|e| Error::io(path, e))?,
            None => return Err(Error::checkpoint(path, "file is empty")),
        };
        let columns: Vec<String> = header.split(',').map(|c| c.trim().to_string()).collect();
        if columns.first().map(String::as_str) != Some("lnprob") {
            return Err(Error::checkpoint(path, "first column is not lnprob"));
        }

        let mut table = PosteriorTable::new(columns);
        let mut row = Vec::with_capacity(table.width());
        for (number, line) in lines.enumerate() {
            let line = line.map_err(|e| Error::io(path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            row.clear();
            for field in line.split(',') {
                row.push(parse_value(field).ok_or_else(|| {
                    Error::checkpoint(path, format!("line {}: bad value '{}'", number + 2, field))
                })?);
            }
            if row.len() != table.width() {
                return Err(Error::checkpoint(
                    path,
                    format!(
                        "line {} has {} fields, the header {}",
                        number + 2,
                        row.len(),
                        table.width()
                    ),
                ));
            }
            table.append_row(&row)?;
        }
        table.source = Some(path.clone());
        Ok(Some(table))
    }
}

fn parse_value(field: &str) -> Option<f64> {
    match field.trim() {
        "NA" | "NaN" | "nan" => Some(f64::NAN),
        "Inf" | "inf" => Some(f64::INFINITY),
        "-Inf" | "-inf" => Some(f64::NEG_INFINITY),
        other => other.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn columns() -> Vec<String> {
        ["lnprob", "Size_Source0_Region0", "mu_tot.Region0"]
            .map(String::from)
            .to_vec()
    }

    #[test]
    fn rows_and_tail() {
        let mut table = PosteriorTable::new(columns());
        assert!(table.is_empty());
        for i in 0..5 {
            table.append_row(&[-(i as f64), i as f64, 1.]).unwrap();
        }
        assert_eq!(table.len(), 5);
        assert_eq!(table.tail(2), vec![vec![-3., 3., 1.], vec![-4., 4., 1.]]);
        assert_eq!(table.tail(10).len(), 5);
        assert_eq!(table.column("Size_Source0_Region0").unwrap(), vec![0., 1., 2., 3., 4.]);
        assert!(table.append_row(&[0., 1.]).is_err());
    }

    #[test]
    fn short_derived_lists_are_padded() {
        let mut table = PosteriorTable::new(columns());
        table
            .append_sample(f64::NEG_INFINITY, &[0.5], &[])
            .unwrap();
        let row = &table.tail(1)[0];
        assert_eq!(row[0], f64::NEG_INFINITY);
        assert!(row[2].is_nan());
        assert!(table.append_sample(0., &[0.5], &[1., 2.]).is_err());
    }

    #[test]
    fn checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = CsvConfig::new(dir.path().join("posteriorpdf.csv")).with_precision(6);
        assert!(config.read().unwrap().is_none());

        let mut table = PosteriorTable::new(columns());
        table.append_row(&[-1.25, 0.123456, f64::NAN]).unwrap();
        table.append_row(&[f64::NEG_INFINITY, 0.5, 3.]).unwrap();
        config.write(&table).unwrap();

        let text = std::fs::read_to_string(config.path()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("lnprob,Size_Source0_Region0,mu_tot.Region0"));
        assert_eq!(lines.next(), Some("-1.250000,0.123456,NA"));
        assert_eq!(lines.next(), Some("-Inf,0.500000,3.000000"));
        assert!(!dir.path().join("posteriorpdf.csv.tmp").exists());

        let mut resumed = config.read().unwrap().unwrap();
        assert_eq!(resumed.columns(), table.columns());
        assert_eq!(resumed.len(), 2);
        assert_eq!(resumed.source(), Some(config.path()));
        resumed.append_row(&[0., 0.25, 1.]).unwrap();
        config.write(&resumed).unwrap();

        let again = config.read().unwrap().unwrap();
        assert_eq!(again.columns(), table.columns());
        assert_eq!(again.tail(1), vec![vec![0., 0.25, 1.]]);
        assert!(again.tail(3)[0][2].is_nan());
    }

    #[test]
    fn default_format_reads_back_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let config = CsvConfig::new(dir.path().join("posteriorpdf.csv"));

        let row = [-1234.567_890_123_456_7, 3.2e-13, 1. / 3.];
        let mut table = PosteriorTable::new(columns());
        table.append_row(&row).unwrap();
        config.write(&table).unwrap();

        let resumed = config.read().unwrap().unwrap();
        assert_eq!(resumed.tail(1), vec![row.to_vec()]);
    }

    #[test]
    fn malformed_checkpoints_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        let config = CsvConfig::new(&path);

        std::fs::write(&path, "").unwrap();
        assert!(matches!(config.read(), Err(Error::Checkpoint { .. })));

        std::fs::write(&path, "lnprob,a\n1.0\n").unwrap();
        assert!(matches!(config.read(), Err(Error::Checkpoint { .. })));

        std::fs::write(&path, "lnprob,a\n1.0,abc\n").unwrap();
        assert!(matches!(config.read(), Err(Error::Checkpoint { .. })));

        std::fs::write(&path, "a,lnprob\n1.0,2.0\n").unwrap();
        assert!(matches!(config.read(), Err(Error::Checkpoint { .. })));
    }
}
