use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use rand::{rngs::SmallRng, seq::index, SeedableRng};
use thiserror::Error;

/// Cell spellings read as missing.
pub const NA_VALUES: &[&str] = &[
    "", "NA", "N/A", "n/a", "NaN", "nan", "-NaN", "null", "NULL", "None", "#N/A", "<NA>",
];

/// Raw cell: `None` when missing.
pub type Cell = Option<String>;

/// Inferred column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Every present cell parses as a float.
    Numeric,
    /// At least one present cell is free text.
    Categorical,
}

/// Column-oriented table of raw string cells loaded from CSV.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    columns: IndexMap<String, Vec<Cell>>,
    rows: usize,
}

impl Frame {
    /// Reads a CSV file with a header row.
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DatasetError::NotFound(path.to_path_buf()));
        }
        let file = File::open(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file)
    }

    /// Reads CSV text with a header row from any reader.
    pub fn from_reader(reader: impl Read) -> Result<Self, DatasetError> {
        let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers: Vec<String> = rdr.headers()?.iter().map(ToOwned::to_owned).collect();
        if headers.is_empty() {
            return Err(DatasetError::Empty);
        }
        let mut columns: Vec<Vec<Cell>> = vec![Vec::new(); headers.len()];
        for record in rdr.records() {
            let record = record?;
            for (column, field) in columns.iter_mut().zip(record.iter()) {
                column.push(parse_cell(field));
            }
        }
        Self::from_columns(headers.into_iter().zip(columns))
    }

    /// Builds a frame from named columns of equal length.
    pub fn from_columns(
        columns: impl IntoIterator<Item = (String, Vec<Cell>)>,
    ) -> Result<Self, DatasetError> {
        let mut frame = Self::default();
        for (index, (name, cells)) in columns.into_iter().enumerate() {
            if index == 0 {
                frame.rows = cells.len();
            } else if cells.len() != frame.rows {
                return Err(DatasetError::Ragged {
                    column: name,
                    expected: frame.rows,
                    actual: cells.len(),
                });
            }
            if frame.columns.contains_key(&name) {
                return Err(DatasetError::DuplicateColumn(name));
            }
            frame.columns.insert(name, cells);
        }
        Ok(frame)
    }

    /// Number of data rows.
    #[must_use]
    pub const fn n_rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Column names in file order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Cells of a column.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&[Cell]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Whether the column exists.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Inferred kind of a column.
    #[must_use]
    pub fn kind(&self, name: &str) -> Option<ColumnKind> {
        self.column(name).map(infer_kind)
    }

    /// Removes a column and returns its cells, keeping the order of the rest.
    pub fn take_column(&mut self, name: &str) -> Option<Vec<Cell>> {
        self.columns.shift_remove(name)
    }

    /// Copy without the named columns; names that are not present are ignored.
    #[must_use]
    pub fn without_columns(&self, names: &[&str]) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .filter(|(name, _)| !names.contains(&name.as_str()))
                .map(|(name, cells)| (name.clone(), cells.clone()))
                .collect(),
            rows: self.rows,
        }
    }

    /// A single row keyed by column name.
    #[must_use]
    pub fn row(&self, index: usize) -> Option<IndexMap<String, Cell>> {
        (index < self.rows).then(|| {
            self.columns
                .iter()
                .map(|(name, cells)| (name.clone(), cells[index].clone()))
                .collect()
        })
    }

    /// Copy holding only the given rows, in the given order.
    #[must_use]
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let indices: Vec<usize> = indices.iter().copied().filter(|i| *i < self.rows).collect();
        Self {
            columns: self
                .columns
                .iter()
                .map(|(name, cells)| {
                    (
                        name.clone(),
                        indices.iter().map(|i| cells[*i].clone()).collect(),
                    )
                })
                .collect(),
            rows: indices.len(),
        }
    }

    /// Deterministic random sample of distinct row indices.
    #[must_use]
    pub fn sample_indices(&self, count: usize, seed: u64) -> Vec<usize> {
        let mut rng = SmallRng::seed_from_u64(seed);
        index::sample(&mut rng, self.rows, count.min(self.rows)).into_vec()
    }
}

fn parse_cell(field: &str) -> Cell {
    (!NA_VALUES.contains(&field)).then(|| field.to_owned())
}

fn infer_kind(cells: &[Cell]) -> ColumnKind {
    if cells
        .iter()
        .flatten()
        .all(|cell| cell.parse::<f64>().is_ok())
    {
        ColumnKind::Numeric
    } else {
        ColumnKind::Categorical
    }
}

/// Errors raised while loading or reshaping tabular data.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// Dataset file absent.
    #[error("dataset not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O failure on the dataset file.
    #[error("io error on {}: {source}", path.display())]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Malformed CSV.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// No header columns.
    #[error("dataset has no columns")]
    Empty,
    /// Header names a column twice.
    #[error("duplicate column `{0}`")]
    DuplicateColumn(String),
    /// Columns of different lengths.
    #[error("column `{column}` has {actual} rows, expected {expected}")]
    Ragged {
        /// Offending column.
        column: String,
        /// Rows in the first column.
        expected: usize,
        /// Rows in the offending column.
        actual: usize,
    },
    /// A required column is absent.
    #[error("missing column `{0}`")]
    MissingColumn(String),
}
