//! Column-oriented in-memory table used at every pipeline stage.
//!
//! Row order is the only link between identifiers and predictions, so every
//! operation here keeps it untouched: columns can be added, removed or
//! reordered, rows never are.

use crate::error::{Result, ScoringError};
use std::io;

/// Kind of values stored in a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    Float,
    Text,
}

/// Homogeneous column storage. Missing floats are NaN.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Text(Vec<String>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Int(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            ColumnData::Int(_) => ValueKind::Integer,
            ColumnData::Float(_) => ValueKind::Float,
            ColumnData::Text(_) => ValueKind::Text,
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, ColumnData::Text(_))
    }

    /// Numeric values as `f64`, or `None` for text columns.
    pub fn as_f64(&self) -> Option<Vec<f64>> {
        match self {
            ColumnData::Int(v) => Some(v.iter().map(|&x| x as f64).collect()),
            ColumnData::Float(v) => Some(v.clone()),
            ColumnData::Text(_) => None,
        }
    }

    /// Render one cell the way it is written to CSV.
    pub fn render(&self, row: usize) -> String {
        match self {
            ColumnData::Int(v) => v[row].to_string(),
            ColumnData::Float(v) if v[row].is_nan() => String::new(),
            ColumnData::Float(v) => v[row].to_string(),
            ColumnData::Text(v) => v[row].clone(),
        }
    }

    /// Infer the narrowest representation for raw text values.
    ///
    /// All values integral gives `Int`; all values numeric or empty gives
    /// `Float` with NaN for the empty ones; anything else stays `Text`.
    pub fn infer(raw: Vec<String>) -> Self {
        if !raw.is_empty() {
            if let Some(ints) = raw
                .iter()
                .map(|s| s.trim().parse::<i64>().ok())
                .collect::<Option<Vec<_>>>()
            {
                return ColumnData::Int(ints);
            }
        }

        let floats = raw
            .iter()
            .map(|s| {
                let s = s.trim();
                if s.is_empty() {
                    Some(f64::NAN)
                } else {
                    s.parse::<f64>().ok()
                }
            })
            .collect::<Option<Vec<_>>>();

        match floats {
            Some(values) => ColumnData::Float(values),
            None => ColumnData::Text(raw),
        }
    }
}

/// A named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn ints(name: impl Into<String>, values: Vec<i64>) -> Self {
        Self::new(name, ColumnData::Int(values))
    }

    pub fn floats(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self::new(name, ColumnData::Float(values))
    }

    pub fn texts<S: Into<String>>(name: impl Into<String>, values: Vec<S>) -> Self {
        Self::new(
            name,
            ColumnData::Text(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Ordered set of uniquely named, equally long columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<Column>,
    n_rows: usize,
}

impl Table {
    /// Empty table; the first pushed column fixes the row count.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with no columns yet but a fixed row count.
    pub fn with_rows(n_rows: usize) -> Self {
        Self {
            columns: Vec::new(),
            n_rows,
        }
    }

    /// Build a table from columns, checking lengths and names.
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        let mut table = Self::new();
        for column in columns {
            table.push(column)?;
        }
        Ok(table)
    }

    /// Append a column at the end.
    pub fn push(&mut self, column: Column) -> Result<()> {
        if self.contains(&column.name) {
            return Err(ScoringError::Input(format!(
                "duplicate column '{}'",
                column.name
            )));
        }

        if self.columns.is_empty() && self.n_rows == 0 {
            self.n_rows = column.len();
        } else if column.len() != self.n_rows {
            return Err(ScoringError::RowCountMismatch {
                stage: "column",
                expected: self.n_rows,
                actual: column.len(),
            });
        }

        self.columns.push(column);
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Read a CSV with a header row, inferring each column's kind.
    pub fn read_csv<R: io::Read>(reader: R) -> Result<Self> {
        Self::read_csv_with_text(reader, &[])
    }

    /// Like [`Table::read_csv`], but the columns named in `text_columns` keep
    /// their raw values (identifiers like `007` stay `007`).
    pub fn read_csv_with_text<R: io::Read>(reader: R, text_columns: &[String]) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);

        let headers: Vec<String> = rdr
            .headers()
            .map_err(|e| ScoringError::Input(e.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut raw: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for record in rdr.records() {
            let record = record.map_err(|e| ScoringError::Input(e.to_string()))?;
            for (values, field) in raw.iter_mut().zip(record.iter()) {
                values.push(field.to_string());
            }
        }

        let n_rows = raw.first().map(Vec::len).unwrap_or(0);
        let mut table = Self::with_rows(n_rows);
        for (name, values) in headers.into_iter().zip(raw) {
            let data = if text_columns.contains(&name) {
                ColumnData::Text(values)
            } else {
                ColumnData::infer(values)
            };
            table.push(Column::new(name, data))?;
        }
        Ok(table)
    }

    /// Write the table as CSV with one header row.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> csv::Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(self.columns.iter().map(|c| c.name.as_str()))?;
        for row in 0..self.n_rows {
            wtr.write_record(self.columns.iter().map(|c| c.data.render(row)))?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// CSV encoding of the whole table.
    pub fn to_csv_bytes(&self) -> csv::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_infer_kinds() {
        let ints = ColumnData::infer(vec!["1".into(), " 2".into()]);
        assert_eq!(ints, ColumnData::Int(vec![1, 2]));

        let floats = ColumnData::infer(vec!["1.5".into(), "".into()]);
        assert_eq!(floats.kind(), ValueKind::Float);

        let texts = ColumnData::infer(vec!["1".into(), "abc".into()]);
        assert_eq!(texts, ColumnData::Text(vec!["1".into(), "abc".into()]));
    }

    #[test]
    fn test_read_csv() {
        let csv = "id,age,income,city\n1,35,8000.5,SP\n2,22,,RJ\n";
        let table = Table::read_csv(csv.as_bytes()).unwrap();

        assert_eq!(table.n_rows(), 2);
        assert_eq!(table.column_names(), vec!["id", "age", "income", "city"]);
        assert_eq!(table.column("age").unwrap().data, ColumnData::Int(vec![35, 22]));
        assert_eq!(table.column("income").unwrap().data.kind(), ValueKind::Float);
        assert_eq!(table.column("city").unwrap().data.kind(), ValueKind::Text);
    }

    #[test]
    fn test_text_columns_keep_raw_values() {
        let csv = "ID_Cliente,age\n007,35\n12345678901234567890,22\n";
        let table =
            Table::read_csv_with_text(csv.as_bytes(), &["ID_Cliente".to_string()]).unwrap();

        assert_eq!(
            table.column("ID_Cliente").unwrap().data,
            ColumnData::Text(vec!["007".into(), "12345678901234567890".into()])
        );
        assert_eq!(table.column("age").unwrap().data, ColumnData::Int(vec![35, 22]));
        assert_eq!(
            String::from_utf8(table.to_csv_bytes().unwrap()).unwrap(),
            csv
        );
    }

    #[test]
    fn test_push_rejects_length_mismatch() {
        let mut table = Table::from_columns(vec![Column::ints("id", vec![1, 2])]).unwrap();
        let err = table.push(Column::ints("age", vec![30])).unwrap_err();
        assert!(matches!(err, ScoringError::RowCountMismatch { .. }));
    }

    #[test]
    fn test_push_rejects_duplicate_name() {
        let mut table = Table::from_columns(vec![Column::ints("id", vec![1])]).unwrap();
        assert!(table.push(Column::ints("id", vec![2])).is_err());
    }

    #[test]
    fn test_write_csv_renders_nan_as_empty() {
        let table = Table::from_columns(vec![
            Column::ints("id", vec![7, 8]),
            Column::floats("p", vec![0.25, f64::NAN]),
        ])
        .unwrap();

        let out = String::from_utf8(table.to_csv_bytes().unwrap()).unwrap();
        assert_eq!(out, "id,p\n7,0.25\n8,\n");
    }
}
