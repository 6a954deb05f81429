use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

use crate::utils::error::{ConnectorError, Result};

/// Column type inferred from the cell values, used for sheet formatting and
/// table schema derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
    Text,
}

impl ColumnType {
    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }
}

/// A small column-ordered table of JSON values.
///
/// Every tabular connector operation traffics in frames: sheets and BigQuery
/// tables are downloaded into one, and uploads are serialized from one. The
/// first row of raw sheet values becomes the header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Frame {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a frame from raw row-major values, treating the first row as the
    /// header. Short rows are padded with nulls, long rows are truncated.
    pub fn from_values(mut values: Vec<Vec<Value>>) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let columns = values
            .remove(0)
            .into_iter()
            .map(|value| match value {
                Value::String(name) => name,
                other => other.to_string(),
            })
            .collect::<Vec<_>>();
        let width = columns.len();
        let rows = values
            .into_iter()
            .map(|mut row| {
                row.resize(width, Value::Null);
                row
            })
            .collect();
        Self { columns, rows }
    }

    /// Header and rows as row-major values, the layout sheet uploads expect.
    pub fn to_values(&self) -> Vec<Vec<Value>> {
        let mut values = Vec::with_capacity(self.rows.len() + 1);
        values.push(
            self.columns
                .iter()
                .map(|name| Value::String(name.clone()))
                .collect(),
        );
        values.extend(self.rows.iter().cloned());
        values
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(ConnectorError::InvalidConfigValue {
                field: "row".to_string(),
                value: format!("{} values", row.len()),
                reason: format!("expected {} values", self.columns.len()),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[index]).collect())
    }

    /// Add a column, filling existing rows with the given values.
    pub fn add_column(&mut self, name: &str, values: Vec<Value>) -> Result<()> {
        if values.len() != self.rows.len() {
            return Err(ConnectorError::InvalidConfigValue {
                field: "column".to_string(),
                value: format!("{} values", values.len()),
                reason: format!("expected {} values", self.rows.len()),
            });
        }
        self.columns.push(name.to_string());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
        Ok(())
    }

    /// Rewrite every cell of a column in place. Unknown columns are ignored.
    pub fn map_column<F>(&mut self, name: &str, mut f: F)
    where
        F: FnMut(&Value) -> Value,
    {
        if let Some(index) = self.column_index(name) {
            for row in &mut self.rows {
                row[index] = f(&row[index]);
            }
        }
    }

    /// Infer the type of a column from its cells.
    ///
    /// Nulls are skipped; an integer column with float cells widens to float;
    /// any other mix degrades to text. An empty or all-null column is text.
    pub fn column_type(&self, index: usize) -> ColumnType {
        let mut inferred: Option<ColumnType> = None;
        for row in &self.rows {
            let cell = match row.get(index) {
                Some(Value::Null) | None => continue,
                Some(cell) => cell,
            };
            let cell_type = infer_cell_type(cell);
            inferred = Some(match inferred {
                None => cell_type,
                Some(current) if current == cell_type => current,
                Some(ColumnType::Integer) if cell_type == ColumnType::Float => ColumnType::Float,
                Some(ColumnType::Float) if cell_type == ColumnType::Integer => ColumnType::Float,
                Some(_) => return ColumnType::Text,
            });
        }
        inferred.unwrap_or(ColumnType::Text)
    }

    pub fn column_types(&self) -> Vec<ColumnType> {
        (0..self.columns.len())
            .map(|index| self.column_type(index))
            .collect()
    }
}

fn infer_cell_type(value: &Value) -> ColumnType {
    match value {
        Value::Bool(_) => ColumnType::Boolean,
        Value::Number(number) => {
            if number.is_i64() || number.is_u64() {
                ColumnType::Integer
            } else {
                ColumnType::Float
            }
        }
        Value::String(text) => {
            if NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok() {
                ColumnType::Date
            } else if NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").is_ok()
                || NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").is_ok()
                || NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
            {
                ColumnType::DateTime
            } else {
                ColumnType::Text
            }
        }
        _ => ColumnType::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Frame {
        Frame::from_values(vec![
            vec![json!("id"), json!("name"), json!("price"), json!("day")],
            vec![json!(1), json!("Product A"), json!(29.99), json!("2024-01-01")],
            vec![json!(2), json!("Product B"), json!(49.99), json!("2024-01-02")],
        ])
    }

    #[test]
    fn test_from_values() {
        let frame = sample();
        assert_eq!(frame.columns(), &["id", "name", "price", "day"]);
        assert_eq!(frame.num_rows(), 2);
        assert_eq!(frame.rows()[1][1], json!("Product B"));
    }

    #[test]
    fn test_from_values_pads_short_rows() {
        let frame = Frame::from_values(vec![
            vec![json!("a"), json!("b")],
            vec![json!(1)],
        ]);
        assert_eq!(frame.rows()[0], vec![json!(1), Value::Null]);
    }

    #[test]
    fn test_round_trip() {
        let frame = sample();
        assert_eq!(Frame::from_values(frame.to_values()), frame);
    }

    #[test]
    fn test_push_row_width_check() {
        let mut frame = Frame::new(vec!["a".to_string(), "b".to_string()]);
        assert!(frame.push_row(vec![json!(1), json!(2)]).is_ok());
        assert!(frame.push_row(vec![json!(1)]).is_err());
    }

    #[test]
    fn test_column_types() {
        let frame = sample();
        assert_eq!(
            frame.column_types(),
            vec![
                ColumnType::Integer,
                ColumnType::Text,
                ColumnType::Float,
                ColumnType::Date,
            ]
        );
    }

    #[test]
    fn test_column_type_widens_to_float() {
        let frame = Frame::from_values(vec![
            vec![json!("value")],
            vec![json!(1)],
            vec![json!(2.5)],
            vec![Value::Null],
        ]);
        assert_eq!(frame.column_type(0), ColumnType::Float);
    }

    #[test]
    fn test_column_type_mixed_is_text() {
        let frame = Frame::from_values(vec![
            vec![json!("value")],
            vec![json!(1)],
            vec![json!("one")],
        ]);
        assert_eq!(frame.column_type(0), ColumnType::Text);
    }

    #[test]
    fn test_datetime_detection() {
        let frame = Frame::from_values(vec![
            vec![json!("ts")],
            vec![json!("2024-01-01 10:30:00")],
            vec![json!("2024-01-02 11:00:00.250")],
        ]);
        assert_eq!(frame.column_type(0), ColumnType::DateTime);
    }

    #[test]
    fn test_add_and_map_column() {
        let mut frame = sample();
        frame
            .add_column("stocked", vec![json!(true), json!(false)])
            .unwrap();
        assert_eq!(frame.column_type(4), ColumnType::Boolean);

        frame.map_column("price", |value| {
            json!(value.as_f64().unwrap_or_default() * 2.0)
        });
        assert_eq!(frame.rows()[0][2], json!(59.98));
    }
}
