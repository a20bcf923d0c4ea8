//! Typed rows and database-agnostic value mappings.
//!
//! Query results are decoded from driver rows into [`Row`]s of [`Value`]s, and
//! callers map them to their own shapes through [`FromRow`].
//!
//! # Architecture
//!
//! Decoding uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction

use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use serde::Serialize;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row as _, Type, TypeInfo};
use std::sync::Arc;

// =============================================================================
// Values and rows
// =============================================================================

/// A single decoded column value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Text, plus anything without a native mapping (decimals, dates, uuids)
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
        }
    }
}

/// One result row. Column names are shared between all rows of a result.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value by column name.
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    /// Typed value by column name.
    pub fn get<T: FromValue>(&self, column: &str) -> DbResult<T> {
        let value = self
            .value(column)
            .ok_or_else(|| DbError::decode(column, format!("Column not found: {}", column)))?;
        T::from_value(value).map_err(|message| DbError::decode(column, message))
    }

    /// Typed value by position.
    pub fn get_idx<T: FromValue>(&self, idx: usize) -> DbResult<T> {
        let value = self.values.get(idx).ok_or_else(|| {
            DbError::decode(
                idx.to_string(),
                format!("Column index {} out of bounds (len: {})", idx, self.len()),
            )
        })?;
        T::from_value(value).map_err(|message| DbError::decode(idx.to_string(), message))
    }
}

/// Conversion from a decoded column value.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, String>;
}

fn mismatch(expected: &str, value: &Value) -> String {
    format!("expected {}, found {}", expected, value.type_name())
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, String> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Int(v) => Ok(*v),
            Value::Bool(v) => Ok(*v as i64),
            other => Err(mismatch("int", other)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self, String> {
        let v = i64::from_value(value)?;
        i32::try_from(v).map_err(|_| format!("value {} out of range for i32", v))
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> Result<Self, String> {
        let v = i64::from_value(value)?;
        u64::try_from(v).map_err(|_| format!("value {} out of range for u64", v))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            Value::Text(v) => v.parse().map_err(|_| format!("'{}' is not a number", v)),
            other => Err(mismatch("float", other)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Bool(v) => Ok(*v),
            // SQLite and MySQL store booleans as integers
            Value::Int(0) => Ok(false),
            Value::Int(1) => Ok(true),
            other => Err(mismatch("bool", other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Text(v) => Ok(v.clone()),
            Value::Bytes(v) => String::from_utf8(v.clone()).map_err(|e| e.to_string()),
            other => Err(mismatch("text", other)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Bytes(v) => Ok(v.clone()),
            Value::Text(v) => Ok(v.clone().into_bytes()),
            other => Err(mismatch("bytes", other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Mapping from a result row to a caller-defined shape.
///
/// ```ignore
/// struct Task { id: i64, title: String }
///
/// impl FromRow for Task {
///     fn from_row(row: &Row) -> DbResult<Self> {
///         Ok(Self { id: row.get("id")?, title: row.get("title")? })
///     }
/// }
/// ```
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> DbResult<Self>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(row.clone())
    }
}

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Temporal,
    Uuid,
    Json,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite has no exact decimal storage
        if db == DatabaseType::SQLite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    // "point" and "interval" contain "int" but are not integers
    if (lower.contains("int") && !lower.contains("point") && !lower.contains("interval"))
        || lower.contains("serial")
    {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower.contains("timestamp") || lower.contains("date") || lower.starts_with("time") {
        return TypeCategory::Temporal;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    // SQLite has no JSON storage class; its JSON is plain text
    if (lower == "json" || lower == "jsonb") && db != DatabaseType::SQLite {
        return TypeCategory::Json;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    // varchar, text, char, enums
    TypeCategory::Text
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Raw DECIMAL/NUMERIC value, kept as the engine's exact text.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Driver row conversion
// =============================================================================

/// Conversion from a driver row into a [`Row`].
pub trait DecodeRow {
    fn column_names(&self) -> Arc<[String]>;
    fn decode_values(&self) -> Vec<Value>;
}

/// Decode a batch of driver rows, sharing one column-name list.
pub fn decode_rows<R: DecodeRow>(rows: &[R]) -> Vec<Row> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    let columns = first.column_names();
    rows.iter()
        .map(|r| Row::new(Arc::clone(&columns), r.decode_values()))
        .collect()
}

macro_rules! impl_decode_row {
    ($row:ty, $db:expr, $module:ident) => {
        impl DecodeRow for $row {
            fn column_names(&self) -> Arc<[String]> {
                self.columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect()
            }

            fn decode_values(&self) -> Vec<Value> {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        let category = categorize_type(col.type_info().name(), $db);
                        $module::decode_column(self, idx, category)
                    })
                    .collect()
            }
        }
    };
}

impl_decode_row!(MySqlRow, DatabaseType::MySQL, mysql);
impl_decode_row!(PgRow, DatabaseType::PostgreSQL, postgres);
impl_decode_row!(SqliteRow, DatabaseType::SQLite, sqlite);

/// Text decode that falls back to reading the raw bytes as UTF-8 when the
/// driver refuses the conversion (enums, domains and other custom types).
///
/// A value that cannot be read either way is logged, never silently dropped.
fn text_or_unchecked(
    checked: Result<Option<String>, sqlx::Error>,
    unchecked: impl FnOnce() -> Result<Option<String>, sqlx::Error>,
    idx: usize,
) -> Value {
    match checked {
        Ok(v) => v.map(Value::Text).unwrap_or(Value::Null),
        Err(checked_err) => match unchecked() {
            Ok(v) => v.map(Value::Text).unwrap_or(Value::Null),
            Err(e) => {
                tracing::warn!(
                    column = idx,
                    error = %checked_err,
                    fallback_error = %e,
                    "Failed to decode column as text"
                );
                Value::Null
            }
        },
    }
}

/// Unwrap a single decode attempt, logging the failure instead of hiding it.
fn logged<T>(decoded: Result<Option<T>, sqlx::Error>, idx: usize) -> Option<T> {
    match decoded {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(column = idx, error = %e, "Failed to decode column");
            None
        }
    }
}

/// JSON documents are kept as their serialized text.
fn json_text(decoded: Result<Option<serde_json::Value>, sqlx::Error>) -> Option<Value> {
    match decoded {
        Ok(v) => Some(v.map(|v| Value::Text(v.to_string())).unwrap_or(Value::Null)),
        Err(_) => None,
    }
}

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> Value {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::Temporal => decode_temporal(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Text | TypeCategory::Uuid => decode_text(row, idx),
        }
    }

    fn decode_json(row: &MySqlRow, idx: usize) -> Value {
        json_text(row.try_get::<Option<serde_json::Value>, _>(idx))
            .unwrap_or_else(|| decode_text(row, idx))
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> Value {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => Value::Text(v.0),
            Ok(None) => Value::Null,
            Err(e) => {
                tracing::error!("Failed to decode DECIMAL: {:?}", e);
                Value::Null
            }
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> Value {
        if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
            return Value::Null;
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return Value::Int(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
            // BIGINT UNSIGNED above i64::MAX keeps its exact text
            return i64::try_from(v)
                .map(Value::Int)
                .unwrap_or_else(|_| Value::Text(v.to_string()));
        }
        Value::Null
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> Value {
        logged(row.try_get::<Option<bool>, _>(idx), idx)
            .map(Value::Bool)
            .unwrap_or(Value::Null)
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> Value {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return Value::Float(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return Value::Float(v as f64);
        }
        Value::Null
    }

    fn decode_binary(row: &MySqlRow, idx: usize) -> Value {
        logged(row.try_get::<Option<Vec<u8>>, _>(idx), idx)
            .map(Value::Bytes)
            .unwrap_or(Value::Null)
    }

    fn decode_temporal(row: &MySqlRow, idx: usize) -> Value {
        use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
        if let Ok(Some(v)) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
            return Value::Text(v.to_string());
        }
        if let Ok(Some(v)) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
            return Value::Text(v.to_rfc3339());
        }
        if let Ok(Some(v)) = row.try_get::<Option<NaiveDate>, _>(idx) {
            return Value::Text(v.to_string());
        }
        if let Ok(Some(v)) = row.try_get::<Option<NaiveTime>, _>(idx) {
            return Value::Text(v.to_string());
        }
        Value::Null
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> Value {
        text_or_unchecked(
            row.try_get::<Option<String>, _>(idx),
            || row.try_get_unchecked::<Option<String>, _>(idx),
            idx,
        )
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> Value {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::Temporal => decode_temporal(row, idx),
            TypeCategory::Uuid => decode_uuid(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Text => decode_text(row, idx),
        }
    }

    fn decode_json(row: &PgRow, idx: usize) -> Value {
        json_text(row.try_get::<Option<serde_json::Value>, _>(idx))
            .unwrap_or_else(|| decode_text(row, idx))
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> Value {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => Value::Text(v.0),
            Ok(None) => Value::Null,
            Err(e) => {
                tracing::error!("Failed to decode NUMERIC: {:?}", e);
                Value::Null
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> Value {
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return Value::Int(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return Value::Int(v as i64);
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return Value::Int(v as i64);
        }
        Value::Null
    }

    fn decode_boolean(row: &PgRow, idx: usize) -> Value {
        logged(row.try_get::<Option<bool>, _>(idx), idx)
            .map(Value::Bool)
            .unwrap_or(Value::Null)
    }

    fn decode_float(row: &PgRow, idx: usize) -> Value {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return Value::Float(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return Value::Float(v as f64);
        }
        Value::Null
    }

    fn decode_binary(row: &PgRow, idx: usize) -> Value {
        logged(row.try_get::<Option<Vec<u8>>, _>(idx), idx)
            .map(Value::Bytes)
            .unwrap_or(Value::Null)
    }

    fn decode_temporal(row: &PgRow, idx: usize) -> Value {
        use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
        if let Ok(Some(v)) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
            return Value::Text(v.to_rfc3339());
        }
        if let Ok(Some(v)) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
            return Value::Text(v.to_string());
        }
        if let Ok(Some(v)) = row.try_get::<Option<NaiveDate>, _>(idx) {
            return Value::Text(v.to_string());
        }
        if let Ok(Some(v)) = row.try_get::<Option<NaiveTime>, _>(idx) {
            return Value::Text(v.to_string());
        }
        Value::Null
    }

    fn decode_uuid(row: &PgRow, idx: usize) -> Value {
        logged(row.try_get::<Option<uuid::Uuid>, _>(idx), idx)
            .map(|v| Value::Text(v.to_string()))
            .unwrap_or(Value::Null)
    }

    fn decode_text(row: &PgRow, idx: usize) -> Value {
        text_or_unchecked(
            row.try_get::<Option<String>, _>(idx),
            || row.try_get_unchecked::<Option<String>, _>(idx),
            idx,
        )
    }
}

mod sqlite {
    use super::*;

    // SQLite values carry their own storage class, so the declared type is only a hint.
    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> Value {
        match category {
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(Value::Bool)
                .unwrap_or_else(|| decode_any(row, idx)),
            _ => decode_any(row, idx),
        }
    }

    fn decode_any(row: &SqliteRow, idx: usize) -> Value {
        if let Ok(None) = row.try_get_unchecked::<Option<i64>, _>(idx) {
            return Value::Null;
        }
        let storage = row
            .try_get_raw(idx)
            .ok()
            .map(|raw| sqlx::ValueRef::type_info(&raw).name().to_string())
            .unwrap_or_default();
        match storage.as_str() {
            "INTEGER" => row
                .try_get_unchecked::<i64, _>(idx)
                .map(Value::Int)
                .unwrap_or(Value::Null),
            "REAL" => row
                .try_get_unchecked::<f64, _>(idx)
                .map(Value::Float)
                .unwrap_or(Value::Null),
            "BLOB" => row
                .try_get_unchecked::<Vec<u8>, _>(idx)
                .map(Value::Bytes)
                .unwrap_or(Value::Null),
            _ => row
                .try_get_unchecked::<String, _>(idx)
                .map(Value::Text)
                .unwrap_or(Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_row() -> Row {
        let columns: Arc<[String]> = vec!["id".to_string(), "title".to_string(), "done".to_string()].into();
        Row::new(
            columns,
            vec![
                Value::Int(7),
                Value::Text("write docs".to_string()),
                Value::Int(0),
            ],
        )
    }

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(
            categorize_type("INT", DatabaseType::MySQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("BIGINT", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("SERIAL", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("INTERVAL", DatabaseType::PostgreSQL),
            TypeCategory::Text
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(
            categorize_type("DECIMAL", DatabaseType::MySQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("NUMERIC", DatabaseType::PostgreSQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("numeric", DatabaseType::SQLite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_temporal() {
        assert_eq!(
            categorize_type("TIMESTAMPTZ", DatabaseType::PostgreSQL),
            TypeCategory::Temporal
        );
        assert_eq!(
            categorize_type("DATETIME", DatabaseType::MySQL),
            TypeCategory::Temporal
        );
        assert_eq!(
            categorize_type("VARCHAR", DatabaseType::MySQL),
            TypeCategory::Text
        );
    }

    #[test]
    fn test_categorize_type_json() {
        assert_eq!(
            categorize_type("JSONB", DatabaseType::PostgreSQL),
            TypeCategory::Json
        );
        assert_eq!(
            categorize_type("json", DatabaseType::PostgreSQL),
            TypeCategory::Json
        );
        assert_eq!(
            categorize_type("JSON", DatabaseType::MySQL),
            TypeCategory::Json
        );
        assert_eq!(
            categorize_type("JSON", DatabaseType::SQLite),
            TypeCategory::Text
        );
    }

    #[test]
    fn test_json_keeps_document_text() {
        let doc = serde_json::json!({"labels": ["urgent", "backend"]});
        assert_eq!(
            json_text(Ok(Some(doc))),
            Some(Value::Text(r#"{"labels":["urgent","backend"]}"#.to_string()))
        );
        assert_eq!(json_text(Ok(None)), Some(Value::Null));
        assert_eq!(
            json_text(Err(sqlx::Error::Protocol("not json".to_string()))),
            None
        );
    }

    #[test]
    fn test_text_decode_falls_back_to_raw_bytes() {
        let refused = || Err(sqlx::Error::Protocol("mismatched types".to_string()));

        let value = text_or_unchecked(refused(), || Ok(Some("in_review".to_string())), 0);
        assert_eq!(value, Value::Text("in_review".to_string()));

        let value = text_or_unchecked(Ok(None), || panic!("not consulted"), 0);
        assert!(value.is_null());

        let value = text_or_unchecked(Ok(Some("todo".to_string())), || panic!("not consulted"), 0);
        assert_eq!(value, Value::Text("todo".to_string()));

        // unreadable both ways is logged and surfaces as null
        assert!(text_or_unchecked(refused(), refused, 0).is_null());
    }

    #[test]
    fn test_row_get_by_name() {
        let row = task_row();
        assert_eq!(row.get::<i64>("id").unwrap(), 7);
        assert_eq!(row.get::<String>("title").unwrap(), "write docs");
        assert!(!row.get::<bool>("done").unwrap());
    }

    #[test]
    fn test_row_get_missing_column() {
        let err = task_row().get::<i64>("owner_id").unwrap_err();
        assert!(matches!(err, DbError::Decode { .. }));
    }

    #[test]
    fn test_row_get_type_mismatch() {
        let err = task_row().get::<i64>("title").unwrap_err();
        assert!(err.to_string().contains("expected int, found text"));
    }

    #[test]
    fn test_row_get_idx_out_of_bounds() {
        assert!(task_row().get_idx::<i64>(3).is_err());
        assert_eq!(task_row().get_idx::<i32>(0).unwrap(), 7);
    }

    #[test]
    fn test_option_maps_null() {
        assert_eq!(Option::<i64>::from_value(&Value::Null).unwrap(), None);
        assert_eq!(Option::<i64>::from_value(&Value::Int(3)).unwrap(), Some(3));
    }

    #[test]
    fn test_from_row_impl() {
        struct Task {
            id: i64,
            title: String,
        }

        impl FromRow for Task {
            fn from_row(row: &Row) -> DbResult<Self> {
                Ok(Self {
                    id: row.get("id")?,
                    title: row.get("title")?,
                })
            }
        }

        let task = Task::from_row(&task_row()).unwrap();
        assert_eq!(task.id, 7);
        assert_eq!(task.title, "write docs");
    }

    #[test]
    fn test_decode_rows_empty() {
        let rows: Vec<SqliteRow> = Vec::new();
        assert!(decode_rows(&rows).is_empty());
    }
}
