//! SQL database wrapper
//!
//! [`SqlDatabase`] is everything the engines need from a database: a dialect
//! name, table discovery, a textual table description and statement
//! execution. [`SqliteDatabase`] is the bundled implementation.

use crate::error::{NlSqlError, Result};
use crate::schema::Metadata;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

pub trait SqlDatabase: Send + Sync {
    /// Name of the SQL variant, interpolated into text-to-SQL prompts.
    fn dialect(&self) -> &str;

    fn get_usable_table_names(&self) -> Result<Vec<String>>;

    /// Human-readable description of one table's structure.
    fn get_single_table_info(&self, table_name: &str) -> Result<String>;

    /// Runs `sql` and returns the rendered result plus result metadata.
    fn run_sql(&self, sql: &str) -> Result<(String, Metadata)>;
}

pub struct SqliteDatabase {
    db: Mutex<Connection>,
    include_tables: Option<Vec<String>>,
    ignore_tables: Vec<String>,
    max_string_length: usize,
}

impl SqliteDatabase {
    /// Cell strings longer than this are cut at a word boundary.
    pub const DEFAULT_MAX_STRING_LENGTH: usize = 300;

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Connection::open(path.as_ref())
            .map_err(|e| NlSqlError::Database(format!("Failed to open database: {}", e)))?;
        Ok(Self::from_connection(db))
    }

    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let db = Connection::open_with_flags(path.as_ref(), OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| NlSqlError::Database(format!("Failed to open database: {}", e)))?;
        Ok(Self::from_connection(db))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    pub fn from_connection(db: Connection) -> Self {
        Self {
            db: Mutex::new(db),
            include_tables: None,
            ignore_tables: Vec::new(),
            max_string_length: Self::DEFAULT_MAX_STRING_LENGTH,
        }
    }

    /// Restricts usable tables to `tables`. Every name must exist.
    pub fn with_include_tables(mut self, tables: Vec<String>) -> Result<Self> {
        let all = self.all_table_names()?;
        if let Some(missing) = tables.iter().find(|t| !all.contains(t)) {
            return Err(NlSqlError::Configuration(format!(
                "include_tables {} not found in database",
                missing
            )));
        }
        self.include_tables = Some(tables);
        Ok(self)
    }

    /// Hides `tables` from table discovery. Every name must exist.
    pub fn with_ignore_tables(mut self, tables: Vec<String>) -> Result<Self> {
        let all = self.all_table_names()?;
        if let Some(missing) = tables.iter().find(|t| !all.contains(t)) {
            return Err(NlSqlError::Configuration(format!(
                "ignore_tables {} not found in database",
                missing
            )));
        }
        self.ignore_tables = tables;
        Ok(self)
    }

    pub fn with_max_string_length(mut self, max_string_length: usize) -> Self {
        self.max_string_length = max_string_length;
        self
    }

    /// Runs setup statements (DDL, seed data) in one batch.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| NlSqlError::Database("Database connection lock poisoned".to_string()))
    }

    fn all_table_names(&self) -> Result<Vec<String>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn render_value(&self, value: ValueRef<'_>) -> (String, Value) {
        match value {
            ValueRef::Null => ("None".to_string(), Value::Null),
            ValueRef::Integer(i) => (i.to_string(), Value::from(i)),
            ValueRef::Real(f) => (
                python_float_repr(f),
                serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
            ),
            ValueRef::Text(bytes) => {
                let text = truncate_word(&String::from_utf8_lossy(bytes), self.max_string_length);
                (python_str_repr(&text), Value::String(text))
            }
            ValueRef::Blob(bytes) => {
                let escaped = bytes.escape_ascii().to_string();
                (format!("b'{}'", escaped), Value::String(escaped))
            }
        }
    }
}

impl SqlDatabase for SqliteDatabase {
    fn dialect(&self) -> &str {
        "sqlite"
    }

    fn get_usable_table_names(&self) -> Result<Vec<String>> {
        if let Some(ref include) = self.include_tables {
            let mut names = include.clone();
            names.sort();
            return Ok(names);
        }
        Ok(self
            .all_table_names()?
            .into_iter()
            .filter(|name| !self.ignore_tables.contains(name))
            .collect())
    }

    fn get_single_table_info(&self, table_name: &str) -> Result<String> {
        if !self.all_table_names()?.iter().any(|t| t == table_name) {
            return Err(NlSqlError::Database(format!("Table '{}' not found", table_name)));
        }

        let db = self.conn()?;
        let quoted = quote_identifier(table_name);

        let mut stmt = db.prepare(&format!("PRAGMA table_info({})", quoted))?;
        let columns = stmt
            .query_map([], |row| {
                let name: String = row.get(1)?;
                let data_type: String = row.get(2)?;
                Ok(format!("{} ({})", name, data_type))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stmt = db.prepare(&format!("PRAGMA foreign_key_list({})", quoted))?;
        let foreign_keys = stmt
            .query_map([], |row| {
                let referred_table: String = row.get(2)?;
                let from: String = row.get(3)?;
                let to: Option<String> = row.get(4)?;
                Ok(format!(
                    "{} -> {}.{}",
                    from,
                    referred_table,
                    to.unwrap_or_default()
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(format!(
            "Table '{}' has columns: {}, and foreign keys: {}.",
            table_name,
            columns.join(", "),
            foreign_keys.join(", ")
        ))
    }

    fn run_sql(&self, sql: &str) -> Result<(String, Metadata)> {
        debug!("Running SQL: {}", sql);
        let db = self.conn()?;
        let mut stmt = db.prepare(sql)?;

        if stmt.column_count() == 0 {
            stmt.raw_execute()?;
            return Ok((String::new(), Metadata::new()));
        }

        let col_keys: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let width = col_keys.len();

        let mut rendered_rows = Vec::new();
        let mut json_rows = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut rendered = Vec::with_capacity(width);
            let mut json = Vec::with_capacity(width);
            for idx in 0..width {
                let (text, value) = self.render_value(row.get_ref(idx)?);
                rendered.push(text);
                json.push(value);
            }
            rendered_rows.push(python_tuple(&rendered));
            json_rows.push(Value::Array(json));
        }

        let mut metadata = Metadata::new();
        metadata.insert("result".to_string(), Value::Array(json_rows));
        metadata.insert(
            "col_keys".to_string(),
            Value::Array(col_keys.into_iter().map(Value::String).collect()),
        );

        Ok((format!("[{}]", rendered_rows.join(", ")), metadata))
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Cuts `content` to at most `length` characters, backing off to the last
/// word boundary and appending `...`.
fn truncate_word(content: &str, length: usize) -> String {
    const SUFFIX: &str = "...";
    if length == 0 || content.chars().count() <= length {
        return content.to_string();
    }
    let head: String = content.chars().take(length.saturating_sub(SUFFIX.len())).collect();
    let cut = match head.rfind(' ') {
        Some(pos) => &head[..pos],
        None => head.as_str(),
    };
    format!("{}{}", cut, SUFFIX)
}

/// Shortest round-trip digits, positional for exponents in `-4..16` and
/// scientific with a signed two-digit exponent otherwise (`1e+16`, `1.5e-05`).
fn python_float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let sci = format!("{:e}", value);
    let (mantissa, exponent) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };
    let (sign, mantissa) = match mantissa.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", mantissa),
    };

    if !(-4..16).contains(&exponent) {
        return format!(
            "{}{}e{}{:02}",
            sign,
            mantissa,
            if exponent < 0 { '-' } else { '+' },
            exponent.abs()
        );
    }

    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let body = if exponent < 0 {
        format!("0.{}{}", "0".repeat((-exponent - 1) as usize), digits)
    } else {
        let int_len = exponent as usize + 1;
        if digits.len() <= int_len {
            format!("{}{}.0", digits, "0".repeat(int_len - digits.len()))
        } else {
            format!("{}.{}", &digits[..int_len], &digits[int_len..])
        }
    };
    format!("{}{}", sign, body)
}

fn python_str_repr(text: &str) -> String {
    let quote = if text.contains('\'') && !text.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(text.len() + 2);
    out.push(quote);
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn python_tuple(items: &[String]) -> String {
    match items {
        [single] => format!("({},)", single),
        _ => format!("({})", items.join(", ")),
    }
}
