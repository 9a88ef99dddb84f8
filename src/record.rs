//! Record parsing: table columns, separator lists, and the STAT blob.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Validated UTF-8 view over reply bytes.
pub(crate) fn utf8(data: &[u8]) -> Result<&str> {
    simdutf8::basic::from_utf8(data).map_err(|_| Error::Decode("invalid UTF-8".to_string()))
}

pub(crate) fn utf8_owned(data: Vec<u8>) -> Result<String> {
    utf8(&data)?;
    // The check above guarantees validity.
    String::from_utf8(data).map_err(|_| Error::Decode("invalid UTF-8".to_string()))
}

/// The database type the server reports in its STAT blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbType {
    Hash,
    BTree,
    Table,
    /// on-memory hash
    Memory,
    Other(String),
}

impl DbType {
    pub fn from_stat(value: &str) -> Self {
        match value {
            "hash" => DbType::Hash,
            "B+ tree" => DbType::BTree,
            "table" => DbType::Table,
            "on-memory hash" => DbType::Memory,
            other => DbType::Other(other.to_string()),
        }
    }
}

/// A record value as seen through the dictionary facade.
///
/// Which variants appear depends on the server database type and the
/// configured separator/literal options.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Raw(Vec<u8>),
    List(Vec<String>),
    Columns(HashMap<String, String>),
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Raw(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Raw(v.to_vec())
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::List(v)
    }
}

impl From<Vec<&str>> for Value {
    fn from(v: Vec<&str>) -> Self {
        Value::List(v.into_iter().map(str::to_string).collect())
    }
}

impl From<HashMap<String, String>> for Value {
    fn from(v: HashMap<String, String>) -> Self {
        Value::Columns(v)
    }
}

/// Parse a table record payload: NUL-separated `col, val` tokens.
///
/// An empty leading token means "no record". An odd token count has no
/// meaning on the wire and is rejected.
pub fn parse_columns(data: &[u8]) -> Result<Option<HashMap<String, String>>> {
    let text = utf8(data)?;
    let mut tokens = text.split('\0');
    let Some(first) = tokens.next() else {
        return Ok(None);
    };
    if first.is_empty() {
        return Ok(None);
    }

    let mut columns = HashMap::new();
    let mut name = Some(first);
    for token in tokens {
        match name.take() {
            Some(n) => {
                columns.insert(n.to_string(), token.to_string());
            }
            None => name = Some(token),
        }
    }
    if name.is_some() {
        return Err(Error::Decode(
            "table record has a column name without a value".to_string(),
        ));
    }
    Ok(Some(columns))
}

/// Interpret a raw GET payload according to the database type and options.
///
/// `Ok(None)` means the payload encodes "no record" (table mode only).
pub fn parse_value(
    data: Vec<u8>,
    dbtype: &DbType,
    separator: Option<&str>,
    literal: bool,
) -> Result<Option<Value>> {
    if *dbtype == DbType::Table {
        return Ok(parse_columns(&data)?.map(Value::Columns));
    }
    if literal {
        return Ok(Some(Value::Raw(data)));
    }
    let text = utf8_owned(data)?;
    if let Some(sep) = separator
        && text.contains(sep)
    {
        return Ok(Some(Value::List(
            text.split(sep).map(str::to_string).collect(),
        )));
    }
    Ok(Some(Value::Text(text)))
}

/// Parse the STAT reply: `key\tvalue` lines separated by newlines.
pub fn parse_stats(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            line.split_once('\t')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect()
}
