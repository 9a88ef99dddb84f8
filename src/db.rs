//! Dictionary-style facade over a connection.
//!
//! [`Tyrant`] maps get/set/delete/iterate onto the protocol commands,
//! handling column-encoded table records and optional list values joined by
//! a configured separator. It holds no record state of its own.

use std::collections::HashMap;

use crate::constant::{ExtFlags, MiscFlags};
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::query::Query;
use crate::record::{DbType, Value, parse_stats, parse_value, utf8_owned};
use crate::tokio::Conn;

pub struct Tyrant {
    conn: Conn,
    dbtype: DbType,
    separator: Option<String>,
    literal: bool,
}

impl Tyrant {
    /// Connect and probe the server for its database type.
    pub async fn open<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts: Opts = opts.try_into()?;
        let conn = Conn::connect::<Opts>(opts.clone()).await?;
        Self::from_conn(conn, &opts).await
    }

    /// Wrap an existing connection, probing the database type via STAT.
    pub async fn from_conn(conn: Conn, opts: &Opts) -> Result<Self> {
        let stats = parse_stats(&conn.stat().await?);
        let dbtype = DbType::from_stat(stats.get("type").map(String::as_str).unwrap_or(""));
        Ok(Self {
            conn,
            dbtype,
            separator: opts.separator.clone(),
            literal: opts.literal,
        })
    }

    /// The protocol connection, for commands the facade does not cover.
    pub fn conn(&self) -> &Conn {
        &self.conn
    }

    pub fn dbtype(&self) -> &DbType {
        &self.dbtype
    }

    /// Get the record under `key`, or `None` if it does not exist.
    pub async fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Value>> {
        match self.conn.get_raw(key).await {
            Ok(data) => parse_value(data, &self.dbtype, self.separator.as_deref(), self.literal),
            Err(Error::Server(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Store `value` under `key`.
    ///
    /// Column maps become a table record, lists are joined with the
    /// configured separator, text and raw bytes are stored as-is.
    pub async fn set(&self, key: impl AsRef<[u8]>, value: impl Into<Value>) -> Result<()> {
        let key = key.as_ref();
        match value.into() {
            Value::Columns(columns) => {
                let mut args: Vec<Vec<u8>> = Vec::with_capacity(1 + columns.len() * 2);
                args.push(key.to_vec());
                for (col, val) in columns {
                    args.push(col.into_bytes());
                    args.push(val.into_bytes());
                }
                self.conn
                    .misc("putlist", &args, MiscFlags::empty())
                    .await?;
                Ok(())
            }
            Value::List(items) => self.conn.put(key, self.join_list(&items)?).await,
            Value::Text(text) => self.conn.put(key, text).await,
            Value::Raw(data) => self.conn.put(key, data).await,
        }
    }

    /// Store `value` under `key` only if the key is new; fails with
    /// [`Error::KeyExists`] otherwise.
    pub async fn add(&self, key: impl AsRef<[u8]>, value: impl Into<Value>) -> Result<()> {
        let key = key.as_ref();
        let result = match value.into() {
            Value::Columns(_) => {
                return Err(Error::BadUsage(
                    "column records cannot be stored conditionally".to_string(),
                ));
            }
            Value::List(items) => self.conn.putkeep(key, self.join_list(&items)?).await,
            Value::Text(text) => self.conn.putkeep(key, text).await,
            Value::Raw(data) => self.conn.putkeep(key, data).await,
        };
        match result {
            Err(Error::Server(_)) => Err(Error::KeyExists),
            other => other,
        }
    }

    /// Remove the record under `key`; fails with [`Error::KeyMissing`] if it
    /// does not exist.
    pub async fn delete(&self, key: impl AsRef<[u8]>) -> Result<()> {
        match self.conn.out(key).await {
            Err(Error::Server(_)) => Err(Error::KeyMissing),
            other => other,
        }
    }

    pub async fn contains(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        match self.conn.vsiz(key).await {
            Ok(_) => Ok(true),
            Err(Error::Server(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Size of the value under `key`; fails with [`Error::KeyMissing`] if it
    /// does not exist.
    pub async fn size_of(&self, key: impl AsRef<[u8]>) -> Result<u32> {
        match self.conn.vsiz(key).await {
            Err(Error::Server(_)) => Err(Error::KeyMissing),
            other => other,
        }
    }

    /// Number of records in the database.
    pub async fn len(&self) -> Result<u64> {
        self.conn.rnum().await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Begin a lazy, single-shot iteration over all keys.
    pub async fn iter_keys(&self) -> Result<KeyIter<'_>> {
        self.conn.iterinit().await?;
        Ok(KeyIter {
            db: self,
            done: false,
        })
    }

    /// Collect all keys.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let mut iter = self.iter_keys().await?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_key().await? {
            keys.push(key);
        }
        Ok(keys)
    }

    /// Keys starting with `prefix`, up to `max` (all of them by default).
    pub async fn prefix_keys(&self, prefix: &str, max: Option<u32>) -> Result<Vec<String>> {
        let max = match max {
            Some(max) => max,
            None => u32::try_from(self.len().await?).unwrap_or(u32::MAX),
        };
        self.conn.fwmkeys(prefix, max).await
    }

    /// Remove all records.
    pub async fn clear(&self) -> Result<()> {
        self.conn.vanish().await
    }

    /// Synchronize updated content to storage.
    pub async fn sync(&self) -> Result<()> {
        self.conn.sync().await
    }

    /// The server status message parsed into a map.
    pub async fn stats(&self) -> Result<HashMap<String, String>> {
        Ok(parse_stats(&self.conn.stat().await?))
    }

    /// Fetch the records for `keys` in one round trip. Missing keys are
    /// absent from the result.
    pub async fn multi_get<K: AsRef<[u8]>>(
        &self,
        keys: &[K],
        no_update_log: bool,
    ) -> Result<HashMap<String, Value>> {
        let reply = self
            .conn
            .misc("getlist", keys, misc_opts(no_update_log))
            .await?;
        if reply.len() % 2 != 0 {
            return Err(Error::Decode(
                "getlist reply is not an interleaved key/value list".to_string(),
            ));
        }
        let mut records = HashMap::with_capacity(reply.len() / 2);
        let mut entries = reply.into_iter();
        while let (Some(key), Some(data)) = (entries.next(), entries.next()) {
            let key = utf8_owned(key)?;
            if let Some(value) =
                parse_value(data, &self.dbtype, self.separator.as_deref(), self.literal)?
            {
                records.insert(key, value);
            }
        }
        Ok(records)
    }

    /// Store all `items` in one round trip.
    pub async fn multi_set(
        &self,
        items: impl IntoIterator<Item = (String, Value)>,
        no_update_log: bool,
    ) -> Result<()> {
        let mut args: Vec<Vec<u8>> = Vec::new();
        for (key, value) in items {
            let data = match value {
                Value::Text(text) => text.into_bytes(),
                Value::Raw(data) => data,
                Value::List(list) => self.join_list(&list)?.into_bytes(),
                Value::Columns(_) => {
                    return Err(Error::BadUsage(
                        "column records cannot be stored via multi_set".to_string(),
                    ));
                }
            };
            args.push(key.into_bytes());
            args.push(data);
        }
        self.conn
            .misc("putlist", &args, misc_opts(no_update_log))
            .await?;
        Ok(())
    }

    /// Remove all `keys` in one round trip.
    pub async fn multi_delete<K: AsRef<[u8]>>(&self, keys: &[K], no_update_log: bool) -> Result<()> {
        self.conn
            .misc("outlist", keys, misc_opts(no_update_log))
            .await?;
        Ok(())
    }

    /// Read an integer counter; fails with [`Error::KeyMissing`] if absent.
    pub async fn get_int(&self, key: impl AsRef<[u8]>) -> Result<i32> {
        match self.conn.get_int(key).await {
            Err(Error::Server(_)) => Err(Error::KeyMissing),
            other => other,
        }
    }

    /// Read a double counter; fails with [`Error::KeyMissing`] if absent.
    pub async fn get_double(&self, key: impl AsRef<[u8]>) -> Result<f64> {
        match self.conn.get_double(key).await {
            Err(Error::Server(_)) => Err(Error::KeyMissing),
            other => other,
        }
    }

    /// Append to the record, optionally keeping only the trailing `width`
    /// bytes.
    pub async fn concat(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        width: Option<u32>,
    ) -> Result<()> {
        match width {
            Some(width) => self.conn.putshl(key, value, width).await,
            None => self.conn.putcat(key, value).await,
        }
    }

    /// Call the server-side script function `func(key, value)`.
    pub async fn call_ext(
        &self,
        func: &str,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        record_lock: bool,
        global_lock: bool,
    ) -> Result<String> {
        let mut opts = ExtFlags::empty();
        if record_lock {
            opts |= ExtFlags::LOCK_RECORD;
        }
        if global_lock {
            opts |= ExtFlags::LOCK_GLOBAL;
        }
        self.conn.ext(func, opts, key, value).await
    }

    /// Start a table query.
    pub fn query(&self) -> Query<'_> {
        Query::new(self)
    }

    fn join_list(&self, items: &[String]) -> Result<String> {
        let sep = self.separator.as_deref().ok_or(Error::SeparatorRequired)?;
        Ok(items.join(sep))
    }
}

fn misc_opts(no_update_log: bool) -> MiscFlags {
    if no_update_log {
        MiscFlags::NO_UPDATE_LOG
    } else {
        MiscFlags::empty()
    }
}

/// Lazy key iterator produced by [`Tyrant::iter_keys`].
///
/// The cursor lives on the server, so only one iteration can be active per
/// database at a time.
pub struct KeyIter<'a> {
    db: &'a Tyrant,
    done: bool,
}

impl KeyIter<'_> {
    pub async fn next_key(&mut self) -> Result<Option<String>> {
        if self.done {
            return Ok(None);
        }
        match self.db.conn.iternext().await? {
            Some(key) => Ok(Some(utf8_owned(key)?)),
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }
}
