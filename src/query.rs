//! Table query builder.
//!
//! A [`Query`] accumulates filter conditions and an ordering, compiles them
//! into the argument list of `misc("search", ..)` and materializes matched
//! records by fetching each returned key. Result windows are cached per
//! `(offset, limit)` until the conditions or ordering change.

use std::collections::HashMap;

use crate::constant::{ConditionOp, MiscFlags, OrderDir};
use crate::db::Tyrant;
use crate::error::{Error, Result};
use crate::record::Value;

/// Default window size when a slice has no upper bound.
pub const MAX_RESULTS: u32 = 1000;

/// A filter expression, tagged with the condition family it selects.
///
/// Text expressions pick the string operators, numbers pick the numeric
/// ones, mirroring how the server treats column payloads.
#[derive(Debug, Clone)]
pub enum ConditionExpr {
    Text(String),
    Number(String),
}

impl From<&str> for ConditionExpr {
    fn from(v: &str) -> Self {
        ConditionExpr::Text(v.to_string())
    }
}

impl From<String> for ConditionExpr {
    fn from(v: String) -> Self {
        ConditionExpr::Text(v)
    }
}

macro_rules! numeric_expr {
    ($($ty:ty),*) => {
        $(impl From<$ty> for ConditionExpr {
            fn from(v: $ty) -> Self {
                ConditionExpr::Number(v.to_string())
            }
        })*
    };
}

numeric_expr!(i32, i64, u32, u64, f64);

/// One search condition. Conditions added to a query are AND-combined;
/// see [`Condition::or`] for the narrow OR support the server offers.
#[derive(Debug, Clone)]
pub struct Condition {
    pub column: String,
    pub op: ConditionOp,
    pub expr: String,
}

impl Condition {
    pub fn new(column: impl Into<String>, op: ConditionOp, expr: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            op,
            expr: expr.into(),
        }
    }

    /// Build a condition from a `column` or `column__op` spelling.
    ///
    /// The op suffix is one of `eq`, `lt`, `le`, `gt`, `ge`, `contains`,
    /// `startswith`, `endswith`, `matchregex`, defaulting to `eq`. Whether
    /// the string or the numeric operator is chosen follows the expression
    /// type.
    pub fn from_spec(spec: &str, expr: impl Into<ConditionExpr>) -> Result<Self> {
        let (column, op_name) = match spec.split_once("__") {
            Some((column, op_name)) => (column, op_name),
            None => (spec, "eq"),
        };
        if column.is_empty() {
            return Err(Error::BadUsage(format!("empty column in '{spec}'")));
        }
        let (op, expr) = match expr.into() {
            ConditionExpr::Text(text) => {
                let op = match op_name {
                    "eq" => ConditionOp::StrEq,
                    "contains" => ConditionOp::StrInc,
                    "startswith" => ConditionOp::StrBw,
                    "endswith" => ConditionOp::StrEw,
                    "matchregex" => ConditionOp::StrRx,
                    other => {
                        return Err(Error::BadUsage(format!(
                            "no string condition named '{other}'"
                        )));
                    }
                };
                (op, text)
            }
            ConditionExpr::Number(num) => {
                let op = match op_name {
                    "eq" => ConditionOp::NumEq,
                    "gt" => ConditionOp::NumGt,
                    "ge" => ConditionOp::NumGe,
                    "lt" => ConditionOp::NumLt,
                    "le" => ConditionOp::NumLe,
                    other => {
                        return Err(Error::BadUsage(format!(
                            "no numeric condition named '{other}'"
                        )));
                    }
                };
                (op, num)
            }
        };
        Ok(Self::new(column, op, expr))
    }

    /// Fuse `self OR other` into a single condition.
    ///
    /// The server only supports this for equality and containment within
    /// one condition family: the fused operator is the `*_or` variant and
    /// the expression becomes `"lhs,rhs"`.
    pub fn or(&self, other: &Condition) -> Result<Condition> {
        let fused = match (self.op, other.op) {
            (ConditionOp::StrEq, ConditionOp::StrEq) => ConditionOp::StrOrEq,
            (ConditionOp::StrInc, ConditionOp::StrInc) => ConditionOp::StrOr,
            (ConditionOp::NumEq, ConditionOp::NumEq) => ConditionOp::NumOrEq,
            (lhs, rhs) => {
                return Err(Error::UnsupportedCombination(format!(
                    "{lhs:?} | {rhs:?}; only eq and contains within one family can be OR-combined"
                )));
            }
        };
        Ok(Condition {
            column: self.column.clone(),
            op: fused,
            expr: format!("{},{}", self.expr, other.expr),
        })
    }
}

/// Result ordering, parsed from the `[-][#]column` spelling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub dir: OrderDir,
}

impl Order {
    /// `col` sorts as ascending strings; a `-` prefix flips the direction
    /// and a `#` prefix compares as numbers: `-#rank` is numeric descending.
    pub fn parse(spec: &str) -> Self {
        let (column, dir) = if let Some(rest) = spec.strip_prefix("-#") {
            (rest, OrderDir::NumDesc)
        } else if let Some(rest) = spec.strip_prefix('-') {
            (rest, OrderDir::StrDesc)
        } else if let Some(rest) = spec.strip_prefix('#') {
            (rest, OrderDir::NumAsc)
        } else {
            (spec, OrderDir::StrAsc)
        };
        Self {
            column: column.to_string(),
            dir,
        }
    }
}

/// Compile conditions, ordering and window into `misc("search", ..)`
/// arguments, in the order the server expects them.
pub(crate) fn build_search_args(
    conditions: &[Condition],
    order: Option<&Order>,
    window: Option<(u32, u32)>,
) -> Vec<Vec<u8>> {
    let mut args = Vec::with_capacity(conditions.len() + 2);
    for cond in conditions {
        args.push(
            format!(
                "addcond\0{}\0{}\0{}",
                cond.column, cond.op as u32, cond.expr
            )
            .into_bytes(),
        );
    }
    if let Some(order) = order {
        args.push(format!("setorder\0{}\0{}", order.column, order.dir as u32).into_bytes());
    }
    if let Some((offset, limit)) = window
        && limit > 0
    {
        args.push(format!("setlimit\0{limit}\0{offset}").into_bytes());
    }
    args
}

/// `(offset, limit)` for a single-element access.
pub(crate) fn window_for_item(i: i64) -> Result<(u32, u32)> {
    if i < 0 {
        return Err(Error::InvalidRange);
    }
    Ok((i as u32, 1))
}

/// `(offset, limit)` for a `[start, stop)` access.
///
/// A `stop` at or before `start` computes a zero limit, for which no
/// `setlimit` argument is emitted and the server applies no window.
pub(crate) fn window_for_slice(start: i64, stop: Option<i64>) -> Result<(u32, u32)> {
    if start < 0 || stop.is_some_and(|s| s < 0) {
        return Err(Error::InvalidRange);
    }
    let limit = match stop {
        Some(stop) if stop <= start => 0,
        Some(stop) => (stop - start) as u32,
        None => MAX_RESULTS,
    };
    Ok((start as u32, limit))
}

/// A lazy table query bound to one [`Tyrant`] handle.
pub struct Query<'a> {
    db: &'a Tyrant,
    conditions: Vec<Condition>,
    order: Option<Order>,
    opts: MiscFlags,
    cache: HashMap<(u32, u32), Vec<(String, Value)>>,
}

impl<'a> Query<'a> {
    pub(crate) fn new(db: &'a Tyrant) -> Self {
        Self {
            db,
            conditions: Vec::new(),
            order: None,
            opts: MiscFlags::empty(),
            cache: HashMap::new(),
        }
    }

    /// Add a condition in the `column__op` spelling. Invalidates cached
    /// windows.
    pub fn filter(&mut self, spec: &str, expr: impl Into<ConditionExpr>) -> Result<&mut Self> {
        let cond = Condition::from_spec(spec, expr)?;
        Ok(self.filter_cond(cond))
    }

    /// Add a pre-built condition. Invalidates cached windows.
    pub fn filter_cond(&mut self, cond: Condition) -> &mut Self {
        self.cache.clear();
        self.conditions.push(cond);
        self
    }

    /// Set the result order from the `[-][#]column` spelling. Invalidates
    /// cached windows.
    pub fn order(&mut self, spec: &str) -> &mut Self {
        self.cache.clear();
        self.order = Some(Order::parse(spec));
        self
    }

    /// Keep this search out of the server's update log.
    pub fn no_update_log(&mut self) -> &mut Self {
        self.opts |= MiscFlags::NO_UPDATE_LOG;
        self
    }

    /// Fetch the result at position `i`.
    pub async fn item(&mut self, i: i64) -> Result<Option<(String, Value)>> {
        let window = window_for_item(i)?;
        let page = self.window(window).await?;
        Ok(page.first().cloned())
    }

    /// Fetch the results in `[start, stop)`; `stop` defaults to a window of
    /// [`MAX_RESULTS`]. A `stop` at or before `start` runs the search
    /// unwindowed, so the server returns every match.
    pub async fn slice(&mut self, start: i64, stop: Option<i64>) -> Result<Vec<(String, Value)>> {
        let window = window_for_slice(start, stop)?;
        let page = self.window(window).await?;
        Ok(page.clone())
    }

    /// Number of results within the default window.
    pub async fn count(&mut self) -> Result<usize> {
        Ok(self.slice(0, None).await?.len())
    }

    async fn window(&mut self, window: (u32, u32)) -> Result<&Vec<(String, Value)>> {
        if !self.cache.contains_key(&window) {
            let keys = self
                .db
                .conn()
                .search(&self.conditions, self.order.as_ref(), Some(window), self.opts)
                .await?;
            let mut page = Vec::with_capacity(keys.len());
            for key in keys {
                // A record vanishing between search and fetch is dropped
                // from the page.
                if let Some(value) = self.db.get(&key).await? {
                    page.push((key, value));
                }
            }
            self.cache.insert(window, page);
        }
        self.cache
            .get(&window)
            .ok_or_else(|| Error::LibraryBug(crate::error::eyre!("window vanished from cache")))
    }
}
