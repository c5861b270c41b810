//! Query-string filter parsing.
//!
//! Turns `?age[gte]=18&name={"sw":"J"}&active=true` into a list of
//! [`Filter`]s a handler can translate into whatever its storage layer
//! understands. Three spellings are accepted per parameter:
//!
//! | Form | Example | Result |
//! |---|---|---|
//! | bracketed operator | `age[gt]=5` | `age > "5"` |
//! | JSON object | `age={"lt":100}` | `age < 100` (one filter per key) |
//! | plain | `name=John` | `name = "John"` |
//!
//! Operator names are case-insensitive; unknown names mean equality.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::app_error::AppError;
use crate::request::Request;

/// A comparison operator.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(into = "&'static str")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    NotContains,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
    Between,
    Before,
    After,
}

impl Operator {
    /// Maps an operator name to an operator. Anything unrecognised is
    /// [`Operator::Eq`].
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "gt"                     => Self::Gt,
            "gte"                    => Self::Gte,
            "lt"                     => Self::Lt,
            "lte"                    => Self::Lte,
            "ne"                     => Self::Ne,
            "sw" | "startswith"      => Self::StartsWith,
            "ew" | "endswith"        => Self::EndsWith,
            "includes" | "contains"  => Self::Contains,
            "notcontains"            => Self::NotContains,
            "notstartswith"          => Self::NotStartsWith,
            "notendswith"            => Self::NotEndsWith,
            "between"                => Self::Between,
            "before"                 => Self::Before,
            "after"                  => Self::After,
            _                        => Self::Eq,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq            => "=",
            Self::Ne            => "!=",
            Self::Gt            => ">",
            Self::Gte           => ">=",
            Self::Lt            => "<",
            Self::Lte           => "<=",
            Self::Contains      => "contains",
            Self::NotContains   => "doesNotContain",
            Self::StartsWith    => "startsWith",
            Self::NotStartsWith => "doesNotStartWith",
            Self::EndsWith      => "endsWith",
            Self::NotEndsWith   => "doesNotEndWith",
            Self::Between       => "between",
            Self::Before        => "before",
            Self::After         => "after",
        }
    }
}

impl From<Operator> for &'static str {
    fn from(op: Operator) -> Self {
        op.as_str()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One condition. Values from the bracketed and plain forms are always
/// strings; the JSON form keeps the JSON type.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Filter {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

impl Filter {
    fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self { field: field.into(), operator, value: value.into() }
    }
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid JSON filter: {0}")]
    Unterminated(String),

    #[error("invalid JSON filter for `{field}`: {source}")]
    Json {
        field: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<FilterError> for AppError {
    fn from(err: FilterError) -> Self {
        AppError::bad_request("Invalid query filter").with_error(err)
    }
}

/// Parses a raw query string (without the leading `?`).
///
/// Filters come out in query order; the keys of one JSON object come out in
/// sorted order.
pub fn parse(query: &str) -> Result<Vec<Filter>, FilterError> {
    let mut filters = Vec::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if let Some((field, op)) = bracketed(&key) {
            filters.push(Filter::new(field, Operator::from_name(op), value.into_owned()));
        } else if value.starts_with('{') {
            if !value.ends_with('}') {
                return Err(FilterError::Unterminated(value.into_owned()));
            }
            let object: serde_json::Map<String, Value> = serde_json::from_str(&value)
                .map_err(|source| FilterError::Json { field: key.to_string(), source })?;
            filters.extend(
                object
                    .into_iter()
                    .map(|(op, v)| Filter::new(&*key, Operator::from_name(&op), v)),
            );
        } else {
            filters.push(Filter::new(&*key, Operator::Eq, value.into_owned()));
        }
    }
    Ok(filters)
}

/// Filters from a request's query string. No query means no filters.
pub fn from_request(req: &Request) -> Result<Vec<Filter>, FilterError> {
    parse(req.query().unwrap_or_default())
}

/// Splits `field[op]` into its parts.
fn bracketed(key: &str) -> Option<(&str, &str)> {
    let (field, rest) = key.split_once('[')?;
    let (op, _) = rest.split_once(']')?;
    Some((field, op))
}
