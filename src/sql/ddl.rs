// Allow missing docs for the generated pest Rule enum
#![allow(missing_docs)]

//! Parser for the SQL surface simvec owns.
//!
//! Three entry points, all over the grammar in `sql.pest`:
//!
//! - [`parse_ddl`]: `CREATE [VECTOR] INDEX ... USING ... WITH (...)` and
//!   `DROP [VECTOR] INDEX …`;
//! - [`parse_distance_expr`]: the `distance_<metric>(column, :param)`
//!   call the planner hook recognizes inside ORDER BY;
//! - [`parse_vector_type`]: the `VECTOR(D)` column type declaration.
//!
//! Unknown `WITH` options are rejected, not ignored.

use crate::config::ExtensionConfig;
use crate::error::{Error, Result};
use crate::index::{HnswParams, IndexDescriptor, IndexKey, IndexKind};
use crate::metric::Metric;
use crate::quantization::Quantization;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

/// The pest parser generated from `sql.pest`.
#[derive(Parser)]
#[grammar = "sql/sql.pest"]
struct SqlParser;

/// A parsed vector-index DDL statement.
#[derive(Debug, Clone, PartialEq)]
pub enum DdlStatement {
    /// `CREATE [VECTOR] INDEX`.
    CreateIndex(CreateIndex),
    /// `DROP [VECTOR] INDEX name [ON table]`.
    DropIndex {
        /// Index name.
        name: String,
        /// Table, when the statement names one.
        table: Option<String>,
    },
}

/// Parsed `CREATE [VECTOR] INDEX` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndex {
    /// Index name.
    pub name: String,
    /// Target table.
    pub table: String,
    /// Target column.
    pub column: String,
    /// `USING` clause, when present.
    pub kind: Option<IndexKind>,
    /// `WITH (…)` options, defaults applied later.
    pub options: IndexOptions,
}

/// Recognized `WITH (…)` options. Every field is optional; defaults come
/// from [`ExtensionConfig`] when the descriptor is built.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexOptions {
    /// `metric = '…'`.
    pub metric: Option<Metric>,
    /// `m = N`.
    pub m: Option<u32>,
    /// `ef_construction = N`.
    pub ef_construction: Option<u32>,
    /// `ef_search = N`.
    pub ef_search: Option<u32>,
    /// `quantization = '…'`.
    pub quantization: Option<Quantization>,
    /// `seed = N`.
    pub seed: Option<u64>,
}

impl CreateIndex {
    /// Builds the index descriptor, filling unspecified options from the
    /// configuration defaults and the column's declared dimension.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for invalid combinations (delegated to
    /// descriptor validation).
    pub fn into_descriptor(
        self,
        config: &ExtensionConfig,
        dimension: u32,
    ) -> Result<IndexDescriptor> {
        let mut params = HnswParams::default();
        if let Some(m) = self.options.m {
            params = params.with_m(m);
        }
        if let Some(ef) = self.options.ef_construction {
            params = params.with_ef_construction(ef);
        }
        if let Some(ef) = self.options.ef_search {
            params = params.with_ef_search(ef);
        }
        if let Some(seed) = self.options.seed {
            params = params.with_seed(seed);
        }

        let descriptor = IndexDescriptor {
            key: IndexKey::new(self.table, self.column),
            kind: self.kind.unwrap_or(config.default_index_kind),
            metric: self.options.metric.unwrap_or(config.default_metric),
            quantization: self
                .options
                .quantization
                .unwrap_or(config.default_quantization),
            dimension,
            params,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

/// Cheap routing test: does this statement look like vector-index DDL?
/// Hosts call this before handing a statement to [`parse_ddl`].
#[must_use]
pub fn is_vector_ddl(sql: &str) -> bool {
    let mut words = sql.split_whitespace().map(str::to_ascii_uppercase);
    let first = words.next();
    let second = words.next();
    let third = words.next();
    matches!(
        (first.as_deref(), second.as_deref(), third.as_deref()),
        (Some("CREATE" | "DROP"), Some("VECTOR"), Some("INDEX"))
            | (Some("CREATE" | "DROP"), Some("INDEX"), _)
    )
}

/// Parses a vector-index DDL statement.
///
/// # Errors
///
/// [`Error::Config`] for syntax errors, unknown `USING` kinds, unknown
/// or ill-typed `WITH` options.
pub fn parse_ddl(sql: &str) -> Result<DdlStatement> {
    let mut pairs = SqlParser::parse(Rule::statement, sql)
        .map_err(|err| Error::Config(format!("DDL syntax error: {err}")))?;
    let statement = pairs.next().expect("statement rule matched");
    let inner = statement
        .into_inner()
        .next()
        .expect("statement wraps one alternative");

    match inner.as_rule() {
        Rule::create_index => parse_create(inner),
        Rule::drop_index => {
            let mut parts = inner.into_inner();
            let name = parts.next().expect("index name").as_str().to_string();
            let table = parts.next().map(|pair| pair.as_str().to_string());
            Ok(DdlStatement::DropIndex { name, table })
        }
        rule => Err(Error::Config(format!("unexpected DDL rule: {rule:?}"))),
    }
}

fn parse_create(pair: Pair<'_, Rule>) -> Result<DdlStatement> {
    let mut parts = pair.into_inner();
    let name = parts.next().expect("index name").as_str().to_string();
    let table = parts.next().expect("table name").as_str().to_string();
    let column = parts.next().expect("column name").as_str().to_string();

    let mut kind = None;
    let mut options = IndexOptions::default();
    for clause in parts {
        match clause.as_rule() {
            Rule::using_clause => {
                let raw = clause
                    .into_inner()
                    .next()
                    .expect("using kind")
                    .as_str();
                kind = Some(IndexKind::parse(raw).ok_or_else(|| {
                    Error::Config(format!("unknown index kind: '{raw}'"))
                })?);
            }
            Rule::with_clause => {
                for option in clause.into_inner() {
                    apply_option(&mut options, option)?;
                }
            }
            rule => return Err(Error::Config(format!("unexpected clause: {rule:?}"))),
        }
    }

    Ok(DdlStatement::CreateIndex(CreateIndex {
        name,
        table,
        column,
        kind,
        options,
    }))
}

fn apply_option(options: &mut IndexOptions, pair: Pair<'_, Rule>) -> Result<()> {
    let mut parts = pair.into_inner();
    let name = parts.next().expect("option name").as_str().to_ascii_lowercase();
    let value = parts.next().expect("option value");
    let value_pair = value.into_inner().next().expect("string or number");

    let text = match value_pair.as_rule() {
        Rule::string => value_pair
            .into_inner()
            .next()
            .expect("string body")
            .as_str()
            .to_string(),
        Rule::number => value_pair.as_str().to_string(),
        rule => return Err(Error::Config(format!("unexpected option value: {rule:?}"))),
    };

    let parse_u32 = |text: &str, option: &str| -> Result<u32> {
        text.parse()
            .map_err(|_| Error::Config(format!("option {option} expects an integer, got '{text}'")))
    };

    match name.as_str() {
        "metric" => {
            options.metric = Some(Metric::parse(&text.to_ascii_lowercase()).ok_or_else(
                || Error::Config(format!("unknown metric: '{text}'")),
            )?);
        }
        "m" => options.m = Some(parse_u32(&text, "m")?),
        "ef_construction" => {
            options.ef_construction = Some(parse_u32(&text, "ef_construction")?);
        }
        "ef_search" => options.ef_search = Some(parse_u32(&text, "ef_search")?),
        "quantization" => {
            options.quantization = Some(
                Quantization::parse(&text.to_ascii_lowercase()).ok_or_else(|| {
                    Error::Config(format!("unknown quantization: '{text}'"))
                })?,
            );
        }
        "seed" => {
            options.seed = Some(text.parse().map_err(|_| {
                Error::Config(format!("option seed expects an integer, got '{text}'"))
            })?);
        }
        other => return Err(Error::Config(format!("unknown index option: '{other}'"))),
    }
    Ok(())
}

/// A recognized `distance_<metric>(column, :param)` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistanceCall {
    /// Metric named by the function.
    pub metric: Metric,
    /// Column argument.
    pub column: String,
    /// Parameter placeholder (`:name` or `?`).
    pub param: String,
}

/// Parses a distance call; `Ok(None)` when the expression has a valid
/// shape but an unrecognized function name (the planner then declines).
///
/// # Errors
///
/// [`Error::Config`] when the text is not `fn(ident, :param)` shaped at
/// all.
pub fn parse_distance_expr(expr: &str) -> Result<Option<DistanceCall>> {
    let mut pairs = SqlParser::parse(Rule::distance_expr, expr)
        .map_err(|err| Error::Config(format!("expression syntax error: {err}")))?;
    let mut parts = pairs.next().expect("distance_expr matched").into_inner();
    let function = parts.next().expect("function name").as_str();
    let column = parts.next().expect("column").as_str().to_string();
    let param = parts.next().expect("param").as_str().to_string();

    let lowered = function.to_ascii_lowercase();
    let metric_name = lowered
        .strip_prefix("distance_")
        .or_else(|| lowered.strip_prefix("vector_distance_"));
    let Some(metric_name) = metric_name else {
        return Ok(None);
    };
    let Some(metric) = Metric::parse(metric_name) else {
        return Ok(None);
    };
    Ok(Some(DistanceCall {
        metric,
        column,
        param,
    }))
}

/// Parses a `VECTOR(D)` type declaration; `Ok(None)` when the text is a
/// different type entirely.
///
/// # Errors
///
/// [`Error::Config`] when it is a VECTOR declaration with an invalid
/// dimension.
pub fn parse_vector_type(decl: &str) -> Result<Option<u32>> {
    let Ok(mut pairs) = SqlParser::parse(Rule::vector_type, decl) else {
        return Ok(None);
    };
    let number = pairs
        .next()
        .expect("vector_type matched")
        .into_inner()
        .next()
        .expect("dimension number");
    let dimension: u32 = number
        .as_str()
        .parse()
        .map_err(|_| Error::Config(format!("invalid vector dimension: '{}'", number.as_str())))?;
    if dimension == 0 {
        return Err(Error::Config("vector dimension must be at least 1".into()));
    }
    Ok(Some(dimension))
}
