//! Declarative report compilation.
//!
//! Turns a [`QueryConfig`] into a [`CompiledQuery`]: a typed [`Query`] plus
//! the values for every placeholder it mentions. Request values never enter
//! the SQL text.
//!
//! ```text
//! QueryConfig → whitelist checks → SELECT / FROM+JOIN / WHERE / GROUP BY / ORDER BY → Query
//! ```
//!
//! # Example
//!
//! ```ignore
//! use quarry::compile::QueryCompiler;
//! use quarry::schema::SchemaWhitelist;
//! use quarry::sql::Dialect;
//!
//! let whitelist = SchemaWhitelist::builtin()?;
//! let compiler = QueryCompiler::new(&whitelist, Dialect::Postgres);
//! let compiled = compiler.compile(&config, &params)?;
//! println!("{}", compiled.sql());
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::report::config::{parse_direction, parse_join_type, UnsupportedKeyword};
use crate::report::{
    Aggregate, ColumnRef, FilterOperator, FilterSpec, Logic, ParamValue, Params, QueryConfig,
};
use crate::schema::SchemaWhitelist;
use crate::sql::dialect::helpers::is_plain_identifier;
use crate::sql::expr::{
    avg, count, false_predicate, max, min, placeholder, sum, table_col, Expr, ExprExt,
};
use crate::sql::query::{OrderByExpr, Query, SelectExpr, TableRef};
use crate::sql::raw::RawStatement;
use crate::sql::{Dialect, JoinType, SortDir};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during compilation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("report has no tables")]
    EmptyTables,

    #[error("report selects no columns")]
    EmptyColumns,

    #[error("table '{0}' is not in the schema whitelist")]
    DisallowedTable(String),

    #[error("column '{table}.{column}' is not in the schema whitelist")]
    DisallowedColumn { table: String, column: String },

    #[error("unknown table alias '{0}'")]
    UnknownAlias(String),

    #[error("table alias '{0}' is used twice")]
    DuplicateAlias(String),

    #[error("'{0}' is not a valid identifier")]
    InvalidIdentifier(String),

    #[error("table '{0}' is not joined to any earlier table")]
    UnjoinedTable(String),

    #[error("invalid join {left} -> {right}: {detail}")]
    InvalidJoin {
        left: String,
        right: String,
        detail: String,
    },

    #[error(transparent)]
    Unsupported(#[from] UnsupportedKeyword),

    #[error("missing parameter '{0}'")]
    MissingParameter(String),

    #[error("invalid parameter '{name}': {detail}")]
    InvalidParameter { name: String, detail: String },
}

impl CompileError {
    /// The closed reason code reported to authors.
    pub fn reason(&self) -> &'static str {
        match self {
            CompileError::EmptyTables => "empty-tables",
            CompileError::EmptyColumns => "empty-columns",
            CompileError::DisallowedTable(_) => "disallowed-table",
            CompileError::DisallowedColumn { .. } => "disallowed-column",
            CompileError::UnknownAlias(_) => "unknown-alias",
            CompileError::DuplicateAlias(_) => "duplicate-alias",
            CompileError::InvalidIdentifier(_) => "invalid-identifier",
            CompileError::UnjoinedTable(_) => "unjoined-table",
            CompileError::InvalidJoin { .. } => "invalid-join",
            CompileError::Unsupported(e) => match e.kind {
                "aggregate" => "unsupported-aggregate",
                "operator" => "unsupported-operator",
                "direction" => "unsupported-direction",
                "join type" => "unsupported-join-type",
                _ => "unsupported-logic",
            },
            CompileError::MissingParameter(_) => "missing-parameter",
            CompileError::InvalidParameter { .. } => "invalid-parameter",
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

// ============================================================================
// Output
// ============================================================================

/// A compiled report query with its bound values.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub query: Query,
    /// Placeholder name → value; covers every placeholder in `query`.
    pub params: BTreeMap<String, ParamValue>,
    /// Non-fatal findings for the report author.
    pub warnings: Vec<String>,
    pub dialect: Dialect,
}

impl CompiledQuery {
    pub fn sql(&self) -> String {
        self.query.to_sql(self.dialect)
    }

    /// Row count over the same predicates, without ordering or paging.
    pub fn count_sql(&self) -> String {
        self.query.count_query().to_sql(self.dialect)
    }

    /// One page of results (`page` is 0-based).
    pub fn paged_sql(&self, page: u64, page_size: u64) -> String {
        self.query.paged(page, page_size).to_sql(self.dialect)
    }

    /// Every placeholder name in the query.
    pub fn placeholders(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.query.collect_placeholders(&mut names);
        names
    }
}

// ============================================================================
// Compiler
// ============================================================================

/// Compiles [`QueryConfig`]s against a whitelist.
#[derive(Debug, Clone, Copy)]
pub struct QueryCompiler<'a> {
    whitelist: &'a SchemaWhitelist,
    dialect: Dialect,
    table_prefix: &'a str,
}

/// A table alias resolved to its whitelisted table.
#[derive(Debug, Clone)]
struct AliasedTable {
    alias: String,
    table: String,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(whitelist: &'a SchemaWhitelist, dialect: Dialect) -> Self {
        Self {
            whitelist,
            dialect,
            table_prefix: "",
        }
    }

    /// Physical tables are emitted as `<prefix><table>`.
    pub fn with_table_prefix(mut self, prefix: &'a str) -> Self {
        self.table_prefix = prefix;
        self
    }

    pub fn compile(&self, config: &QueryConfig, params: &Params) -> CompileResult<CompiledQuery> {
        // 1. Tables and aliases
        let tables = self.resolve_tables(config)?;
        let aliases: HashMap<&str, &str> = tables
            .iter()
            .map(|t| (t.alias.as_str(), t.table.as_str()))
            .collect();

        // 2. Every column reference, before anything is emitted
        for col in &config.columns {
            self.check_column(&aliases, &col.column_ref())?;
        }
        for join in &config.joins {
            for (left, right) in &join.on {
                self.check_column(&aliases, &column_ref(&join.left, left))?;
                self.check_column(&aliases, &column_ref(&join.right, right))?;
            }
        }
        for filter in &config.filters {
            self.check_column(&aliases, &column_ref(&filter.table, &filter.column))?;
        }
        for group in &config.group_by {
            self.check_column(&aliases, group)?;
        }
        for order in &config.order_by {
            self.check_column(&aliases, &column_ref(&order.table, &order.column))?;
        }

        // 3. SELECT
        if config.columns.is_empty() {
            return Err(CompileError::EmptyColumns);
        }
        let mut select = Vec::with_capacity(config.columns.len());
        let mut plain_columns = Vec::new();
        for spec in &config.columns {
            let column = table_col(&spec.table, &spec.column);
            let aggregate = spec
                .aggregate
                .as_deref()
                .filter(|a| !a.trim().is_empty())
                .map(str::parse::<Aggregate>)
                .transpose()?;
            let expr = match aggregate {
                Some(agg) => apply_aggregate(agg, column),
                None => {
                    plain_columns.push(spec.column_ref());
                    column
                }
            };
            let alias = match (&spec.alias, aggregate) {
                (Some(alias), _) => Some(check_identifier(alias)?.to_string()),
                (None, Some(agg)) => Some(format!("{}_{}", agg.name(), spec.column)),
                (None, None) => None,
            };
            select.push(match alias {
                Some(alias) => SelectExpr::new(expr).with_alias(&alias),
                None => SelectExpr::new(expr),
            });
        }
        let has_aggregate = select.iter().any(|s| s.expr.is_aggregate());

        // 4. FROM / JOIN
        let mut query = self.emit_joins(config, &tables)?;
        query.select = select;

        // 5. WHERE
        let mut bound = BTreeMap::new();
        if let Some(predicate) = self.emit_filters(&config.filters, params, &mut bound)? {
            query.and_where(predicate);
        }

        // 6. GROUP BY
        query.group_by = config
            .group_by
            .iter()
            .map(|g| table_col(&g.table, &g.column))
            .collect();

        let mut warnings = Vec::new();
        if has_aggregate || !config.group_by.is_empty() {
            for col in plain_columns {
                if !config.group_by.contains(&col) {
                    let warning = format!(
                        "column {} is selected but neither aggregated nor grouped",
                        col
                    );
                    tracing::warn!(column = %col, "{}", warning);
                    warnings.push(warning);
                }
            }
        }

        // 7. ORDER BY
        query.order_by = config
            .order_by
            .iter()
            .map(|o| {
                let dir = parse_direction(o.direction.as_deref().unwrap_or(""))?;
                let expr = table_col(&o.table, &o.column);
                Ok(match dir {
                    SortDir::Asc => OrderByExpr::asc(expr),
                    SortDir::Desc => OrderByExpr::desc(expr),
                })
            })
            .collect::<CompileResult<_>>()?;

        let compiled = CompiledQuery {
            query,
            params: bound,
            warnings,
            dialect: self.dialect,
        };
        tracing::debug!(sql = %compiled.sql(), params = compiled.params.len(), "compiled report query");
        Ok(compiled)
    }

    fn resolve_tables(&self, config: &QueryConfig) -> CompileResult<Vec<AliasedTable>> {
        if config.tables.is_empty() {
            return Err(CompileError::EmptyTables);
        }
        let mut seen = BTreeSet::new();
        let mut tables = Vec::with_capacity(config.tables.len());
        for spec in &config.tables {
            if !self.whitelist.is_table_allowed(&spec.table) {
                return Err(CompileError::DisallowedTable(spec.table.clone()));
            }
            let alias = check_identifier(spec.alias())?;
            if !seen.insert(alias.to_string()) {
                return Err(CompileError::DuplicateAlias(alias.to_string()));
            }
            tables.push(AliasedTable {
                alias: alias.to_string(),
                table: spec.table.to_ascii_lowercase(),
            });
        }
        Ok(tables)
    }

    fn check_column(&self, aliases: &HashMap<&str, &str>, col: &ColumnRef) -> CompileResult<()> {
        let table = aliases
            .get(col.table.as_str())
            .ok_or_else(|| CompileError::UnknownAlias(col.table.clone()))?;
        if self.whitelist.is_column_allowed(table, &col.column) {
            Ok(())
        } else {
            Err(CompileError::DisallowedColumn {
                table: table.to_string(),
                column: col.column.clone(),
            })
        }
    }

    fn table_ref(&self, table: &AliasedTable) -> TableRef {
        TableRef::new(&format!("{}{}", self.table_prefix, table.table)).with_alias(&table.alias)
    }

    /// FROM the first table, then one JOIN per remaining table in list order.
    ///
    /// Each later table takes the first unused join spec linking it to a
    /// table already placed. LEFT joins must introduce their right side.
    fn emit_joins(&self, config: &QueryConfig, tables: &[AliasedTable]) -> CompileResult<Query> {
        for join in &config.joins {
            for alias in [&join.left, &join.right] {
                if !tables.iter().any(|t| &t.alias == alias) {
                    return Err(CompileError::UnknownAlias(alias.clone()));
                }
            }
            if join.on.is_empty() {
                return Err(invalid_join(join.left.as_str(), &join.right, "no join conditions"));
            }
        }

        let mut query = Query::new().from(self.table_ref(&tables[0]));
        let mut placed: BTreeSet<&str> = BTreeSet::from([tables[0].alias.as_str()]);
        let mut used = vec![false; config.joins.len()];

        for table in &tables[1..] {
            let alias = table.alias.as_str();
            let found = config.joins.iter().enumerate().find(|(i, j)| {
                !used[*i]
                    && ((j.right == alias && placed.contains(j.left.as_str()))
                        || (j.left == alias && placed.contains(j.right.as_str())))
            });
            let Some((index, join)) = found else {
                return Err(CompileError::UnjoinedTable(alias.to_string()));
            };
            used[index] = true;

            let join_type = parse_join_type(&join.join_type)?;
            if join_type == JoinType::Left && join.right != alias {
                return Err(invalid_join(
                    &join.left,
                    &join.right,
                    "a LEFT join must introduce its right table",
                ));
            }

            let on = join
                .on
                .iter()
                .map(|(l, r)| table_col(&join.left, l).eq(table_col(&join.right, r)))
                .reduce(|acc, cond| acc.and(cond))
                .ok_or_else(|| invalid_join(&join.left, &join.right, "no join conditions"))?;

            query = query.join(join_type, self.table_ref(table), on);
            placed.insert(alias);
        }

        if let Some(index) = used.iter().position(|u| !u) {
            let join = &config.joins[index];
            return Err(invalid_join(
                &join.left,
                &join.right,
                "joins two tables that are already joined",
            ));
        }
        Ok(query)
    }

    /// Combine filters left to right; each run of OR-linked filters is one
    /// parenthesized group, and groups are ANDed.
    fn emit_filters(
        &self,
        filters: &[FilterSpec],
        params: &Params,
        bound: &mut BTreeMap<String, ParamValue>,
    ) -> CompileResult<Option<Expr>> {
        let mut groups: Vec<Vec<Expr>> = Vec::new();
        for (i, filter) in filters.iter().enumerate() {
            let logic: Logic = filter.logic.as_deref().unwrap_or("").parse()?;
            let predicate = self.emit_filter(filter, params, bound)?;
            match groups.last_mut() {
                Some(group) if i > 0 && logic == Logic::Or => group.push(predicate),
                _ => groups.push(vec![predicate]),
            }
        }

        Ok(groups
            .into_iter()
            .filter_map(|group| {
                let single = group.len() == 1;
                let expr = group.into_iter().reduce(|acc, p| acc.or(p))?;
                Some(if single { expr } else { expr.paren() })
            })
            .reduce(|acc, g| acc.and(g)))
    }

    fn emit_filter(
        &self,
        filter: &FilterSpec,
        params: &Params,
        bound: &mut BTreeMap<String, ParamValue>,
    ) -> CompileResult<Expr> {
        let operator: FilterOperator = filter.operator.parse()?;
        let value = params
            .get(&filter.param)
            .ok_or_else(|| CompileError::MissingParameter(filter.param.clone()))?;
        let column = table_col(&filter.table, &filter.column);
        let base = format!(
            "{}{}",
            filter.column.to_ascii_lowercase(),
            operator.bound_suffix().unwrap_or("")
        );

        if operator == FilterOperator::In {
            let items = match value {
                ParamValue::List(items) => items.clone(),
                ParamValue::Null => return Err(null_parameter(&filter.param)),
                scalar => vec![scalar.clone()],
            };
            if items.is_empty() {
                return Ok(false_predicate());
            }
            if items.iter().any(|v| v.is_list() || *v == ParamValue::Null) {
                return Err(CompileError::InvalidParameter {
                    name: filter.param.clone(),
                    detail: "IN lists hold scalar values only".into(),
                });
            }
            let name = unique_list_name(&base, items.len(), bound);
            let placeholders = items
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    let slot = format!("{}_{}", name, i);
                    bound.insert(slot.clone(), item);
                    placeholder(&slot)
                })
                .collect();
            return Ok(column.in_list(placeholders));
        }

        match value {
            ParamValue::Null => return Err(null_parameter(&filter.param)),
            ParamValue::List(_) => {
                return Err(CompileError::InvalidParameter {
                    name: filter.param.clone(),
                    detail: "a list is only valid with IN".into(),
                })
            }
            _ => {}
        }

        let name = unique_name(&base, bound);
        bound.insert(name.clone(), value.clone());
        let slot = placeholder(&name);
        Ok(match operator {
            FilterOperator::Eq => column.eq(slot),
            FilterOperator::Ne => column.ne(slot),
            FilterOperator::Lt => column.lt(slot),
            FilterOperator::Lte => column.lte(slot),
            FilterOperator::Gt => column.gt(slot),
            FilterOperator::Gte => column.gte(slot),
            FilterOperator::Like => column.like(slot),
            FilterOperator::In => column.in_list(vec![slot]),
        })
    }
}

// ============================================================================
// Raw SQL binding
// ============================================================================

/// Values for every `:name` placeholder in a validated raw statement.
pub fn bind_placeholders(
    statement: &RawStatement,
    params: &Params,
) -> CompileResult<BTreeMap<String, ParamValue>> {
    statement
        .placeholders()
        .into_iter()
        .map(|name| match params.get(&name) {
            None => Err(CompileError::MissingParameter(name)),
            Some(ParamValue::List(_)) => Err(CompileError::InvalidParameter {
                name,
                detail: "list values are only supported in declarative IN filters".into(),
            }),
            Some(value) => Ok((name, value.clone())),
        })
        .collect()
}

// ============================================================================
// Helpers
// ============================================================================

fn column_ref(table: &str, column: &str) -> ColumnRef {
    ColumnRef {
        table: table.to_string(),
        column: column.to_string(),
    }
}

fn check_identifier(name: &str) -> CompileResult<&str> {
    if is_plain_identifier(name) {
        Ok(name)
    } else {
        Err(CompileError::InvalidIdentifier(name.to_string()))
    }
}

fn apply_aggregate(agg: Aggregate, expr: Expr) -> Expr {
    match agg {
        Aggregate::Count => count(expr),
        Aggregate::Sum => sum(expr),
        Aggregate::Avg => avg(expr),
        Aggregate::Min => min(expr),
        Aggregate::Max => max(expr),
    }
}

fn invalid_join(left: &str, right: &str, detail: &str) -> CompileError {
    CompileError::InvalidJoin {
        left: left.to_string(),
        right: right.to_string(),
        detail: detail.to_string(),
    }
}

fn null_parameter(name: &str) -> CompileError {
    CompileError::InvalidParameter {
        name: name.to_string(),
        detail: "null cannot be compared".into(),
    }
}

/// `base`, or `base_2`, `base_3`, ... if taken.
fn unique_name(base: &str, taken: &BTreeMap<String, ParamValue>) -> String {
    if !taken.contains_key(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}_{}", base, n))
        .find(|candidate| !taken.contains_key(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// Like [`unique_name`], but every `name_0 .. name_{len-1}` slot must be free.
fn unique_list_name(base: &str, len: usize, taken: &BTreeMap<String, ParamValue>) -> String {
    let free = |name: &str| (0..len).all(|i| !taken.contains_key(&format!("{}_{}", name, i)));
    if free(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}_{}", base, n))
        .find(|candidate| free(candidate))
        .unwrap_or_else(|| base.to_string())
}

// ============================================================================
// Tests
// ============================================================================
