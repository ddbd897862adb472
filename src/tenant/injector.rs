//! Tenant filter injection.
//!
//! The scope predicate is
//!
//! ```sql
//! u.id IN (SELECT user_id FROM membership WHERE unit_id IN (:scope_unit_0, ...))
//! ```
//!
//! ANDed onto the outermost WHERE. An empty unit set becomes `1 = 0`. When a
//! restriction applies but cannot be placed safely, injection fails rather
//! than letting the query run unscoped.

use std::collections::{BTreeMap, BTreeSet};

use super::{Restriction, ScopeError, ScopeResult, TenantScope};
use crate::compile::CompiledQuery;
use crate::config::TenantSettings;
use crate::report::ParamValue;
use crate::sql::expr::{false_predicate, placeholder, table_col, Expr, ExprExt};
use crate::sql::query::{Query, TableRef};
use crate::sql::raw::RawStatement;

/// Placeholder names starting with this are reserved for scope values.
pub const SCOPE_PARAM_PREFIX: &str = "scope_unit_";

#[derive(Debug, Clone, Copy)]
pub struct TenantInjector<'a> {
    settings: &'a TenantSettings,
    table_prefix: &'a str,
}

impl<'a> TenantInjector<'a> {
    pub fn new(settings: &'a TenantSettings, table_prefix: &'a str) -> Self {
        Self {
            settings,
            table_prefix,
        }
    }

    /// Scope a compiled query in place.
    pub fn inject_query(&self, scope: &TenantScope, compiled: &mut CompiledQuery) -> ScopeResult<()> {
        let Restriction::Units(units) = &scope.restriction else {
            return Ok(());
        };

        let alias = &self.settings.user_alias;
        if !compiled
            .query
            .top_level_tables()
            .any(|t| t.exposed_name().eq_ignore_ascii_case(alias))
        {
            return Err(ScopeError::MissingUserAlias(alias.clone()));
        }
        check_reserved(compiled.placeholders().iter().chain(compiled.params.keys()))?;

        let (predicate, values) = self.predicate(units);
        compiled.query.and_where(predicate);
        compiled.params.extend(values);
        tracing::debug!(scope = %scope.fingerprint(), "scoped compiled query");
        Ok(())
    }

    /// Scope a validated raw statement, adding the scope values to `params`.
    pub fn inject_raw(
        &self,
        scope: &TenantScope,
        statement: &mut RawStatement,
        params: &mut BTreeMap<String, ParamValue>,
    ) -> ScopeResult<()> {
        let Restriction::Units(units) = &scope.restriction else {
            return Ok(());
        };

        if statement.has_set_operation() {
            return Err(ScopeError::SetOperation);
        }
        let alias = &self.settings.user_alias;
        if !statement
            .top_level_tables()
            .iter()
            .any(|t| t.exposed_name().eq_ignore_ascii_case(alias))
        {
            return Err(ScopeError::MissingUserAlias(alias.clone()));
        }
        check_reserved(statement.placeholders().iter().chain(params.keys()))?;

        let (predicate, values) = self.predicate(units);
        statement.add_predicate(predicate);
        params.extend(values);
        tracing::debug!(scope = %scope.fingerprint(), "scoped raw statement");
        Ok(())
    }

    /// The scope predicate and its bound values.
    pub fn predicate(&self, units: &BTreeSet<u64>) -> (Expr, BTreeMap<String, ParamValue>) {
        if units.is_empty() {
            return (false_predicate(), BTreeMap::new());
        }

        let s = self.settings;
        let mut values = BTreeMap::new();
        let slots = units
            .iter()
            .enumerate()
            .map(|(i, unit)| {
                let name = format!("{}{}", SCOPE_PARAM_PREFIX, i);
                values.insert(name.clone(), ParamValue::from(*unit));
                placeholder(&name)
            })
            .collect();

        let members = Query::new()
            .select(vec![table_col("scope_m", &s.membership_user_column)])
            .from(
                TableRef::new(&format!("{}{}", self.table_prefix, s.membership_table))
                    .with_alias("scope_m"),
            )
            .filter(table_col("scope_m", &s.membership_unit_column).in_list(slots));

        let predicate = table_col(&s.user_alias, &s.user_column).in_subquery(members);
        (predicate, values)
    }
}

fn check_reserved<'n>(names: impl Iterator<Item = &'n String>) -> ScopeResult<()> {
    for name in names {
        if name.starts_with(SCOPE_PARAM_PREFIX) {
            return Err(ScopeError::PlaceholderCollision(name.clone()));
        }
    }
    Ok(())
}
