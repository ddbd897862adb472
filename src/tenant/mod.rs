//! Tenant scoping.
//!
//! One decision point turns a caller into a [`TenantScope`]:
//!
//! | Tenancy | Selection | Caller | Restriction |
//! |---------|-----------|--------|-------------|
//! | disabled | any | any | unrestricted |
//! | enabled | unit `n` | site-wide or member of `n` | `{n}` |
//! | enabled | unit `n` | not a member of `n` | `{}` (zero rows) |
//! | enabled | none | site-wide | unrestricted |
//! | enabled | none | member | every unit the caller belongs to |
//!
//! The [`TenantInjector`] then applies the restriction to compiled or raw
//! queries.

mod injector;

pub use injector::{TenantInjector, SCOPE_PARAM_PREFIX};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::QueryBackend;
use crate::config::TenantSettings;
use crate::report::ParamValue;
use crate::sql::expr::{placeholder, table_col, ExprExt};
use crate::sql::query::{Query, TableRef};
use crate::sql::Dialect;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    #[error("query has no top-level '{0}' user alias to scope by")]
    MissingUserAlias(String),

    #[error("queries combining several SELECTs cannot be scoped")]
    SetOperation,

    #[error("placeholder '{0}' is reserved for tenant scoping")]
    PlaceholderCollision(String),

    #[error("membership lookup failed: {0}")]
    Membership(String),
}

impl ScopeError {
    pub fn reason(&self) -> &'static str {
        match self {
            ScopeError::MissingUserAlias(_) => "scope-missing-user-alias",
            ScopeError::SetOperation => "scope-set-operation",
            ScopeError::PlaceholderCollision(_) => "scope-placeholder-collision",
            ScopeError::Membership(_) => "scope-membership",
        }
    }

    /// True when the report definition itself is at fault.
    pub fn is_definition_error(&self) -> bool {
        !matches!(self, ScopeError::Membership(_))
    }
}

pub type ScopeResult<T> = Result<T, ScopeError>;

// =============================================================================
// Scope model
// =============================================================================

/// Who is running a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Caller {
    pub user_id: u64,
    /// Unit explicitly chosen in the UI, if any.
    pub selected_unit: Option<u64>,
}

impl Caller {
    pub fn new(user_id: u64) -> Self {
        Self {
            user_id,
            selected_unit: None,
        }
    }

    pub fn with_unit(mut self, unit: u64) -> Self {
        self.selected_unit = Some(unit);
        self
    }
}

/// What a membership lookup reports about a user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Access {
    pub site_wide: bool,
    pub units: BTreeSet<u64>,
}

/// The rows a caller may see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restriction {
    Unrestricted,
    /// Users belonging to any of these units. Empty means no rows.
    Units(BTreeSet<u64>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantScope {
    pub caller: Caller,
    pub restriction: Restriction,
}

impl TenantScope {
    pub fn unrestricted(caller: Caller) -> Self {
        Self {
            caller,
            restriction: Restriction::Unrestricted,
        }
    }

    pub fn units(caller: Caller, units: impl IntoIterator<Item = u64>) -> Self {
        Self {
            caller,
            restriction: Restriction::Units(units.into_iter().collect()),
        }
    }

    /// Decide the restriction for `caller` given their `access`.
    pub fn resolve(caller: Caller, access: &Access, enabled: bool) -> Self {
        if !enabled {
            return Self::unrestricted(caller);
        }
        match caller.selected_unit {
            Some(unit) if access.site_wide || access.units.contains(&unit) => {
                Self::units(caller, [unit])
            }
            Some(unit) => {
                tracing::warn!(
                    user = caller.user_id,
                    unit,
                    "selected unit is outside the caller's memberships"
                );
                Self::units(caller, [])
            }
            None if access.site_wide => Self::unrestricted(caller),
            None => Self::units(caller, access.units.iter().copied()),
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.restriction == Restriction::Unrestricted
    }

    /// Stable text identifying the visible row set: `all` or the sorted unit ids.
    pub fn fingerprint(&self) -> String {
        match &self.restriction {
            Restriction::Unrestricted => "all".to_string(),
            Restriction::Units(units) => {
                let ids: Vec<String> = units.iter().map(u64::to_string).collect();
                format!("units:{}", ids.join(","))
            }
        }
    }
}

// =============================================================================
// Membership resolution
// =============================================================================

/// Looks up a user's organisational units.
#[async_trait]
pub trait MembershipResolver: Send + Sync {
    async fn access(&self, user_id: u64) -> ScopeResult<Access>;
}

/// Fixed memberships held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticMembership {
    site_admins: BTreeSet<u64>,
    members: BTreeMap<u64, BTreeSet<u64>>,
}

impl StaticMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_site_admin(mut self, user_id: u64) -> Self {
        self.site_admins.insert(user_id);
        self
    }

    pub fn with_member(mut self, user_id: u64, unit: u64) -> Self {
        self.members.entry(user_id).or_default().insert(unit);
        self
    }
}

#[async_trait]
impl MembershipResolver for StaticMembership {
    async fn access(&self, user_id: u64) -> ScopeResult<Access> {
        Ok(Access {
            site_wide: self.site_admins.contains(&user_id),
            units: self.members.get(&user_id).cloned().unwrap_or_default(),
        })
    }
}

/// Reads memberships from the reporting store.
pub struct BackendMembership {
    backend: Arc<dyn QueryBackend>,
    settings: TenantSettings,
    dialect: Dialect,
    table_prefix: String,
}

impl BackendMembership {
    pub fn new(
        backend: Arc<dyn QueryBackend>,
        settings: TenantSettings,
        dialect: Dialect,
        table_prefix: &str,
    ) -> Self {
        Self {
            backend,
            settings,
            dialect,
            table_prefix: table_prefix.to_string(),
        }
    }

    fn lookup_sql(&self) -> String {
        let s = &self.settings;
        let table = format!("{}{}", self.table_prefix, s.membership_table);
        Query::new()
            .select(vec![table_col("m", &s.membership_unit_column)])
            .from(TableRef::new(&table).with_alias("m"))
            .filter(table_col("m", &s.membership_user_column).eq(placeholder("user_id")))
            .to_sql(self.dialect)
    }
}

#[async_trait]
impl MembershipResolver for BackendMembership {
    async fn access(&self, user_id: u64) -> ScopeResult<Access> {
        let site_wide = self.settings.site_admins.contains(&user_id);
        let params = BTreeMap::from([("user_id".to_string(), ParamValue::from(user_id))]);
        let rows = self
            .backend
            .query(&self.lookup_sql(), &params)
            .await
            .map_err(|e| ScopeError::Membership(e.to_string()))?;
        let units = rows
            .rows
            .iter()
            .filter_map(|row| row.first().and_then(serde_json::Value::as_u64))
            .collect();
        Ok(Access { site_wide, units })
    }
}
