//! Report execution.
//!
//! One execution runs these steps in order:
//!
//! ```text
//! resolve scope → merge params → validate+bind | compile → inject scope
//!   → cache lookup → admission → count + page (under timeout) → cache store
//! ```
//!
//! Definition errors stop the run before any query reaches the store. A
//! failed cache read or write is logged and otherwise ignored.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::Instrument;
use uuid::Uuid;

use crate::backend::{QueryBackend, SqliteBackend};
use crate::cache::{generate_key, CacheKey, ResultCache, SqliteStore};
use crate::compile::{bind_placeholders, CompiledQuery, QueryCompiler};
use crate::config::{CacheBackend, Settings};
use crate::error::{ExecutionError, ReportError, ReportResult, SetupError};
use crate::report::{
    merge_params, ParamValue, Params, ReportDefinition, ReportId, ReportQuery, ReportRegistry,
};
use crate::schema::SchemaWhitelist;
use crate::sql::raw::RawStatement;
use crate::sql::Dialect;
use crate::tenant::{
    BackendMembership, Caller, MembershipResolver, Restriction, TenantInjector, TenantScope,
};
use crate::validation::SqlValidator;

// ============================================================================
// Result envelope
// ============================================================================

/// One page of report output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub rows: Vec<Vec<serde_json::Value>>,
    pub columns: Vec<String>,
    /// Rows across all pages.
    pub total: u64,
    /// 0-based.
    pub page: u64,
    pub page_size: u64,
    pub cached: bool,
    pub duration_ms: f64,
}

// ============================================================================
// Prepared queries
// ============================================================================

/// A scoped query ready to run, with every placeholder bound.
#[derive(Debug, Clone)]
pub enum PreparedQuery {
    Raw {
        statement: RawStatement,
        params: BTreeMap<String, ParamValue>,
        table_prefix: String,
    },
    Compiled(CompiledQuery),
}

impl PreparedQuery {
    pub fn sql(&self) -> String {
        match self {
            PreparedQuery::Raw {
                statement,
                table_prefix,
                ..
            } => statement.render(table_prefix),
            PreparedQuery::Compiled(compiled) => compiled.sql(),
        }
    }

    pub fn count_sql(&self) -> String {
        match self {
            PreparedQuery::Raw {
                statement,
                table_prefix,
                ..
            } => statement.count_sql(table_prefix),
            PreparedQuery::Compiled(compiled) => compiled.count_sql(),
        }
    }

    pub fn paged_sql(&self, page: u64, page_size: u64) -> String {
        match self {
            PreparedQuery::Raw {
                statement,
                table_prefix,
                ..
            } => statement.paged_sql(table_prefix, page, page_size),
            PreparedQuery::Compiled(compiled) => compiled.paged_sql(page, page_size),
        }
    }

    pub fn params(&self) -> &BTreeMap<String, ParamValue> {
        match self {
            PreparedQuery::Raw { params, .. } => params,
            PreparedQuery::Compiled(compiled) => &compiled.params,
        }
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            PreparedQuery::Raw { .. } => &[],
            PreparedQuery::Compiled(compiled) => &compiled.warnings,
        }
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Runs report definitions for callers.
///
/// Shareable across tasks; the whitelist can be swapped while executions
/// are in flight.
pub struct ReportExecutor {
    settings: Settings,
    whitelist: ArcSwap<SchemaWhitelist>,
    backend: Arc<dyn QueryBackend>,
    membership: Arc<dyn MembershipResolver>,
    cache: Option<ResultCache>,
    registry: ReportRegistry,
    gate: Option<Arc<Semaphore>>,
}

impl std::fmt::Debug for ReportExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportExecutor")
            .field("settings", &self.settings)
            .field("cache", &self.cache)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ReportExecutor {
    /// An executor with the built-in reports, no result cache, and an
    /// admission gate sized from `settings.execution.max_concurrent`.
    pub fn new(
        settings: Settings,
        whitelist: SchemaWhitelist,
        backend: Arc<dyn QueryBackend>,
        membership: Arc<dyn MembershipResolver>,
    ) -> Self {
        let gate = settings
            .execution
            .max_concurrent
            .map(|n| Arc::new(Semaphore::new(n)));
        Self {
            settings,
            whitelist: ArcSwap::from_pointee(whitelist),
            backend,
            membership,
            cache: None,
            registry: ReportRegistry::with_builtins(),
            gate,
        }
    }

    /// Assemble an executor over the SQLite database named in `settings`.
    ///
    /// Report SQL is validated and rendered in `database.dialect`, so it must
    /// be `sqlite` here.
    pub fn from_settings(settings: Settings) -> Result<Self, SetupError> {
        if settings.database.dialect != Dialect::Sqlite {
            return Err(SetupError::DialectMismatch(settings.database.dialect));
        }

        let whitelist = match &settings.schema.whitelist_path {
            Some(path) => {
                let path = crate::config::expand_env_vars(path)?;
                SchemaWhitelist::load(std::path::Path::new(&path))?
            }
            None => SchemaWhitelist::builtin()?,
        };

        let db_path = settings
            .database
            .resolved_path()?
            .ok_or(SetupError::MissingDatabase)?;
        let backend: Arc<dyn QueryBackend> = Arc::new(SqliteBackend::open(&db_path)?);

        let membership = Arc::new(BackendMembership::new(
            Arc::clone(&backend),
            settings.tenant.clone(),
            settings.database.dialect,
            &settings.database.table_prefix,
        ));

        let cache = if !settings.cache.enabled {
            None
        } else {
            match settings.cache.backend {
                CacheBackend::Memory => Some(ResultCache::memory()),
                CacheBackend::Sqlite => {
                    let path = settings.cache.resolved_path()?;
                    Some(ResultCache::new(Arc::new(SqliteStore::open(&path)?)))
                }
            }
        };

        let mut executor = Self::new(settings, whitelist, backend, membership);
        executor.cache = cache;
        Ok(executor)
    }

    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_registry(mut self, registry: ReportRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &ReportRegistry {
        &self.registry
    }

    pub fn cache(&self) -> Option<&ResultCache> {
        self.cache.as_ref()
    }

    pub fn whitelist(&self) -> Arc<SchemaWhitelist> {
        self.whitelist.load_full()
    }

    /// Replace the whitelist. Executions already past validation keep the old one.
    pub fn reload_whitelist(&self, whitelist: SchemaWhitelist) {
        tracing::info!(tables = whitelist.len(), "schema whitelist reloaded");
        self.whitelist.store(Arc::new(whitelist));
    }

    /// Look up `id` in the registry and execute it.
    pub async fn execute_report(
        &self,
        id: &ReportId,
        params: &Params,
        caller: Caller,
        page: u64,
        page_size: u64,
    ) -> ReportResult<ResultEnvelope> {
        let definition = self.registry.get(id)?;
        self.execute(definition, params, caller, page, page_size).await
    }

    /// Execute one page of `definition` for `caller`.
    ///
    /// `page` is 0-based. A `page_size` of 0 uses the configured default;
    /// larger sizes are capped at the configured maximum.
    pub async fn execute(
        &self,
        definition: &ReportDefinition,
        params: &Params,
        caller: Caller,
        page: u64,
        page_size: u64,
    ) -> ReportResult<ResultEnvelope> {
        let execution_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "report.execute",
            report = %definition.id,
            mode = definition.query.mode(),
            user = caller.user_id,
            %execution_id,
        );

        async move {
            let result = self
                .run(definition, params, caller, page, page_size)
                .await;
            if let Err(e) = &result {
                if e.is_definition_error() {
                    tracing::warn!(error = %e, "report rejected");
                } else {
                    tracing::error!(error = %e, "report failed");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        definition: &ReportDefinition,
        params: &Params,
        caller: Caller,
        page: u64,
        page_size: u64,
    ) -> ReportResult<ResultEnvelope> {
        let started = Instant::now();
        let page_size = self.effective_page_size(page_size);

        let scope = self.resolve_scope(caller).await?;
        if scope.restriction == Restriction::Units(Default::default()) {
            tracing::info!("caller has no visible units; result will be empty");
        }

        let merged = merge_params(&definition.default_params, params);
        let prepared = self.prepare(definition, &merged, &scope)?;

        let cache_slot = self.cache_slot(definition, &merged, page, page_size, &scope);
        if let Some((cache, key, _)) = &cache_slot {
            match cache.get::<ResultEnvelope>(key) {
                Ok(Some(mut envelope)) => {
                    envelope.cached = true;
                    envelope.duration_ms = elapsed_ms(started);
                    tracing::info!(total = envelope.total, "served from cache");
                    return Ok(envelope);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "cache read failed; executing"),
            }
        }

        let _permit = self.admit()?;
        let limit = self.settings.database.query_timeout();
        let (total, rows) = tokio::time::timeout(limit, async {
            let total = self
                .backend
                .query(&prepared.count_sql(), prepared.params())
                .await?
                .scalar_u64()
                .ok_or(ExecutionError::MissingTotal)?;
            let rows = self
                .backend
                .query(&prepared.paged_sql(page, page_size), prepared.params())
                .await?;
            Ok::<_, ExecutionError>((total, rows))
        })
        .await
        .map_err(|_| ExecutionError::Timeout(limit))??;

        let envelope = ResultEnvelope {
            rows: rows.rows,
            columns: rows.columns,
            total,
            page,
            page_size,
            cached: false,
            duration_ms: elapsed_ms(started),
        };
        tracing::info!(
            total,
            rows = envelope.rows.len(),
            duration_ms = envelope.duration_ms,
            "report executed"
        );

        if let Some((cache, key, ttl)) = &cache_slot {
            if let Err(e) = cache.set(key, &envelope, *ttl) {
                tracing::warn!(error = %e, "cache write failed");
            }
        }
        Ok(envelope)
    }

    /// Validate or compile `definition`, bind its parameters and apply `scope`.
    pub fn prepare(
        &self,
        definition: &ReportDefinition,
        params: &Params,
        scope: &TenantScope,
    ) -> ReportResult<PreparedQuery> {
        let whitelist = self.whitelist.load_full();
        let dialect = self.settings.database.dialect;
        let prefix = self.settings.database.table_prefix.as_str();
        let injector = TenantInjector::new(&self.settings.tenant, prefix);

        match &definition.query {
            ReportQuery::RawSql { sql } => {
                let mut statement = SqlValidator::new(&whitelist, dialect)
                    .with_table_prefix(prefix)
                    .validate(sql)?;
                let mut bound = bind_placeholders(&statement, params)?;
                injector.inject_raw(scope, &mut statement, &mut bound)?;
                Ok(PreparedQuery::Raw {
                    statement,
                    params: bound,
                    table_prefix: prefix.to_string(),
                })
            }
            ReportQuery::Declarative { config } => {
                let mut compiled = QueryCompiler::new(&whitelist, dialect)
                    .with_table_prefix(prefix)
                    .compile(config, params)?;
                injector.inject_query(scope, &mut compiled)?;
                Ok(PreparedQuery::Compiled(compiled))
            }
        }
    }

    async fn resolve_scope(&self, caller: Caller) -> ReportResult<TenantScope> {
        if !self.settings.tenant.enabled {
            return Ok(TenantScope::unrestricted(caller));
        }
        let access = self.membership.access(caller.user_id).await?;
        Ok(TenantScope::resolve(caller, &access, true))
    }

    fn effective_page_size(&self, requested: u64) -> u64 {
        let exec = &self.settings.execution;
        match requested {
            0 => exec.default_page_size,
            n => n.min(exec.max_page_size),
        }
    }

    /// Cache, key and TTL for this execution, or `None` when it is not cached.
    fn cache_slot(
        &self,
        definition: &ReportDefinition,
        params: &Params,
        page: u64,
        page_size: u64,
        scope: &TenantScope,
    ) -> Option<(&ResultCache, CacheKey, Duration)> {
        let cache = self.cache.as_ref()?;
        if !definition.cacheable {
            return None;
        }
        let ttl = definition
            .cache_ttl
            .unwrap_or(self.settings.cache.default_ttl_seconds);
        if ttl == 0 {
            return None;
        }
        match generate_key(&definition.id, params, page, page_size, &scope.fingerprint()) {
            Ok(key) => Some((cache, key, Duration::from_secs(ttl))),
            Err(e) => {
                tracing::warn!(error = %e, "cache key generation failed; not caching");
                None
            }
        }
    }

    fn admit(&self) -> ReportResult<Option<OwnedSemaphorePermit>> {
        match &self.gate {
            Some(gate) => Arc::clone(gate)
                .try_acquire_owned()
                .map(Some)
                .map_err(|_| ReportError::Busy),
            None => Ok(None),
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
