//! # Quarry
//!
//! Safe, tenant-scoped reporting over a learning-platform database.
//!
//! ## Architecture
//!
//! A report is either hand-written SQL or a declarative query config. Both
//! paths end in the same scoped, paginated, cached execution:
//!
//! ```text
//! ┌──────────────────────────┐      ┌──────────────────────────┐
//! │   raw SQL definition     │      │   declarative config     │
//! └──────────────────────────┘      └──────────────────────────┘
//!              │ [validation]                    │ [compile]
//!              ▼                                 ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │        statement + bound parameters (whitelist-checked)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ [tenant]
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │     scoped statement → [cache] → [backend] count + page      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`pipeline::ReportExecutor`] ties the stages together.

pub mod backend;
pub mod cache;
pub mod compile;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod schema;
pub mod sql;
pub mod telemetry;
pub mod tenant;
pub mod validation;

pub use error::{ErrorReport, ExecutionError, ReportError, ReportResult, SetupError};
pub use pipeline::{PreparedQuery, ReportExecutor, ResultEnvelope};
pub use report::{ParamValue, Params, ReportDefinition, ReportId, ReportKind, ReportRegistry};
pub use schema::SchemaWhitelist;
pub use sql::Dialect;
pub use tenant::{Caller, TenantScope};
