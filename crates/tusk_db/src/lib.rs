//! Database driver layer for Tusk.
//!
//! One contract, [`DatabaseDriver`], lets the application connect, execute,
//! cancel, introspect and mutate schema the same way on every engine:
//!
//! - **drivers**: the contract, the factory and the engine implementations
//! - **sql**: statement splitting, placeholder rewriting, identifier quoting
//! - **types**: engine type names and import type inference
//! - **models**: configs, results, descriptors and mutation requests
//! - **services**: query history
//! - **error**: the error taxonomy
//! - **logging**: structured logging setup

pub mod drivers;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;
pub mod sql;
pub mod types;

#[cfg(test)]
mod verification_tests;

pub use drivers::{connect, create_driver, DatabaseDriver, PostgresDriver, SqliteDriver};
pub use error::{TuskError, TuskResult};
pub use models::{
    ColumnDetail, ColumnInfo, ConnectionConfig, ConnectionOptions, ConnectionStatus,
    DatabaseSchema, DdlOperationResult, EngineType, MultiQueryResult, ObjectDefinition,
    QueryHistoryEntry, QueryResult, QueryType, SslConfig, SslMode, TlsState,
};
pub use services::{HistoryRecorder, HistoryStore};
pub use sql::StatementSplitter;
pub use types::TypeMapper;
