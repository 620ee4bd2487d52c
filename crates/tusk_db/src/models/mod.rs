//! Data models for the Tusk driver layer.
//!
//! - `connection` - ConnectionConfig, SslConfig, ConnectionStatus, TlsState
//! - `query` - QueryResult, MultiQueryResult, QueryType, ColumnInfo
//! - `schema` - introspection descriptors and definitions
//! - `ddl` - typed mutation requests and DdlOperationResult
//! - `history` - QueryHistoryEntry

pub mod connection;
pub mod ddl;
pub mod history;
pub mod query;
pub mod schema;

pub use connection::{
    ConnectionConfig, ConnectionConfigBuilder, ConnectionOptions, ConnectionStatus, EngineType,
    PoolStatus, SslConfig, SslMode, TlsState, TlsVersion,
};
pub use ddl::{
    AddColumnRequest, AddForeignKeyRequest, AlterSequenceRequest, ColumnDefinition,
    CreateExtensionRequest, CreateIndexRequest, CreateSequenceRequest, CreateTableRequest,
    CreateTriggerRequest, CreateUserRequest, CreateViewRequest, DdlOperationResult, DefaultChange,
    DeleteRowRequest, DropColumnRequest, DropExtensionRequest, DropForeignKeyRequest,
    DropIndexRequest, DropSequenceRequest, DropTableRequest, DropTriggerRequest, DropUserRequest,
    DropViewRequest, ForeignKeyDefinition, IndexDefinition, IndexMethod, InsertRowRequest,
    ModifyColumnRequest, ReferentialAction, RefreshMaterializedViewRequest, RenameColumnRequest,
    RenameTableRequest, RenameViewRequest, TriggerAction, TriggerEvent, TriggerForEach,
    TriggerTiming, UpdateRowRequest,
};
pub use history::QueryHistoryEntry;
pub use query::{
    ColumnInfo, MultiQueryResult, QueryError, QueryParam, QueryResult, QueryType, Row,
};
pub use schema::{
    ColumnDetail, DatabaseInfo, DatabaseSchema, EnumInfo, ExtensionInfo, ForeignKeyInfo,
    IndexInfo, MaterializedViewInfo, ObjectDefinition, RoutineInfo, SchemaInfo, SchemaObject,
    SchemaObjectKind, SequenceInfo, TableInfo, TriggerInfo, UserInfo, ViewInfo,
};
