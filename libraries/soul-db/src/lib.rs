//! Soul DB
//!
//! In-process media metadata database: an entry store with batched change
//! notifications, boolean queries, live query/property models and
//! background I/O whose results are applied on the owning thread.
//!
//! # Architecture
//!
//! - **Store**: generational entry slots, location index, per-entry refcounts
//! - **Queries**: AND/OR criteria over properties, evaluated on workers for
//!   full queries and inline for incremental model maintenance
//! - **Models**: sorted query results, per-property counts, chained browsers
//! - **Coordinator**: serial action worker, ephemeral workers, event queue
//!   and the read lock that holds back mutations during saves and queries
//! - **Persistence**: pluggable [`StorageBackend`](soul_core::StorageBackend),
//!   JSON file by default
//!
//! # Example
//!
//! ```rust,no_run
//! use soul_db::{Database, DbConfig, Query, QueryOp, Services, SortOrder, Term};
//! use soul_core::types::PropType;
//! # fn services() -> Services { unimplemented!() }
//!
//! # fn example() -> Result<(), soul_db::DbError> {
//! let mut db = Database::new(DbConfig::default(), services())?;
//! db.scan_directory("file:///music")?;
//!
//! let query = Query::parse(vec![Term::prop(QueryOp::Like, PropType::Artist, "simone")])?;
//! let model = db.create_query_model(&query, SortOrder::album_order())?;
//!
//! // On every scheduler tick
//! db.poll();
//! println!("{} songs", db.model(model)?.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod database;
pub mod entry;
pub mod entry_type;
pub mod error;
pub mod models;
pub mod monitor;
pub mod persist;
pub mod query;
pub mod signals;
pub mod store;

pub use config::DbConfig;
pub use database::{Database, QueueHandle, Services};
pub use entry::{Entry, EntryChange, EntryId, EntryNotification};
pub use entry_type::{EntryTypeHooks, EntryTypeRegistry};
pub use error::{DbError, Result};
pub use models::{
    Browser, BrowserId, BrowserLevel, ModelDelta, ModelId, PropertyModel, PropertyModelId,
    PropertyRow, QueryModel, SortKey, SortOrder,
};
pub use monitor::{DirectoryMonitor, WatcherEvent};
pub use persist::JsonFileBackend;
pub use query::{Criterion, Query, QueryNode, QueryOp, SerializedNode, Term};
pub use signals::DbSignal;
pub use store::EntryStore;
