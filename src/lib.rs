//! # TesseraDB Rust driver
//!
//! Async client driver for [TesseraDB] speaking the Bolt protocol.
//!
//! - **Bolt 4.x / 5.0**: version-negotiated binary protocol with strict
//!   request/response pipelining
//! - **Connection pooling**: per-server pools with bounded capacity and
//!   acquisition timeouts
//! - **Cluster routing**: TTL-cached routing tables with round-robin
//!   reader/writer selection (`tessera://` URIs)
//! - **Transactions**: explicit commit/rollback with deferred-outcome
//!   marking, plus managed retries with exponential backoff
//! - **Causal consistency**: bookmark chaining across transactions
//!
//! ## Quick start
//!
//! ```ignore
//! use tessera_driver::{AuthToken, Driver, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = Driver::new(
//!         "bolt://localhost:7687",
//!         AuthToken::basic("tessera", "secret"),
//!     )?;
//!
//!     let session = driver.session(
//!         SessionConfig::builder().with_database("graph").build(),
//!     );
//!
//!     let mut cursor = session
//!         .run("MATCH (p:Person) RETURN p.name AS name", None)
//!         .await?;
//!     while let Some(record) = cursor.next().await? {
//!         println!("{}", record.get_string("name")?);
//!     }
//!
//!     driver.close().await;
//!     Ok(())
//! }
//! ```
//!
//! The [`driver`] module is the application surface; [`bolt`] exposes the
//! wire layer for tooling that needs raw protocol access.
//!
//! [TesseraDB]: https://github.com/tesseradb

pub mod bolt;
pub mod driver;

pub use bolt::packstream::{
    Date, DateTime, Duration as ValueDuration, LocalDateTime, LocalTime, Node, Path, Point2D,
    Point3D, Relationship, Structure, Value,
};
pub use bolt::BoltVersion;
pub use driver::{
    AuthToken, Bookmark, CertificateSupplier, ConnectionSource, Counters, Driver, DriverConfig,
    DriverError, DriverResult, ErrorCategory, Query, Record, ResultCursor, ResultSummary,
    RetryPolicy, RoutingDriver, ServerAddress, ServerError, Session, SessionConfig, Transaction,
    TransactionConfig, TransactionState, TrustStrategy,
};
