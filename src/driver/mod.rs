//! # Driver layer
//!
//! The application-facing surface: drivers, sessions, transactions, result
//! cursors and the retry policy.
//!
//! ```ignore
//! use tessera_driver::{AuthToken, Driver, SessionConfig};
//!
//! let driver = Driver::new("bolt://localhost:7687", AuthToken::basic("ada", "secret"))?;
//! let session = driver.session(SessionConfig::builder().with_database("graph").build());
//!
//! let mut cursor = session.run("MATCH (n) RETURN n LIMIT 10", None).await?;
//! while let Some(record) = cursor.next().await? {
//!     println!("{}", record);
//! }
//!
//! let mut tx = session.begin_transaction(None).await?;
//! tx.run("CREATE (n:Person {name: $name})", Some(params! {"name" => "Ada"})).await?;
//! tx.commit().await?;
//!
//! driver.close().await;
//! ```

pub mod bolt;
pub mod config;
#[allow(clippy::module_inception)]
mod driver;
pub mod error;
pub mod pool;
pub mod record;
pub mod retry;
pub mod routing;
pub mod session;
pub mod transaction;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{
    AuthToken, CertificateSupplier, DriverConfig, DriverConfigBuilder, ServerAddress,
    TrustStrategy,
};
pub use driver::Driver;
pub use error::{DriverError, DriverResult, ErrorCategory, ServerError};
pub use pool::{ConnectionPool, PoolConfig, PoolMetrics, PooledConnection};
pub use record::{Counters, Record, ResultCursor, ResultSummary};
pub use retry::{RetryPolicy, RetryState};
pub use routing::{RoutingDriver, RoutingDriverMetrics, RoutingTable, ServerRole};
pub use session::{Bookmark, ConnectionSource, Query, Session, SessionConfig, SessionConfigBuilder};
pub use transaction::{Transaction, TransactionConfig, TransactionState};

/// Build a parameter map for [`Session::run`] and [`Transaction::run`].
///
/// ```ignore
/// let params = params! {"name" => "Ada", "age" => 36i64};
/// ```
#[macro_export]
macro_rules! params {
    () => {
        std::collections::HashMap::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = std::collections::HashMap::new();
        $(
            map.insert($key.into(), $crate::Value::from($value));
        )+
        map
    }};
}
