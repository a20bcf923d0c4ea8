//! Database dispatch macros for reducing code duplication.
//!
//! The pooled client wraps one of three concrete sqlx connection types. These
//! macros generate the backend match arms while keeping each arm readable.

/// Macro for generating match arms over `SqlxClient` variants.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(client, {
///     MySql(c) => do_mysql(c),
///     Postgres(c) => do_postgres(c),
///     SQLite(c) => do_sqlite(c),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($client:expr, { $($variant:ident($c:ident) => $body:expr),+ $(,)? }) => {
        match $client {
            $(
                $crate::db::client::SqlxClient::$variant($c) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;
