//! Database connection pool and embedded migrations.
//!
//! Provides async PostgreSQL connection pooling using diesel_async with bb8.

mod pool;

pub use pool::{
    AsyncDbPool, DbConnection, MIGRATIONS, establish_async_connection_pool, get_connection,
};
