//! Named instance registries for pre-built connections.
//!
//! Process-wide configuration glue: register pools/clients once at boot under
//! a name, then reference the name from memory options. Explicit DSN or host
//! options always take priority over the registry. Tests register an instance
//! around their scope and unregister on teardown.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use sqlx::{MySqlPool, PgPool};

static MYSQL_INSTANCES: Lazy<DashMap<String, MySqlPool>> = Lazy::new(DashMap::new);
static POSTGRES_INSTANCES: Lazy<DashMap<String, PgPool>> = Lazy::new(DashMap::new);
static REDIS_INSTANCES: Lazy<DashMap<String, ConnectionManager>> = Lazy::new(DashMap::new);

pub fn register_mysql_instance(name: impl Into<String>, pool: MySqlPool) {
    MYSQL_INSTANCES.insert(name.into(), pool);
}

pub fn mysql_instance(name: &str) -> Option<MySqlPool> {
    MYSQL_INSTANCES.get(name).map(|entry| entry.clone())
}

pub fn unregister_mysql_instance(name: &str) {
    MYSQL_INSTANCES.remove(name);
}

pub fn register_postgres_instance(name: impl Into<String>, pool: PgPool) {
    POSTGRES_INSTANCES.insert(name.into(), pool);
}

pub fn postgres_instance(name: &str) -> Option<PgPool> {
    POSTGRES_INSTANCES.get(name).map(|entry| entry.clone())
}

pub fn unregister_postgres_instance(name: &str) {
    POSTGRES_INSTANCES.remove(name);
}

pub fn register_redis_instance(name: impl Into<String>, connection: ConnectionManager) {
    REDIS_INSTANCES.insert(name.into(), connection);
}

pub fn redis_instance(name: &str) -> Option<ConnectionManager> {
    REDIS_INSTANCES.get(name).map(|entry| entry.clone())
}

pub fn unregister_redis_instance(name: &str) {
    REDIS_INSTANCES.remove(name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    /// **Scenario**: Register, look up, and unregister a named instance.
    #[tokio::test]
    async fn register_and_unregister_roundtrip() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/heddle_registry_test")
            .expect("lazy pool");
        register_postgres_instance("registry-test", pool);
        assert!(postgres_instance("registry-test").is_some());
        unregister_postgres_instance("registry-test");
        assert!(postgres_instance("registry-test").is_none());
    }
}
