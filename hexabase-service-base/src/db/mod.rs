use hexabase_common::config::DbConfig;
use include_dir::Dir;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPoolOptions, PgSslMode};
use sqlx::{PgPool, Postgres};
use std::time::Duration;

/// Thin wrapper over `sqlx::PgPool` so repos take `&PostgresPool` rather
/// than a bare `sqlx::Pool`, the way the teacher's repos take
/// `Arc<Pool<DB>>`. Simplified to Postgres only: the teacher supports
/// SQLite too via `conditional_trait_gen`, but the control plane this crate
/// serves only ever runs against Postgres, so that generic-row ceremony
/// buys nothing here.
#[derive(Clone)]
pub struct PostgresPool {
    pool: PgPool,
}

impl PostgresPool {
    pub async fn configured(config: &DbConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(
                sqlx::postgres::PgConnectOptions::new()
                    .host(&config.host)
                    .port(config.port)
                    .database(&config.database)
                    .username(&config.username)
                    .password(&config.password)
                    .ssl_mode(PgSslMode::Prefer),
            )
            .await?;

        if let Some(schema) = &config.schema {
            sqlx::query(&format!("SET search_path TO {schema}"))
                .execute(&pool)
                .await?;
        }

        Ok(Self { pool })
    }

    pub fn inner(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the embedded migrations for a single crate's `migrations/`
    /// directory (passed in by the caller via `include_dir!`), matching
    /// the teacher's per-service `IncludedMigrationsDir` idiom.
    pub async fn migrate(&self, migrations: &Dir<'_>) -> Result<(), sqlx::Error> {
        let migrator = migrator_from_dir(migrations);
        migrator.run(&self.pool).await.map_err(|e| match e {
            sqlx::migrate::MigrateError::Execute(e) => e,
            other => sqlx::Error::Configuration(other.into()),
        })
    }
}

fn migrator_from_dir(dir: &Dir<'_>) -> Migrator {
    // sqlx's `Migrator` only builds from a filesystem path at compile time
    // via `migrate!`, so at runtime we resolve the `include_dir!` entries
    // into a temp directory sqlx can scan. This keeps migrations embedded
    // in the binary (no runtime dependency on a checked-out repo) while
    // still using sqlx's own migration bookkeeping (`_sqlx_migrations`).
    let tmp = tempfile_dir();
    dir.extract(&tmp).expect("failed to extract migrations");
    // Migrator::new is async but only does filesystem IO; block_on is safe
    // here because this function itself is not called from async context
    // directly (callers await `migrate`, which owns the runtime).
    futures::executor::block_on(Migrator::new(tmp.as_path()))
        .expect("failed to build migrator from embedded migrations")
}

fn tempfile_dir() -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("hexabase-migrations-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&path).expect("failed to create migrations tempdir");
    path
}

pub type Db = Postgres;
