//! PostgreSQL beacon store.
//!
//! Layout: a `beacons` table naming each chain, and `beacon_details`
//! holding one row per round, linked to its chain by `fk_beacon_id`.

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use tracing::debug;

use crate::beacon::BeaconRecord;
use crate::error::{Error, Result};

/// Name of the constraint dropped during bulk loads.
pub const FK_NAME: &str = "fk_beacon_id";

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS beacons (
        id   SERIAL PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS beacon_details (
        beacon_id INTEGER NOT NULL,
        round     BIGINT  NOT NULL,
        signature BYTEA   NOT NULL,
        PRIMARY KEY (beacon_id, round),
        CONSTRAINT fk_beacon_id FOREIGN KEY (beacon_id) REFERENCES beacons (id) ON DELETE CASCADE
    )",
];

/// Connection to the rows of one named beacon.
pub struct PgStore {
    pool: PgPool,
    beacon_id: i32,
}

impl PgStore {
    /// Connects, migrates the schema and resolves the beacon row,
    /// creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DestinationIo`] if the connection fails and
    /// [`Error::Schema`] if the schema cannot be set up.
    pub async fn connect(dsn: &str, beacon: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(dsn)
            .await
            .map_err(|e| Error::DestinationIo(format!("cannot connect to postgres: {e}")))?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| Error::Schema(format!("migrating error: {e}")))?;
        }

        sqlx::query("INSERT INTO beacons (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(beacon)
            .execute(&pool)
            .await
            .map_err(|e| Error::Schema(e.to_string()))?;

        let beacon_id: i32 = sqlx::query_scalar("SELECT id FROM beacons WHERE name = $1")
            .bind(beacon)
            .fetch_one(&pool)
            .await
            .map_err(|e| Error::Schema(e.to_string()))?;

        debug!(beacon, beacon_id, "resolved beacon table");
        Ok(Self { pool, beacon_id })
    }

    /// Number of rounds stored for the beacon.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DestinationIo`] if the query fails.
    pub async fn len(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM beacon_details WHERE beacon_id = $1")
            .bind(self.beacon_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Drops the foreign key from `beacon_details`, if present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] if the statement fails.
    pub async fn drop_fk(&self) -> Result<()> {
        sqlx::query(&format!(
            "ALTER TABLE beacon_details DROP CONSTRAINT IF EXISTS {FK_NAME}"
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Schema(format!("cannot drop {FK_NAME}: {e}")))?;
        Ok(())
    }

    /// Restores the foreign key on `beacon_details`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] if the constraint cannot be added back.
    pub async fn add_fk(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "ALTER TABLE beacon_details DROP CONSTRAINT IF EXISTS {FK_NAME}"
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Schema(format!("cannot restore {FK_NAME}: {e}")))?;
        sqlx::query(&format!(
            "ALTER TABLE beacon_details ADD CONSTRAINT {FK_NAME} \
             FOREIGN KEY (beacon_id) REFERENCES beacons (id) ON DELETE CASCADE"
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Schema(format!("cannot restore {FK_NAME}: {e}")))?;
        tx.commit().await?;
        Ok(())
    }

    /// Inserts a batch of records with one multi-row statement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DestinationIo`] if a round does not fit a `BIGINT`
    /// or the insert fails.
    pub async fn batch_put(&self, records: &[BeaconRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let rows = records
            .iter()
            .map(|r| {
                i64::try_from(r.round)
                    .map(|round| (round, r.signature.as_slice()))
                    .map_err(|_| Error::DestinationIo(format!("round {} overflows BIGINT", r.round)))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("INSERT INTO beacon_details (beacon_id, round, signature) ");
        builder.push_values(rows, |mut row, (round, signature)| {
            row.push(self.beacon_id)
                .push_bind(round)
                .push_bind(signature);
        });

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Closes the pool.
    pub async fn close(self) {
        self.pool.close().await;
    }
}
