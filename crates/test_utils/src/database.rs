//! Database Test Utilities
//!
//! Starts a PostgreSQL container, applies the engine's migrations and hands
//! out pools and adapters for integration tests. Requires a Docker daemon.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

use domain_billing::{BillingService, BillingSettings, Invoice, ProjectBillingContext, Quote};
use infra_db::repositories::billing::{DbBillingUnit, DbDiscountType, DbInvoiceStatus, DbQuoteStatus};
use infra_db::{create_pool, run_migrations, DatabaseConfig, PostgresBillingReads, PostgresBillingStore};

const POSTGRES_TAG: &str = "16-alpine";
const POSTGRES_USER: &str = "test_user";
const POSTGRES_PASSWORD: &str = "test_password";
const POSTGRES_DB: &str = "billing_test";

/// Configuration for test database
#[derive(Debug, Clone)]
pub struct TestDatabaseConfig {
    pub user: String,
    pub password: String,
    pub database: String,
    pub host: String,
    pub port: u16,
}

impl Default for TestDatabaseConfig {
    fn default() -> Self {
        Self {
            user: POSTGRES_USER.to_string(),
            password: POSTGRES_PASSWORD.to_string(),
            database: POSTGRES_DB.to_string(),
            host: "localhost".to_string(),
            port: 5432,
        }
    }
}

impl TestDatabaseConfig {
    /// Creates the database connection URL
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

/// A migrated PostgreSQL test container
pub struct TestDatabase {
    _container: ContainerAsync<Postgres>,
    pub config: TestDatabaseConfig,
    pub pool: PgPool,
}

impl TestDatabase {
    /// Starts a container and applies every migration
    ///
    /// # Errors
    ///
    /// Returns an error if the container fails to start or a migration fails
    pub async fn new() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let container = Postgres::default()
            .with_user(POSTGRES_USER)
            .with_password(POSTGRES_PASSWORD)
            .with_db_name(POSTGRES_DB)
            .with_tag(POSTGRES_TAG)
            .start()
            .await?;

        let config = TestDatabaseConfig {
            host: container.get_host().await?.to_string(),
            port: container.get_host_port_ipv4(5432).await?,
            ..TestDatabaseConfig::default()
        };

        let pool = create_pool(
            DatabaseConfig::new(config.connection_url())
                .max_connections(5)
                .connect_timeout(Duration::from_secs(30)),
        )
        .await?;
        run_migrations(&pool).await?;

        Ok(Self {
            _container: container,
            config,
            pool,
        })
    }

    /// Returns a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// A service over the Postgres adapters of this database
    pub fn service(&self, settings: BillingSettings) -> BillingService {
        BillingService::new(
            Arc::new(PostgresBillingReads::new(self.pool.clone())),
            Arc::new(PostgresBillingStore::new(self.pool.clone())),
            settings,
        )
    }

    /// Inserts a project and its service lines
    ///
    /// Lines with a `service_id` also get a catalogue row carrying their
    /// service price and day rate; those tiers are dropped for lines without
    /// one.
    pub async fn seed_project(&self, project: &ProjectBillingContext) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO projects (id, business_id, client_id, currency, billing_quote_id, default_deposit_percent) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(project.project_id.as_uuid())
        .bind(project.business_id.as_uuid())
        .bind(project.client_id.map(|id| *id.as_uuid()))
        .bind(project.currency.code())
        .bind(project.billing_quote_id.map(|id| *id.as_uuid()))
        .bind(project.default_deposit_percent)
        .execute(&mut *tx)
        .await?;

        for (position, line) in project.service_lines.iter().enumerate() {
            if let Some(service_id) = line.service_id {
                sqlx::query(
                    "INSERT INTO services (id, business_id, name, price_cents, day_rate_cents) \
                     VALUES ($1, $2, $3, $4, $5) ON CONFLICT (id) DO NOTHING",
                )
                .bind(service_id.as_uuid())
                .bind(project.business_id.as_uuid())
                .bind(&line.label)
                .bind(line.service_price_cents)
                .bind(line.day_rate_cents)
                .execute(&mut *tx)
                .await?;
            }
            sqlx::query(
                "INSERT INTO project_services \
                 (id, project_id, service_id, label, quantity, price_cents, discount_type, discount_value, billing_unit, position) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(uuid::Uuid::now_v7())
            .bind(project.project_id.as_uuid())
            .bind(line.service_id.map(|id| *id.as_uuid()))
            .bind(&line.label)
            .bind(line.quantity)
            .bind(line.project_price_cents)
            .bind(DbDiscountType::from(line.discount_type))
            .bind(line.discount_value)
            .bind(DbBillingUnit::from(line.billing_unit))
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await
    }

    pub async fn seed_quote(&self, quote: &Quote) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO quotes \
             (id, business_id, project_id, client_id, currency, total_cents, deposit_cents, balance_cents, \
              deposit_percent, status, issued_at, signed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(quote.id.as_uuid())
        .bind(quote.business_id.as_uuid())
        .bind(quote.project_id.as_uuid())
        .bind(quote.client_id.map(|id| *id.as_uuid()))
        .bind(quote.currency.code())
        .bind(quote.total_cents)
        .bind(quote.deposit_cents)
        .bind(quote.balance_cents)
        .bind(quote.deposit_percent)
        .bind(DbQuoteStatus::from(quote.status))
        .bind(quote.issued_at)
        .bind(quote.signed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn seed_invoice(&self, invoice: &Invoice) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO invoices \
             (id, business_id, project_id, client_id, quote_id, currency, total_cents, status, issued_at, paid_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(invoice.id.as_uuid())
        .bind(invoice.business_id.as_uuid())
        .bind(invoice.project_id.map(|id| *id.as_uuid()))
        .bind(invoice.client_id.map(|id| *id.as_uuid()))
        .bind(invoice.quote_id.map(|id| *id.as_uuid()))
        .bind(invoice.currency.code())
        .bind(invoice.total_cents)
        .bind(DbInvoiceStatus::from(invoice.status))
        .bind(invoice.issued_at)
        .bind(invoice.paid_at)
        .bind(invoice.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Creates an isolated test database for a single test
pub async fn create_isolated_test_database() -> Result<TestDatabase, Box<dyn std::error::Error + Send + Sync>> {
    TestDatabase::new().await
}

/// Helper macro for running database tests
///
/// The test is ignored by default since it needs Docker; run with
/// `--ignored`.
#[macro_export]
macro_rules! db_test {
    ($name:ident, |$db:ident| $body:block) => {
        #[tokio::test]
        #[ignore = "requires docker"]
        async fn $name() {
            let $db = $crate::database::create_isolated_test_database()
                .await
                .expect("Failed to create test database");
            $body
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_connection_url() {
        let config = TestDatabaseConfig::default();
        let url = config.connection_url();

        assert!(url.starts_with("postgres://"));
        assert!(url.contains(POSTGRES_USER));
        assert!(url.ends_with(POSTGRES_DB));
    }
}
