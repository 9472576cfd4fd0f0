use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::dataset::LeadRow;
use crate::models::Lead;

pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    info!("✅ Connected to {}", database_url);
    Ok(pool)
}

pub async fn init_db(pool: &SqlitePool) -> Result<()> {
    // 1. Base schema
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS companies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            company_name TEXT NOT NULL,
            maps_link TEXT UNIQUE,
            city TEXT,
            tag TEXT,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );
        "#,
    )
    .execute(pool)
    .await?;

    // 2. Schema evolution. SQLite has no ADD COLUMN IF NOT EXISTS, so a
    // failure here just means the column is already there.
    for column in [
        "address TEXT",
        "phone TEXT",
        "website TEXT",
        "rating REAL",
        "reviews_count INTEGER",
        "email TEXT",
        "social_links TEXT",
        "status TEXT",
        "updated_at TIMESTAMP",
    ] {
        let ddl = format!("ALTER TABLE companies ADD COLUMN {};", column);
        if let Err(e) = sqlx::query(&ddl).execute(pool).await {
            debug!("skipping column {}: {}", column, e);
        }
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_companies_city ON companies(city);")
        .execute(pool)
        .await?;

    Ok(())
}

/// Insert or update by `maps_link`. The row id and any columns this crate
/// does not own survive an update.
pub async fn upsert_lead(pool: &SqlitePool, lead: &Lead) -> Result<()> {
    let row = LeadRow::from(lead);
    sqlx::query(
        r#"
        INSERT INTO companies
            (company_name, maps_link, city, tag, address, phone, website,
             rating, reviews_count, email, social_links, status, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(maps_link) DO UPDATE SET
            company_name = excluded.company_name,
            city = excluded.city,
            tag = excluded.tag,
            address = excluded.address,
            phone = excluded.phone,
            website = excluded.website,
            rating = excluded.rating,
            reviews_count = excluded.reviews_count,
            email = excluded.email,
            social_links = excluded.social_links,
            status = excluded.status,
            updated_at = CURRENT_TIMESTAMP;
        "#,
    )
    .bind(row.company)
    .bind(row.maps_link)
    .bind(row.city)
    .bind(row.tag)
    .bind(row.address)
    .bind(row.phone)
    .bind(row.website)
    .bind(row.rating.map(f64::from))
    .bind(row.reviews_count.map(i64::from))
    .bind(row.email)
    .bind(row.social_links)
    .bind(row.status)
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CompanyRecord {
    pub id: i64,
    pub company_name: String,
    pub maps_link: Option<String>,
    pub city: Option<String>,
    pub tag: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub rating: Option<f64>,
    pub reviews_count: Option<i64>,
    pub email: Option<String>,
    pub social_links: Option<String>,
    pub status: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompanyFilter {
    pub city: Option<String>,
    pub has_website: Option<bool>,
    pub has_email: Option<bool>,
    pub search: Option<String>,
}

pub async fn list_companies(pool: &SqlitePool, filter: &CompanyFilter) -> Result<Vec<CompanyRecord>> {
    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT id, company_name, maps_link, city, tag, address, phone, website, rating, \
         reviews_count, email, social_links, status, \
         CAST(created_at AS TEXT) AS created_at, CAST(updated_at AS TEXT) AS updated_at \
         FROM companies WHERE 1 = 1",
    );

    if let Some(city) = filter.city.as_deref().filter(|c| !c.is_empty()) {
        query.push(" AND city = ").push_bind(city.to_string());
    }
    match filter.has_website {
        Some(true) => {
            query.push(" AND website IS NOT NULL AND website != ''");
        }
        Some(false) => {
            query.push(" AND (website IS NULL OR website = '')");
        }
        None => {}
    }
    match filter.has_email {
        Some(true) => {
            query.push(" AND email IS NOT NULL AND email != ''");
        }
        Some(false) => {
            query.push(" AND (email IS NULL OR email = '')");
        }
        None => {}
    }
    if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search);
        query
            .push(" AND (company_name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR website LIKE ")
            .push_bind(pattern.clone())
            .push(" OR email LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    query.push(" ORDER BY COALESCE(updated_at, created_at) DESC, id DESC");

    Ok(query.build_query_as::<CompanyRecord>().fetch_all(pool).await?)
}

#[derive(Debug, Serialize, PartialEq)]
pub struct CityCount {
    pub city: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct Stats {
    pub total: i64,
    pub with_website: i64,
    pub with_email: i64,
    pub top_cities: Vec<CityCount>,
    pub last_update: Option<String>,
}

pub async fn stats(pool: &SqlitePool) -> Result<Stats> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM companies")
        .fetch_one(pool)
        .await?;
    let with_website: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM companies WHERE website IS NOT NULL AND website != ''",
    )
    .fetch_one(pool)
    .await?;
    let with_email: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM companies WHERE email IS NOT NULL AND email != ''")
            .fetch_one(pool)
            .await?;

    let top_cities = sqlx::query_as::<_, (String, i64)>(
        "SELECT city, COUNT(*) AS n FROM companies WHERE city IS NOT NULL \
         GROUP BY city ORDER BY n DESC, city LIMIT 10",
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|(city, count)| CityCount { city, count })
    .collect();

    let last_update: Option<String> = sqlx::query_scalar(
        "SELECT CAST(MAX(COALESCE(updated_at, created_at)) AS TEXT) FROM companies",
    )
    .fetch_one(pool)
    .await?;

    Ok(Stats {
        total,
        with_website,
        with_email,
        top_cities,
        last_update,
    })
}

pub async fn cities(pool: &SqlitePool) -> Result<Vec<String>> {
    Ok(sqlx::query_scalar(
        "SELECT DISTINCT city FROM companies WHERE city IS NOT NULL AND city != '' ORDER BY city",
    )
    .fetch_all(pool)
    .await?)
}

/// Durable destination for accepted leads, called from the crawl thread.
/// Returns how many of `leads` were stored.
pub trait LeadSink: Send + Sync {
    fn upsert_all(&self, leads: &[Lead]) -> Result<usize>;
}

/// Blocks the calling (non-runtime) thread on the async pool.
pub struct SqliteSink {
    pool: SqlitePool,
    handle: Handle,
}

impl SqliteSink {
    pub fn new(pool: SqlitePool, handle: Handle) -> Self {
        Self { pool, handle }
    }
}

impl LeadSink for SqliteSink {
    fn upsert_all(&self, leads: &[Lead]) -> Result<usize> {
        self.handle.block_on(async {
            let mut stored = 0;
            for lead in leads {
                match upsert_lead(&self.pool, lead).await {
                    Ok(()) => stored += 1,
                    Err(e) => warn!("⚠️ Could not store {}: {:#}", lead.name, e),
                }
            }
            Ok::<_, anyhow::Error>(stored)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LeadStatus, WorkUnit};

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_db(&pool).await.unwrap();
        pool
    }

    fn lead(name: &str, city: &str, link: &str) -> Lead {
        Lead::stub(name, link, &WorkUnit::new(city, "Agence Web"))
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let pool = memory_pool().await;
        init_db(&pool).await.unwrap();
        assert_eq!(stats(&pool).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_upsert_keeps_id_and_foreign_columns() {
        let pool = memory_pool().await;
        sqlx::query("ALTER TABLE companies ADD COLUMN tech_stack TEXT")
            .execute(&pool)
            .await
            .unwrap();

        let mut pixel = lead("Studio Pixel", "Lausanne", "https://www.google.com/maps/place/pixel");
        upsert_lead(&pool, &pixel).await.unwrap();
        sqlx::query("UPDATE companies SET tech_stack = 'WordPress'")
            .execute(&pool)
            .await
            .unwrap();

        pixel.website = Some("https://pixel.ch".into());
        pixel.emails = vec!["hello@pixel.ch".into()];
        pixel.status = LeadStatus::MiningSuccess;
        upsert_lead(&pool, &pixel).await.unwrap();

        let rows: Vec<(i64, Option<String>, Option<String>, Option<String>)> =
            sqlx::query_as("SELECT id, website, status, tech_stack FROM companies")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(rows.len(), 1);
        let (id, website, status, tech) = &rows[0];
        assert_eq!(*id, 1);
        assert_eq!(website.as_deref(), Some("https://pixel.ch"));
        assert_eq!(status.as_deref(), Some("Mining-success"));
        assert_eq!(tech.as_deref(), Some("WordPress"));
    }

    #[tokio::test]
    async fn test_filters_and_stats() {
        let pool = memory_pool().await;
        let mut pixel = lead("Studio Pixel", "Lausanne", "https://www.google.com/maps/place/pixel");
        pixel.website = Some("https://pixel.ch".into());
        pixel.emails = vec!["hello@pixel.ch".into()];
        let mut code = lead("Atelier Code", "Genève", "https://www.google.com/maps/place/code");
        code.website = Some("https://code.ch".into());
        let bakery = lead("Boulangerie", "Lausanne", "https://www.google.com/maps/place/pain");
        for l in [&pixel, &code, &bakery] {
            upsert_lead(&pool, l).await.unwrap();
        }

        let lausanne = list_companies(
            &pool,
            &CompanyFilter {
                city: Some("Lausanne".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(lausanne.len(), 2);

        let with_site = list_companies(
            &pool,
            &CompanyFilter {
                has_website: Some(true),
                has_email: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(with_site.len(), 1);
        assert_eq!(with_site[0].company_name, "Atelier Code");

        let searched = list_companies(
            &pool,
            &CompanyFilter {
                search: Some("pixel".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(searched.len(), 1);

        let summary = stats(&pool).await.unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.with_website, 2);
        assert_eq!(summary.with_email, 1);
        assert_eq!(
            summary.top_cities[0],
            CityCount {
                city: "Lausanne".into(),
                count: 2
            }
        );
        assert!(summary.last_update.is_some());

        assert_eq!(cities(&pool).await.unwrap(), vec!["Genève", "Lausanne"]);
    }

    #[test]
    fn test_sink_blocks_on_the_runtime() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let pool = runtime.block_on(memory_pool());
        let sink = SqliteSink::new(pool.clone(), runtime.handle().clone());

        let leads = vec![
            lead("A", "Sion", "https://www.google.com/maps/place/a"),
            lead("B", "Sion", "https://www.google.com/maps/place/b"),
        ];
        assert_eq!(sink.upsert_all(&leads).unwrap(), 2);
        assert_eq!(sink.upsert_all(&leads).unwrap(), 2);

        let total = runtime.block_on(stats(&pool)).unwrap().total;
        assert_eq!(total, 2);
    }

    #[test]
    fn test_sink_skips_rejected_rows_and_stores_the_rest() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let pool = runtime.block_on(memory_pool());
        runtime
            .block_on(
                sqlx::query(
                    "CREATE TRIGGER reject_bad BEFORE INSERT ON companies \
                     WHEN NEW.company_name = 'Bad' \
                     BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
                )
                .execute(&pool),
            )
            .unwrap();
        let sink = SqliteSink::new(pool.clone(), runtime.handle().clone());

        let leads = vec![
            lead("Bad", "Sion", "https://www.google.com/maps/place/bad"),
            lead("Good", "Sion", "https://www.google.com/maps/place/good"),
        ];
        assert_eq!(sink.upsert_all(&leads).unwrap(), 1);

        let total = runtime.block_on(stats(&pool)).unwrap().total;
        assert_eq!(total, 1);
    }
}
