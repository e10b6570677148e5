use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};

pub type Db = Pool<Postgres>;

pub async fn connect(url: &str, max_connections: u32) -> Result<Db> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await?;
    Ok(pool)
}

pub async fn migrate(pool: &Db) -> Result<()> {
    // crate-relative path for sqlx migrations
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
