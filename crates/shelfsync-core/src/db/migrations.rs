//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }
    if version < 3 {
        migrate_v3(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Execute statements inside one transaction, rolling back on the first failure
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn
        .execute("INSERT INTO schema_version (version) VALUES (?)", [i64::from(version)])
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: inventory, catalog, and snapshots
async fn migrate_v1(conn: &Connection) -> Result<()> {
    apply(
        conn,
        1,
        &[
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            "CREATE TABLE IF NOT EXISTS inventory_items (
                id TEXT PRIMARY KEY,
                sku TEXT NOT NULL,
                brand TEXT NOT NULL,
                model TEXT NOT NULL,
                listing_type TEXT NOT NULL,
                condition TEXT,
                serial_number TEXT,
                price REAL NOT NULL,
                content TEXT NOT NULL DEFAULT '{}',
                enrichment_status TEXT NOT NULL DEFAULT 'pending',
                commerce_product_id TEXT,
                commerce_variant_id TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_inventory_sku ON inventory_items(sku)",
            "CREATE INDEX IF NOT EXISTS idx_inventory_brand ON inventory_items(brand COLLATE NOCASE)",
            "CREATE TABLE IF NOT EXISTS catalog_entries (
                id TEXT PRIMARY KEY,
                external_id TEXT,
                title TEXT NOT NULL,
                vendor TEXT,
                product_type TEXT,
                variants TEXT NOT NULL DEFAULT '[]',
                linked_inventory_id TEXT REFERENCES inventory_items(id) ON DELETE SET NULL,
                imported_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_catalog_linked ON catalog_entries(linked_inventory_id)",
            "CREATE TABLE IF NOT EXISTS snapshots (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL REFERENCES inventory_items(id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                note TEXT,
                captured TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_snapshots_owner ON snapshots(owner_id, created_at DESC)",
        ],
    )
    .await
}

/// Migration to version 2: idempotency records
async fn migrate_v2(conn: &Connection) -> Result<()> {
    apply(
        conn,
        2,
        &[
            "CREATE TABLE IF NOT EXISTS idempotency_records (
                id TEXT PRIMARY KEY,
                endpoint TEXT NOT NULL,
                idempotency_key TEXT NOT NULL,
                request_hash TEXT NOT NULL,
                state TEXT NOT NULL,
                status_code INTEGER,
                response_body TEXT,
                locked_until INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (endpoint, idempotency_key)
            )",
        ],
    )
    .await
}

/// Migration to version 3: stored platform access tokens
async fn migrate_v3(conn: &Connection) -> Result<()> {
    apply(
        conn,
        CURRENT_VERSION,
        &[
            "CREATE TABLE IF NOT EXISTS oauth_tokens (
                provider TEXT NOT NULL,
                shop_domain TEXT NOT NULL,
                access_token TEXT NOT NULL,
                scope TEXT,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (provider, shop_domain)
            )",
        ],
    )
    .await
}
