//! Stored platform access tokens (obtained through an earlier OAuth install)

use libsql::{params, Connection};

use crate::error::Result;

/// Trait for access token storage operations (async)
#[allow(async_fn_in_trait)]
pub trait TokenRepository {
    /// Zero-or-one lookup by (provider, shop domain)
    async fn find(&self, provider: &str, shop_domain: &str) -> Result<Option<String>>;

    /// Insert or replace the token for (provider, shop domain)
    async fn upsert(
        &self,
        provider: &str,
        shop_domain: &str,
        access_token: &str,
        scope: Option<&str>,
    ) -> Result<()>;
}

/// libSQL implementation of `TokenRepository`
pub struct LibSqlTokenRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlTokenRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl TokenRepository for LibSqlTokenRepository<'_> {
    async fn find(&self, provider: &str, shop_domain: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT access_token FROM oauth_tokens WHERE provider = ? AND shop_domain = ?",
                [provider, shop_domain],
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                let token: String = row.get(0)?;
                let token = token.trim().to_string();
                Ok(if token.is_empty() { None } else { Some(token) })
            }
            None => Ok(None),
        }
    }

    async fn upsert(
        &self,
        provider: &str,
        shop_domain: &str,
        access_token: &str,
        scope: Option<&str>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.conn
            .execute(
                "INSERT INTO oauth_tokens (provider, shop_domain, access_token, scope, updated_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT (provider, shop_domain)
                 DO UPDATE SET access_token = excluded.access_token,
                               scope = excluded.scope,
                               updated_at = excluded.updated_at",
                params![
                    provider,
                    shop_domain,
                    access_token,
                    scope.map(ToString::to_string),
                    now
                ],
            )
            .await?;
        Ok(())
    }
}
