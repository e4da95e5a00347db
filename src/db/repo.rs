use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::instrument;
use uuid::Uuid;

use super::model::{Checkpoint, ConnectionState};
use crate::model::{RunKind, SourceKind, SyncDetail};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the
/// parent directory exists. Leaves in-memory URLs untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn upsert_connection(pool: &Pool, connection: &ConnectionState) -> Result<()> {
    sqlx::query(
        "INSERT INTO connections (tenant_id, pim_url, username, password, client_secret, \
         provider_client_id, is_alive, is_synchronizing, channel_code, channel_name, category_tree) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(tenant_id) DO UPDATE SET \
           pim_url = excluded.pim_url, \
           username = excluded.username, \
           password = excluded.password, \
           client_secret = excluded.client_secret, \
           provider_client_id = excluded.provider_client_id, \
           is_alive = excluded.is_alive, \
           is_synchronizing = excluded.is_synchronizing, \
           channel_code = excluded.channel_code, \
           channel_name = excluded.channel_name, \
           category_tree = excluded.category_tree",
    )
    .bind(connection.tenant_id.to_string())
    .bind(&connection.pim_url)
    .bind(&connection.username)
    .bind(&connection.password)
    .bind(&connection.client_secret)
    .bind(&connection.provider_client_id)
    .bind(connection.is_alive)
    .bind(connection.is_synchronizing)
    .bind(&connection.channel.channel_code)
    .bind(&connection.channel.channel_name)
    .bind(&connection.channel.category_tree)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_connection(pool: &Pool, tenant_id: Uuid) -> Result<Option<ConnectionState>> {
    let row = sqlx::query(
        "SELECT tenant_id, pim_url, username, password, client_secret, provider_client_id, \
         is_alive, is_synchronizing, channel_code, channel_name, category_tree \
         FROM connections WHERE tenant_id = ?",
    )
    .bind(tenant_id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let tenant: String = row.get("tenant_id");
    Ok(Some(ConnectionState {
        tenant_id: Uuid::parse_str(&tenant)?,
        pim_url: row.get("pim_url"),
        username: row.get("username"),
        password: row.get("password"),
        client_secret: row.get("client_secret"),
        provider_client_id: row.get("provider_client_id"),
        is_alive: row.get("is_alive"),
        is_synchronizing: row.get("is_synchronizing"),
        channel: crate::model::ChannelConfig {
            channel_code: row.get::<Option<String>, _>("channel_code").unwrap_or_default(),
            channel_name: row.get::<Option<String>, _>("channel_name").unwrap_or_default(),
            category_tree: row.get::<Option<String>, _>("category_tree").unwrap_or_default(),
        },
    }))
}

/// Set the liveness/synchronizing flags on an existing connection.
#[instrument(skip_all)]
pub async fn update_connection_flags(
    pool: &Pool,
    tenant_id: Uuid,
    is_alive: bool,
    is_synchronizing: bool,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE connections SET is_alive = ?, is_synchronizing = ? WHERE tenant_id = ?",
    )
    .bind(is_alive)
    .bind(is_synchronizing)
    .bind(tenant_id.to_string())
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(anyhow!("connection not found: {tenant_id}"));
    }
    Ok(())
}

/// Append ledger entries. Rows are never updated or deleted afterwards.
#[instrument(skip_all)]
pub async fn append_sync_details(
    pool: &Pool,
    tenant_id: Uuid,
    details: &[SyncDetail],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM connections WHERE tenant_id = ?")
        .bind(tenant_id.to_string())
        .fetch_one(&mut *tx)
        .await?;
    if exists == 0 {
        return Err(anyhow!("connection not found: {tenant_id}"));
    }
    for detail in details {
        sqlx::query(
            "INSERT INTO sync_details (tenant_id, synced_at, ingested_count, source, run_kind, succeeded) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(tenant_id.to_string())
        .bind(detail.synced_at)
        .bind(detail.ingested_count)
        .bind(detail.source.as_str())
        .bind(detail.run_kind.as_str())
        .bind(detail.succeeded)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Timestamp of the most recent succeeded entry for one source, if any.
/// This is the starting filter for the next run of that source.
#[instrument(skip_all)]
pub async fn last_successful_sync(
    pool: &Pool,
    tenant_id: Uuid,
    source: SourceKind,
) -> Result<Option<DateTime<Utc>>> {
    let synced_at: Option<DateTime<Utc>> = sqlx::query_scalar(
        "SELECT synced_at FROM sync_details \
         WHERE tenant_id = ? AND source = ? AND succeeded = 1 \
         ORDER BY id DESC LIMIT 1",
    )
    .bind(tenant_id.to_string())
    .bind(source.as_str())
    .fetch_optional(pool)
    .await?;
    Ok(synced_at)
}

/// All ledger rows for a tenant, oldest first.
#[instrument(skip_all)]
pub async fn list_sync_details(pool: &Pool, tenant_id: Uuid) -> Result<Vec<SyncDetail>> {
    let rows = sqlx::query(
        "SELECT synced_at, ingested_count, source, run_kind, succeeded \
         FROM sync_details WHERE tenant_id = ? ORDER BY id",
    )
    .bind(tenant_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let source: String = row.get("source");
            let run_kind: String = row.get("run_kind");
            Ok(SyncDetail {
                synced_at: row.get("synced_at"),
                ingested_count: row.get("ingested_count"),
                source: SourceKind::parse(&source)
                    .ok_or_else(|| anyhow!("unknown source kind: {source}"))?,
                run_kind: RunKind::parse(&run_kind)
                    .ok_or_else(|| anyhow!("unknown run kind: {run_kind}"))?,
                succeeded: row.get("succeeded"),
            })
        })
        .collect()
}

/// Persist the serialized input of a live workflow instance. Called before
/// each step so a restarted process resumes from the last page boundary.
#[instrument(skip_all)]
pub async fn save_checkpoint(
    pool: &Pool,
    instance_id: &str,
    workflow: &str,
    state: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO checkpoints (instance_id, workflow, state, updated_at) \
         VALUES (?, ?, ?, CURRENT_TIMESTAMP) \
         ON CONFLICT(instance_id) DO UPDATE SET \
           workflow = excluded.workflow, state = excluded.state, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(instance_id)
    .bind(workflow)
    .bind(state)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn load_checkpoint(pool: &Pool, instance_id: &str) -> Result<Option<Checkpoint>> {
    let row = sqlx::query("SELECT instance_id, workflow, state FROM checkpoints WHERE instance_id = ?")
        .bind(instance_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|row| Checkpoint {
        instance_id: row.get("instance_id"),
        workflow: row.get("workflow"),
        state: row.get("state"),
    }))
}

/// Delete a completed instance's checkpoint, ending its single-active-run
/// reservation.
#[instrument(skip_all)]
pub async fn clear_checkpoint(pool: &Pool, instance_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM checkpoints WHERE instance_id = ?")
        .bind(instance_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Out-of-band log row. Callers treat this as fire-and-forget.
#[instrument(skip_all)]
pub async fn insert_log(
    pool: &Pool,
    message: &str,
    category: &str,
    context: Option<&str>,
) -> Result<()> {
    sqlx::query("INSERT INTO sync_log (message, category, context) VALUES (?, ?, ?)")
        .bind(message)
        .bind(category)
        .bind(context)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChannelConfig, RunKind, SourceKind, SyncDetail};

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    fn sample_connection(tenant_id: Uuid) -> ConnectionState {
        ConnectionState {
            tenant_id,
            pim_url: "https://pim.example.com".into(),
            username: "sync-user".into(),
            password: "secret".into(),
            client_secret: "YmFzZTY0".into(),
            provider_client_id: "provider-1".into(),
            is_alive: true,
            is_synchronizing: false,
            channel: ChannelConfig {
                channel_code: "ecommerce".into(),
                channel_name: "Ecommerce".into(),
                category_tree: "master".into(),
            },
        }
    }

    #[tokio::test]
    async fn connection_upsert_round_trips() {
        let pool = setup_pool().await;
        let tenant = Uuid::new_v4();
        let connection = sample_connection(tenant);
        upsert_connection(&pool, &connection).await.unwrap();

        let loaded = get_connection(&pool, tenant).await.unwrap().unwrap();
        assert_eq!(loaded, connection);

        // Upsert replaces channel config in place.
        let mut updated = connection.clone();
        updated.channel.channel_code = "print".into();
        upsert_connection(&pool, &updated).await.unwrap();
        let loaded = get_connection(&pool, tenant).await.unwrap().unwrap();
        assert_eq!(loaded.channel.channel_code, "print");

        assert!(get_connection(&pool, Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ledger_is_append_only_and_drives_last_successful() {
        let pool = setup_pool().await;
        let tenant = Uuid::new_v4();
        upsert_connection(&pool, &sample_connection(tenant)).await.unwrap();

        let first = SyncDetail::now(40, SourceKind::Categories, RunKind::Manual, true);
        let failed = SyncDetail::now(10, SourceKind::Categories, RunKind::Manual, false);
        append_sync_details(&pool, tenant, &[first.clone()]).await.unwrap();
        append_sync_details(&pool, tenant, &[failed]).await.unwrap();

        // Failure entries leave a trace but do not advance the filter.
        let last = last_successful_sync(&pool, tenant, SourceKind::Categories)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.timestamp(), first.synced_at.timestamp());

        assert!(last_successful_sync(&pool, tenant, SourceKind::Products)
            .await
            .unwrap()
            .is_none());

        let all = list_sync_details(&pool, tenant).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].succeeded);
        assert!(!all[1].succeeded);
    }

    #[tokio::test]
    async fn ledger_rejects_unknown_tenant() {
        let pool = setup_pool().await;
        let detail = SyncDetail::now(1, SourceKind::Media, RunKind::Manual, true);
        let err = append_sync_details(&pool, Uuid::new_v4(), &[detail]).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn connection_flags_update() {
        let pool = setup_pool().await;
        let tenant = Uuid::new_v4();
        upsert_connection(&pool, &sample_connection(tenant)).await.unwrap();

        update_connection_flags(&pool, tenant, false, false).await.unwrap();
        let loaded = get_connection(&pool, tenant).await.unwrap().unwrap();
        assert!(!loaded.is_alive);
        assert!(!loaded.is_synchronizing);

        assert!(update_connection_flags(&pool, Uuid::new_v4(), true, false)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn checkpoint_round_trip_and_clear() {
        let pool = setup_pool().await;
        save_checkpoint(&pool, "sync-a-b", "coordinator", "{\"page\":1}")
            .await
            .unwrap();
        save_checkpoint(&pool, "sync-a-b", "coordinator", "{\"page\":2}")
            .await
            .unwrap();

        let cp = load_checkpoint(&pool, "sync-a-b").await.unwrap().unwrap();
        assert_eq!(cp.workflow, "coordinator");
        assert_eq!(cp.state, "{\"page\":2}");

        clear_checkpoint(&pool, "sync-a-b").await.unwrap();
        assert!(load_checkpoint(&pool, "sync-a-b").await.unwrap().is_none());
    }

    #[test]
    fn sqlite_url_normalization() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("postgres://x/y"),
            "postgres://x/y"
        );
        let url = prepare_sqlite_url("sqlite:///tmp/pim-sync-test/db.sqlite?mode=rwc");
        assert_eq!(url, "sqlite:///tmp/pim-sync-test/db.sqlite?mode=rwc");
        assert!(std::path::Path::new("/tmp/pim-sync-test").exists());
    }
}
