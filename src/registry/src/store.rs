//! Persisted store of locally-attached provider configurations:
//! `id, type, name, serialized_config_blob, status, created_at, updated_at`.
//! Peer-discovered providers are never persisted.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteConnectOptions};
use sqlx::{Row, SqlitePool};

use mesh_util::config::InternalProviderConfig;
use mesh_util::data::ProviderStatus;
use mesh_util::error::Error;

#[derive(Debug, Clone)]
pub struct PersistedProvider {
	pub id: String,
	pub type_tag: String,
	pub name: String,
	pub config: InternalProviderConfig,
	pub status: ProviderStatus,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

pub struct ProviderStore {
	pool: SqlitePool,
}

impl ProviderStore {
	/// Open (and create if absent) the SQLite database at `path`.
	pub async fn open(path: &std::path::Path) -> Result<Self, Error> {
		let options = SqliteConnectOptions::new()
			.filename(path)
			.create_if_missing(true);
		let pool = SqlitePoolOptions::new()
			.max_connections(5)
			.connect_with(options)
			.await
			.map_err(|e| Error::Message(format!("opening provider store {}: {}", path.display(), e)))?;

		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS locally_attached_providers (
				id TEXT PRIMARY KEY,
				type_tag TEXT NOT NULL,
				name TEXT NOT NULL,
				config_blob TEXT NOT NULL,
				status TEXT NOT NULL,
				created_at TEXT NOT NULL,
				updated_at TEXT NOT NULL
			)
			"#,
		)
		.execute(&pool)
		.await
		.map_err(|e| Error::Message(format!("creating provider store schema: {}", e)))?;

		Ok(ProviderStore { pool })
	}

	pub async fn insert(
		&self,
		id: &str,
		type_tag: &str,
		name: &str,
		config: &InternalProviderConfig,
		status: ProviderStatus,
	) -> Result<(), Error> {
		let config_blob = serde_json::to_string(config)
			.map_err(|e| Error::Message(format!("serializing provider config: {}", e)))?;
		let now = Utc::now();

		sqlx::query(
			r#"
			INSERT INTO locally_attached_providers
			(id, type_tag, name, config_blob, status, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(id)
		.bind(type_tag)
		.bind(name)
		.bind(config_blob)
		.bind(status.to_string())
		.bind(now)
		.bind(now)
		.execute(&self.pool)
		.await
		.map_err(|e| Error::Message(format!("persisting provider {}: {}", id, e)))?;

		Ok(())
	}

	pub async fn update_status(&self, id: &str, status: ProviderStatus) -> Result<(), Error> {
		sqlx::query("UPDATE locally_attached_providers SET status = ?, updated_at = ? WHERE id = ?")
			.bind(status.to_string())
			.bind(Utc::now())
			.bind(id)
			.execute(&self.pool)
			.await
			.map_err(|e| Error::Message(format!("updating provider status {}: {}", id, e)))?;
		Ok(())
	}

	pub async fn delete(&self, id: &str) -> Result<(), Error> {
		sqlx::query("DELETE FROM locally_attached_providers WHERE id = ?")
			.bind(id)
			.execute(&self.pool)
			.await
			.map_err(|e| Error::Message(format!("deleting provider {}: {}", id, e)))?;
		Ok(())
	}

	/// All persisted providers, for rehydration at boot.
	pub async fn list_all(&self) -> Result<Vec<PersistedProvider>, Error> {
		let rows = sqlx::query("SELECT * FROM locally_attached_providers")
			.fetch_all(&self.pool)
			.await
			.map_err(|e| Error::Message(format!("listing persisted providers: {}", e)))?;

		rows.iter().map(row_to_persisted).collect()
	}
}

fn row_to_persisted(row: &sqlx::sqlite::SqliteRow) -> Result<PersistedProvider, Error> {
	let config_blob: String = row
		.try_get("config_blob")
		.map_err(|e| Error::Message(e.to_string()))?;
	let config: InternalProviderConfig = serde_json::from_str(&config_blob)
		.map_err(|e| Error::Message(format!("deserializing persisted provider config: {}", e)))?;
	let status_str: String = row.try_get("status").map_err(|e| Error::Message(e.to_string()))?;
	let status = match status_str.as_str() {
		"connected" => ProviderStatus::Connected,
		"disconnected" => ProviderStatus::Disconnected,
		_ => ProviderStatus::Unknown,
	};

	Ok(PersistedProvider {
		id: row.try_get("id").map_err(|e| Error::Message(e.to_string()))?,
		type_tag: row.try_get("type_tag").map_err(|e| Error::Message(e.to_string()))?,
		name: row.try_get("name").map_err(|e| Error::Message(e.to_string()))?,
		config,
		status,
		created_at: row.try_get("created_at").map_err(|e| Error::Message(e.to_string()))?,
		updated_at: row.try_get("updated_at").map_err(|e| Error::Message(e.to_string()))?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use mesh_util::data::ResourceInfo;

	#[tokio::test]
	async fn insert_and_rehydrate_round_trips() {
		let dir = tempfile::tempdir().unwrap();
		let store = ProviderStore::open(&dir.path().join("providers.db")).await.unwrap();

		let config = InternalProviderConfig::Mock {
			total: ResourceInfo::new(4000, 8 * 1024 * 1024 * 1024, 0),
		};
		store
			.insert("mock-abc123", "mock", "test mock", &config, ProviderStatus::Connected)
			.await
			.unwrap();

		let all = store.list_all().await.unwrap();
		assert_eq!(all.len(), 1);
		assert_eq!(all[0].id, "mock-abc123");
		assert!(matches!(all[0].config, InternalProviderConfig::Mock { .. }));
	}

	#[tokio::test]
	async fn delete_removes_entry() {
		let dir = tempfile::tempdir().unwrap();
		let store = ProviderStore::open(&dir.path().join("providers.db")).await.unwrap();
		let config = InternalProviderConfig::Mock { total: ResourceInfo::ZERO };
		store
			.insert("mock-xyz", "mock", "test", &config, ProviderStatus::Connected)
			.await
			.unwrap();
		store.delete("mock-xyz").await.unwrap();
		assert!(store.list_all().await.unwrap().is_empty());
	}
}
