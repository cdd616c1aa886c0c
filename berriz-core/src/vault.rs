use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use thiserror::Error;

use crate::sqlite::configure_connection;

const VAULT_SCHEMA: &str = include_str!("../sql/key_vault.sql");

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("failed to open key vault {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on key vault: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("key vault path not configured")]
    MissingStore,
    #[error("unsupported value type in key vault: {0}")]
    UnsupportedValueType(String),
    #[error("failed to decode stored value: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type VaultResult<T> = Result<T, VaultError>;

/// A value persisted in the vault, tagged so that strings, integers and
/// JSON composites round-trip.
#[derive(Debug, Clone, PartialEq)]
pub enum VaultValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Json(serde_json::Value),
}

impl VaultValue {
    fn type_tag(&self) -> &'static str {
        match self {
            VaultValue::Str(_) => "str",
            VaultValue::Int(_) => "int",
            VaultValue::Bool(_) => "bool",
            VaultValue::Json(_) => "json",
        }
    }

    fn encode(&self) -> VaultResult<String> {
        match self {
            VaultValue::Str(value) => Ok(value.clone()),
            VaultValue::Int(value) => Ok(value.to_string()),
            VaultValue::Bool(value) => Ok(value.to_string()),
            VaultValue::Json(value) => Ok(serde_json::to_string(value)?),
        }
    }

    fn decode(value_type: &str, value_data: &str) -> VaultResult<Self> {
        match value_type {
            "str" => Ok(VaultValue::Str(value_data.to_string())),
            "int" => value_data
                .parse()
                .map(VaultValue::Int)
                .map_err(|_| VaultError::UnsupportedValueType(format!("int: {value_data}"))),
            "bool" => Ok(VaultValue::Bool(value_data.eq_ignore_ascii_case("true"))),
            "json" => Ok(VaultValue::Json(serde_json::from_str(value_data)?)),
            other => Err(VaultError::UnsupportedValueType(other.to_string())),
        }
    }

    /// The key string as consumed by the decrypt stage, regardless of how it
    /// was stored.
    pub fn as_key_string(&self) -> String {
        match self {
            VaultValue::Str(value) => value.clone(),
            VaultValue::Int(value) => value.to_string(),
            VaultValue::Bool(value) => value.to_string(),
            VaultValue::Json(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            VaultValue::Json(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeyVaultBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for KeyVaultBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl KeyVaultBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> VaultResult<KeyVault> {
        let path = self.path.ok_or(VaultError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(KeyVault { path, flags })
    }
}

/// Durable PSSH → decryption-key store. Every call opens a short-lived
/// connection; writers are serialized by sqlite itself.
#[derive(Debug, Clone)]
pub struct KeyVault {
    path: PathBuf,
    flags: OpenFlags,
}

impl KeyVault {
    pub fn builder() -> KeyVaultBuilder {
        KeyVaultBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> VaultResult<Self> {
        KeyVaultBuilder::new().path(path).build()
    }

    fn open(&self) -> VaultResult<Connection> {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            VaultError::Open {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| VaultError::Open {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> VaultResult<()> {
        let conn = self.open()?;
        conn.execute_batch(VAULT_SCHEMA)?;
        Ok(())
    }

    pub fn store(&self, pssh: &str, value: &VaultValue, drm_type: &str) -> VaultResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO key_vault (pssh, value_type, value_data, drm_type)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(pssh) DO UPDATE SET
                 value_type = excluded.value_type,
                 value_data = excluded.value_data,
                 drm_type = excluded.drm_type",
            params![pssh, value.type_tag(), value.encode()?, drm_type],
        )?;
        Ok(())
    }

    pub fn store_key(&self, pssh: &str, key: &str, drm_type: &str) -> VaultResult<()> {
        self.store(pssh, &VaultValue::Str(key.to_string()), drm_type)
    }

    pub fn retrieve(&self, pssh: &str) -> VaultResult<Option<VaultValue>> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT value_type, value_data FROM key_vault WHERE pssh = ?1",
                [pssh],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        match row {
            Some((value_type, value_data)) => {
                Ok(Some(VaultValue::decode(&value_type, &value_data)?))
            }
            None => Ok(None),
        }
    }

    pub fn retrieve_with_drm(&self, pssh: &str) -> VaultResult<Option<(VaultValue, String)>> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT value_type, value_data, drm_type FROM key_vault WHERE pssh = ?1",
                [pssh],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        match row {
            Some((value_type, value_data, drm_type)) => Ok(Some((
                VaultValue::decode(&value_type, &value_data)?,
                drm_type,
            ))),
            None => Ok(None),
        }
    }

    pub fn contains(&self, pssh: &str) -> VaultResult<bool> {
        let conn = self.open()?;
        let found = conn
            .query_row("SELECT 1 FROM key_vault WHERE pssh = ?1", [pssh], |_| {
                Ok(())
            })
            .optional()?;
        Ok(found.is_some())
    }

    pub fn list_by_drm(&self, drm_type: &str) -> VaultResult<Vec<(String, VaultValue)>> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare("SELECT pssh, value_type, value_data FROM key_vault WHERE drm_type = ?1")?;
        let rows = stmt
            .query_map([drm_type], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut entries = Vec::with_capacity(rows.len());
        for (pssh, value_type, value_data) in rows {
            entries.push((pssh, VaultValue::decode(&value_type, &value_data)?));
        }
        Ok(entries)
    }

    pub fn delete(&self, pssh: &str) -> VaultResult<bool> {
        let conn = self.open()?;
        let affected = conn.execute("DELETE FROM key_vault WHERE pssh = ?1", [pssh])?;
        Ok(affected > 0)
    }

    pub fn count(&self) -> VaultResult<usize> {
        let conn = self.open()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM key_vault", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn vault_in(dir: &Path) -> KeyVault {
        let vault = KeyVault::new(dir.join("local_key_vault.db")).unwrap();
        vault.initialize().unwrap();
        vault
    }

    #[test]
    fn store_then_retrieve_round_trips() {
        let dir = tempdir().unwrap();
        let vault = vault_in(dir.path());
        vault
            .store_key("AAAAVHBzc2g=", "00aa:11bb", "wv")
            .unwrap();
        let value = vault.retrieve("AAAAVHBzc2g=").unwrap().unwrap();
        assert_eq!(value.as_key_string(), "00aa:11bb");
        assert!(vault.contains("AAAAVHBzc2g=").unwrap());
        assert!(!vault.contains("other").unwrap());
    }

    #[test]
    fn second_store_replaces_value() {
        let dir = tempdir().unwrap();
        let vault = vault_in(dir.path());
        vault.store_key("pssh-a", "kid:old", "wv").unwrap();
        vault.store_key("pssh-a", "kid:new", "cdrm_wv").unwrap();
        let (value, drm) = vault.retrieve_with_drm("pssh-a").unwrap().unwrap();
        assert_eq!(value.as_key_string(), "kid:new");
        assert_eq!(drm, "cdrm_wv");
        assert_eq!(vault.count().unwrap(), 1);
    }

    #[test]
    fn json_values_round_trip() {
        let dir = tempdir().unwrap();
        let vault = vault_in(dir.path());
        let keys = serde_json::json!(["kid1:key1", "kid2:key2"]);
        vault
            .store("pssh-json", &VaultValue::Json(keys), "mspr")
            .unwrap();
        let value = vault.retrieve("pssh-json").unwrap().unwrap();
        assert_eq!(value.as_key_string(), "kid1:key1 kid2:key2");
        let listed = vault.list_by_drm("mspr").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "pssh-json");
    }

    #[test]
    fn delete_removes_row() {
        let dir = tempdir().unwrap();
        let vault = vault_in(dir.path());
        vault.store_key("pssh-b", "kid:key", "wv").unwrap();
        assert!(vault.delete("pssh-b").unwrap());
        assert!(!vault.delete("pssh-b").unwrap());
        assert!(vault.retrieve("pssh-b").unwrap().is_none());
    }
}
