use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use outflow_core::{ChannelKind, TenantId};
use outflow_vault::CredentialVault;

use crate::db::init_db;
use crate::error::{ChannelError, Result};
use crate::types::{ChannelConfig, ChannelSettings, Credentials};

/// Store for channel configurations, including credential sealing.
///
/// Credentials are written encrypted (`{"encrypted": <b64 blob>}`); reads
/// accept both that shape and legacy plain objects, which migrate to the
/// encrypted shape the next time they are written.
pub struct ChannelStore {
    db: Mutex<Connection>,
    vault: Arc<CredentialVault>,
}

impl ChannelStore {
    pub fn new(conn: Connection, vault: Arc<CredentialVault>) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            vault,
        })
    }

    /// Create a config with sealed credentials.
    pub fn create(
        &self,
        tenant: &TenantId,
        kind: ChannelKind,
        name: &str,
        credentials: &Credentials,
        settings: &ChannelSettings,
    ) -> Result<ChannelConfig> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let sealed = self.seal(credentials)?;
        let settings_json = serde_json::to_string(settings)?;

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO channel_configs
             (id, tenant_id, kind, name, active, is_default, credentials, settings,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, 0, ?5, ?6, ?7, ?7)",
            rusqlite::params![
                id,
                tenant.as_str(),
                kind.as_str(),
                name,
                sealed.to_string(),
                settings_json,
                now
            ],
        )?;
        info!(config_id = %id, kind = %kind, "channel config created");
        drop(db);
        self.get(tenant, &id)
    }

    pub fn get(&self, tenant: &TenantId, id: &str) -> Result<ChannelConfig> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, tenant_id, kind, name, active, is_default, credentials, settings,
                    created_at, updated_at
             FROM channel_configs WHERE tenant_id = ?1 AND id = ?2",
            rusqlite::params![tenant.as_str(), id],
            row_to_config,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => ChannelError::ConfigNotFound {
                id: id.to_string(),
            },
            other => ChannelError::Database(other),
        })
    }

    /// Active configs of one kind for a tenant.
    pub fn list_for_kind(&self, tenant: &TenantId, kind: ChannelKind) -> Result<Vec<ChannelConfig>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, tenant_id, kind, name, active, is_default, credentials, settings,
                    created_at, updated_at
             FROM channel_configs
             WHERE tenant_id = ?1 AND kind = ?2 AND active = 1
             ORDER BY created_at",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![tenant.as_str(), kind.as_str()],
            row_to_config,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Boot-time enumeration: every active session-kind config across all
    /// tenants. Only the startup reconnect and poll-seeding paths may use
    /// this; request-path reads stay tenant-scoped.
    pub fn list_session_configs(&self) -> Result<Vec<ChannelConfig>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, tenant_id, kind, name, active, is_default, credentials, settings,
                    created_at, updated_at
             FROM channel_configs
             WHERE kind IN ('WHATSAPP_WEB', 'TELEGRAM') AND active = 1
             ORDER BY tenant_id, created_at",
        )?;
        let rows = stmt.query_map([], row_to_config)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn update_settings(
        &self,
        tenant: &TenantId,
        id: &str,
        settings: &ChannelSettings,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let settings_json = serde_json::to_string(settings)?;
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE channel_configs SET settings = ?1, updated_at = ?2
             WHERE tenant_id = ?3 AND id = ?4",
            rusqlite::params![settings_json, now, tenant.as_str(), id],
        )?;
        if n == 0 {
            return Err(ChannelError::ConfigNotFound { id: id.to_string() });
        }
        Ok(())
    }

    pub fn set_active(&self, tenant: &TenantId, id: &str, active: bool) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE channel_configs SET active = ?1, updated_at = ?2
             WHERE tenant_id = ?3 AND id = ?4",
            rusqlite::params![active as i64, now, tenant.as_str(), id],
        )?;
        if n == 0 {
            return Err(ChannelError::ConfigNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Decrypt and parse a config's credentials.
    ///
    /// Dual-read: `{"encrypted": …}` is unsealed through the vault; anything
    /// else is treated as a legacy plaintext object.
    pub fn load_credentials(&self, config: &ChannelConfig) -> Result<Credentials> {
        let plain = match config.credentials.get("encrypted").and_then(|v| v.as_str()) {
            Some(blob) => {
                let bytes = self.vault.decrypt(blob)?;
                serde_json::from_slice(&bytes)?
            }
            None => config.credentials.clone(),
        };
        Credentials::from_value(config.kind, &plain)
    }

    /// Replace a config's credentials, always writing the encrypted shape.
    /// This is also the migrate-on-write path for legacy plaintext rows.
    pub fn save_credentials(
        &self,
        tenant: &TenantId,
        id: &str,
        credentials: &Credentials,
    ) -> Result<()> {
        let sealed = self.seal(credentials)?;
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE channel_configs SET credentials = ?1, updated_at = ?2
             WHERE tenant_id = ?3 AND id = ?4",
            rusqlite::params![sealed.to_string(), now, tenant.as_str(), id],
        )?;
        if n == 0 {
            return Err(ChannelError::ConfigNotFound { id: id.to_string() });
        }
        Ok(())
    }

    fn seal(&self, credentials: &Credentials) -> Result<serde_json::Value> {
        let plain = serde_json::to_vec(&credentials.to_value()?)?;
        let blob = self.vault.encrypt(&plain)?;
        Ok(serde_json::json!({ "encrypted": blob }))
    }
}

fn row_to_config(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChannelConfig> {
    let kind: String = row.get(2)?;
    let credentials: String = row.get(6)?;
    let settings: String = row.get(7)?;
    Ok(ChannelConfig {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        kind: kind.parse().unwrap_or(ChannelKind::EmailSmtp),
        name: row.get(3)?,
        active: row.get::<_, i64>(4)? != 0,
        is_default: row.get::<_, i64>(5)? != 0,
        credentials: serde_json::from_str(&credentials)
            .unwrap_or(serde_json::Value::Null),
        settings: serde_json::from_str(&settings).unwrap_or_default(),
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}
