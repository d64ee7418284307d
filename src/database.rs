use rusqlite::{params, Connection, Result as SqliteResult};
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

use crate::auth::TokenEncryption;

/// Log IO-related DB errors for easier diagnosis (disk full, permission denied).
/// Error propagation is unchanged, caller still returns Err.
fn log_io_error_if_any(context: &str, e: &rusqlite::Error) {
    use rusqlite::ffi::ErrorCode;
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = e {
        match ffi_err.code {
            ErrorCode::DiskFull => {
                error!(
                    "[DB] {}: Disk full. Free space on drive or check data directory.",
                    context
                );
            }
            ErrorCode::ReadOnly | ErrorCode::CannotOpen => {
                error!(
                    "[DB] {}: Permission denied or read-only. Check data directory is writable.",
                    context
                );
            }
            ErrorCode::SystemIoFailure => {
                error!("[DB] {}: I/O error. Check disk and permissions.", context);
            }
            _ => {}
        }
    }
}

use chrono::Utc;
use rusqlite::Error::InvalidParameterName;

/// Локальное хранилище клиента (SQLite)
/// Хранит учётные данные в app_meta; токены шифруются перед записью
pub struct Database {
    pub(crate) conn: Arc<Mutex<Connection>>,
    pub(crate) encryption: Arc<TokenEncryption>,
}

impl Database {
    /// Безопасная блокировка соединения с обработкой poisoned mutex
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, rusqlite::Error> {
        self.conn.lock().map_err(|e| {
            InvalidParameterName(format!(
                "Database mutex poisoned: {}. A panic occurred while holding the lock. \
                 Please restart the application to recover.",
                e
            ))
        })
    }

    pub fn new(db_path: &str) -> SqliteResult<Self> {
        let conn = Connection::open(db_path)?;

        // GUARD: integrity check on startup, detect corruption before init
        let integrity: String = conn
            .query_row("PRAGMA integrity_check", [], |r| r.get(0))
            .map_err(|e| InvalidParameterName(format!("Integrity check failed: {}", e)))?;
        if integrity.to_lowercase() != "ok" {
            return Err(InvalidParameterName(format!(
                "Database corruption detected: {}",
                integrity
            )));
        }

        // WAL mode: не критично, при ошибке остаёмся на журнале по умолчанию
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| {
                warn!(
                    "[DB] Failed to enable WAL mode: {}. Continuing with default journal mode.",
                    e
                );
            })
            .ok();
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");

        let data_dir = std::path::Path::new(db_path).parent();
        let encryption = TokenEncryption::new(data_dir).map_err(InvalidParameterName)?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            encryption: Arc::new(encryption),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Current schema version (PRAGMA user_version). Bump when adding migrations.
    const SCHEMA_VERSION: i32 = 2;

    /// Versioned migrations using SQLite user_version pragma.
    fn run_migrations(&self) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        let current: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

        if current < 1 {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS app_meta (key TEXT PRIMARY KEY, value TEXT)",
                [],
            )?;
        }
        // Migration 2: updated_at
        if current < 2 {
            let _ = conn.execute("ALTER TABLE app_meta ADD COLUMN updated_at INTEGER", []);
        }

        conn.pragma_update(None, "user_version", Self::SCHEMA_VERSION)?;
        Ok(())
    }

    /// Получить значение из app_meta
    pub fn get_app_meta(&self, key: &str) -> SqliteResult<Option<String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT value FROM app_meta WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        if let Some(row) = rows.next()? {
            return Ok(row.get(0)?);
        }
        Ok(None)
    }

    /// Записать значение в app_meta
    pub fn set_app_meta(&self, key: &str, value: &str) -> SqliteResult<()> {
        self.set_app_meta_many(&[(key, value)])
    }

    /// Записать несколько значений одной транзакцией
    pub fn set_app_meta_many(&self, entries: &[(&str, &str)]) -> SqliteResult<()> {
        let mut conn = self.lock_conn()?;
        let now = Utc::now().timestamp();
        let tx = conn.transaction()?;
        for (key, value) in entries {
            tx.execute(
                "INSERT INTO app_meta (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
                params![key, value, now],
            )
            .map_err(|e| {
                log_io_error_if_any("set_app_meta", &e);
                e
            })?;
        }
        tx.commit()
    }

    /// Удалить ключи одной транзакцией (все или ни одного)
    pub fn delete_app_meta(&self, keys: &[&str]) -> SqliteResult<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        for key in keys {
            tx.execute("DELETE FROM app_meta WHERE key = ?1", params![key])
                .map_err(|e| {
                    log_io_error_if_any("delete_app_meta", &e);
                    e
                })?;
        }
        tx.commit()
    }

    /// Прочитать и расшифровать секрет (токен)
    pub fn get_secret(&self, key: &str) -> SqliteResult<Option<String>> {
        match self.get_app_meta(key)? {
            Some(encrypted) => self
                .encryption
                .decrypt(&encrypted)
                .map(Some)
                .map_err(|e| InvalidParameterName(format!("Failed to decrypt {}: {}", key, e))),
            None => Ok(None),
        }
    }

    /// Зашифровать значение для записи через set_app_meta_many
    pub fn seal(&self, value: &str) -> SqliteResult<String> {
        self.encryption
            .encrypt(value)
            .map_err(InvalidParameterName)
    }
}
