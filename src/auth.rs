use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::error::ApiError;
use crate::models::{CredentialPair, RefreshRequest};

/// Ключи учётных данных в app_meta. Всегда удаляются вместе.
pub mod keys {
    pub const ACCESS_TOKEN: &str = "accessToken";
    pub const REFRESH_TOKEN: &str = "refreshToken";
    pub const EXPIRES_IN: &str = "expiresIn";
    pub const USERNAME: &str = "username";
    pub const NICKNAME: &str = "nickname";

    pub const ALL: [&str; 5] = [ACCESS_TOKEN, REFRESH_TOKEN, EXPIRES_IN, USERNAME, NICKNAME];
}

/// Менеджер аутентификации: хранение пары токенов и обмен refresh token.
/// refresh идёт через отдельный "голый" HTTP клиент, без перехватчика 401.
pub struct AuthManager {
    api_base_url: String,
    app_version: String,
    pub(crate) db: Arc<Database>,
    client: reqwest::Client,
}

impl AuthManager {
    pub fn new(
        api_base_url: String,
        app_version: String,
        timeout: Duration,
        db: Arc<Database>,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            api_base_url,
            app_version,
            db,
            client,
        })
    }

    /// Сохранить пару токенов (после login или refresh)
    pub fn save_credentials(&self, pair: &CredentialPair) -> Result<(), ApiError> {
        let access = self.db.seal(&pair.access_token)?;
        let refresh = self.db.seal(&pair.refresh_token)?;
        let expires_in = pair.expires_in.to_string();
        self.db.set_app_meta_many(&[
            (keys::ACCESS_TOKEN, access.as_str()),
            (keys::REFRESH_TOKEN, refresh.as_str()),
            (keys::EXPIRES_IN, expires_in.as_str()),
            (keys::USERNAME, pair.username.as_str()),
            (keys::NICKNAME, pair.nickname.as_str()),
        ])?;
        debug!(
            "[AUTH] Credentials saved for '{}', access token length: {}",
            pair.username,
            pair.access_token.len()
        );
        Ok(())
    }

    /// Загрузить сохранённую пару (None, если хотя бы одного токена нет)
    pub fn load_credentials(&self) -> Result<Option<CredentialPair>, ApiError> {
        let access_token = match self.db.get_secret(keys::ACCESS_TOKEN)? {
            Some(t) => t,
            None => return Ok(None),
        };
        let refresh_token = match self.db.get_secret(keys::REFRESH_TOKEN)? {
            Some(t) => t,
            None => return Ok(None),
        };
        let expires_in = self
            .db
            .get_app_meta(keys::EXPIRES_IN)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(Some(CredentialPair {
            access_token,
            refresh_token,
            expires_in,
            username: self.db.get_app_meta(keys::USERNAME)?.unwrap_or_default(),
            nickname: self.db.get_app_meta(keys::NICKNAME)?.unwrap_or_default(),
        }))
    }

    pub fn stored_access_token(&self) -> Result<Option<String>, ApiError> {
        Ok(self.db.get_secret(keys::ACCESS_TOKEN)?)
    }

    pub fn stored_refresh_token(&self) -> Result<Option<String>, ApiError> {
        Ok(self.db.get_secret(keys::REFRESH_TOKEN)?)
    }

    /// Удалить все пять ключей
    pub fn clear_credentials(&self) -> Result<(), ApiError> {
        self.db.delete_app_meta(&keys::ALL)?;
        info!("[AUTH] Stored credentials cleared");
        Ok(())
    }

    /// Обменять refresh token на новую пару (POST /auth/refresh)
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<CredentialPair, ApiError> {
        let url = format!("{}/auth/refresh", self.api_base_url);
        let response = self
            .client
            .post(&url)
            .header("X-App-Version", &self.app_version)
            .json(&RefreshRequest {
                refresh_token: refresh_token.to_string(),
            })
            .send()
            .await
            .map_err(|e| ApiError::Transport(format!("Network error during token refresh: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("[AUTH] Token refresh failed with status: {}", status);
            return Err(ApiError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        let pair: CredentialPair = serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::Decode(format!("Failed to parse refresh response: {}", e)))?;
        Ok(pair)
    }
}

// ============================================
// TOKEN ENCRYPTION
// ============================================

const KEY_FILE_NAME: &str = "credential.key";

/// Шифрование токенов перед сохранением в SQLite (AES-256-GCM)
pub struct TokenEncryption {
    cipher: Aes256Gcm,
}

impl TokenEncryption {
    /// Ключ берётся из AVIARY_ENCRYPTION_KEY (hex, 32 байта), иначе из файла
    /// credential.key в каталоге данных (создаётся при первом запуске).
    /// Без каталога (in-memory БД) используется одноразовый случайный ключ.
    pub fn new(data_dir: Option<&Path>) -> Result<Self, String> {
        let key = match std::env::var("AVIARY_ENCRYPTION_KEY") {
            Ok(hex_key) => hex::decode(hex_key.trim())
                .map_err(|e| format!("AVIARY_ENCRYPTION_KEY is not valid hex: {}", e))?,
            Err(_) => match data_dir.filter(|d| !d.as_os_str().is_empty()) {
                Some(dir) => Self::load_or_create_key_file(dir)?,
                None => rand::random::<[u8; 32]>().to_vec(),
            },
        };

        Self::from_key(&key)
    }

    pub fn from_key(key: &[u8]) -> Result<Self, String> {
        if key.len() != 32 {
            return Err("Encryption key must be 32 bytes".to_string());
        }

        let key_array: [u8; 32] = key
            .try_into()
            .map_err(|_| "Failed to convert key to array".to_string())?;

        let cipher = Aes256Gcm::new(&key_array.into());

        Ok(Self { cipher })
    }

    fn load_or_create_key_file(dir: &Path) -> Result<Vec<u8>, String> {
        let path = dir.join(KEY_FILE_NAME);
        if path.exists() {
            let hex_key = std::fs::read_to_string(&path)
                .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
            return hex::decode(hex_key.trim())
                .map_err(|e| format!("Corrupted key file {}: {}", path.display(), e));
        }
        let key = rand::random::<[u8; 32]>();
        Self::write_key_file(&path, &hex::encode(key))
            .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
        info!("[AUTH] Generated new credential key at {}", path.display());
        Ok(key.to_vec())
    }

    /// Ключ доступен только владельцу (0600 на unix)
    fn write_key_file(path: &Path, contents: &str) -> std::io::Result<()> {
        use std::io::Write;
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()
    }

    /// Зашифровать токен
    pub fn encrypt(&self, token: &str) -> Result<String, String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, token.as_bytes())
            .map_err(|e| format!("Encryption failed: {}", e))?;

        // nonce + ciphertext
        let mut result = nonce.to_vec();
        result.extend_from_slice(&ciphertext);

        use base64::{engine::general_purpose, Engine as _};
        Ok(general_purpose::STANDARD.encode(&result))
    }

    /// Расшифровать токен
    pub fn decrypt(&self, encrypted: &str) -> Result<String, String> {
        use base64::{engine::general_purpose, Engine as _};
        let data = general_purpose::STANDARD
            .decode(encrypted)
            .map_err(|e| format!("Base64 decode failed: {}", e))?;

        if data.len() < 12 {
            return Err("Invalid encrypted data length".to_string());
        }

        // Первые 12 байт: nonce
        let nonce = Nonce::from_slice(&data[..12]);
        let ciphertext = &data[12..];

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| format!("Decryption failed: {}", e))?;

        String::from_utf8(plaintext).map_err(|e| format!("UTF-8 decode failed: {}", e))
    }
}
