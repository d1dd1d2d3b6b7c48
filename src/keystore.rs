//! Credential store (spec.md §4.4): environment, OS keyring, and a
//! password-derived encrypted file, behind one [`ApiKeyManager`] facade.
//!
//! The three strategies are mutually exclusive per instance — an
//! `ApiKeyManager` is constructed for exactly one of them. Format validation
//! (spec.md §4.4 table) is the one place in this crate where bad input is
//! rejected loudly (spec.md §7): it is user input, not an upstream failure.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use aes_gcm::{Aes256Gcm, Key, Nonce, aead::Aead, aead::KeyInit};
use anyhow::{Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::providers::ProviderKind;

const SALT_FILE: &str = "salt";
const KEYS_FILE: &str = "api_keys.enc";
const PBKDF2_ITERATIONS: u32 = 600_000;
const NONCE_LEN: usize = 12;

/// Errors surfaced by the key store. Everything except
/// [`KeyStoreError::InvalidFormat`] is absorbed by callers per spec.md §7 —
/// a decrypt failure becomes a miss, not a propagated error.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("key for provider '{0}' does not pass format validation")]
    InvalidFormat(String),
    #[error("wrong master password or corrupt key store")]
    WrongPasswordOrCorrupt,
    #[error("environment-backed key store is read-only")]
    ReadOnly,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Format validation (spec.md §4.4 table)
// ---------------------------------------------------------------------------

/// Validate `key` against the provider-specific format rule. All keys must
/// additionally be at least 10 characters; unrecognized providers fall back
/// to a length-≥20 rule.
pub fn validate_key_format(provider: &str, key: &str) -> bool {
    if key.len() < 10 {
        return false;
    }
    match provider {
        "openai" => key.starts_with("sk-") || key.starts_with("sess-"),
        "anthropic" => key.starts_with("sk-ant-"),
        "openrouter" => key.starts_with("sk-or-"),
        _ => key.len() >= 20,
    }
}

// ---------------------------------------------------------------------------
// Environment variable table (spec.md §6)
// ---------------------------------------------------------------------------

/// Env-var names consulted for a provider, in priority order. Ollama has no
/// env var (it is typically unauthenticated).
pub fn env_var_names(provider: ProviderKind) -> &'static [&'static str] {
    match provider {
        ProviderKind::Openai => &["OPENAI_API_KEY"],
        ProviderKind::Anthropic => &["ANTHROPIC_API_KEY"],
        ProviderKind::Openrouter => &["OPENROUTER_API_KEY"],
        ProviderKind::Google => &["GOOGLE_API_KEY", "GEMINI_API_KEY"],
        ProviderKind::Zhipu => &["ZHIPUAI_API_KEY", "ZHIPU_API_KEY"],
        ProviderKind::Ollama => &[],
        ProviderKind::Llamacpp => &[],
        ProviderKind::LocalServer => &["LOCAL_LLM_API_KEY"],
        ProviderKind::Vllm => &["VLLM_API_KEY"],
        ProviderKind::Lmstudio => &["LMSTUDIO_API_KEY"],
        ProviderKind::LlamacppServer => &["LLAMACPP_SERVER_API_KEY"],
    }
}

/// Read the first set environment variable for `provider`, if any.
pub fn read_env_key(provider: ProviderKind) -> Option<String> {
    env_var_names(provider)
        .iter()
        .find_map(|name| std::env::var(name).ok())
        .filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// OS keyring strategy (service = "codeconcat", account = "api_key_{provider}")
// ---------------------------------------------------------------------------

const KEYRING_SERVICE: &str = "codeconcat";

fn keyring_account(provider: &str) -> String {
    format!("api_key_{provider}")
}

/// Read `provider`'s key from the OS keyring. A missing keyring backend
/// (platform has none, or the entry doesn't exist) is a miss, not an error.
pub fn keyring_get(provider: &str) -> Option<String> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &keyring_account(provider)).ok()?;
    entry.get_password().ok()
}

/// Store `key` for `provider` in the OS keyring.
pub fn keyring_set(provider: &str, key: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &keyring_account(provider))?;
    entry.set_password(key)?;
    Ok(())
}

/// Delete `provider`'s entry from the OS keyring. Absence is not an error.
pub fn keyring_delete(provider: &str) -> Result<()> {
    match keyring::Entry::new(KEYRING_SERVICE, &keyring_account(provider)) {
        Ok(entry) => {
            let _ = entry.delete_credential();
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Encrypted-file strategy
// ---------------------------------------------------------------------------

/// `{$HOME}/.codeconcat/` by default: `salt` (16 random bytes, created once)
/// and `api_keys.enc` (AEAD ciphertext of the canonical-JSON record map).
/// Both files are mode `0600` on POSIX.
pub struct EncryptedFileStore {
    dir: PathBuf,
    cached: Mutex<Option<CachedDerivation>>,
}

struct CachedDerivation {
    password_fingerprint: [u8; 32],
    key: Zeroizing<[u8; 32]>,
}

fn password_fingerprint(password: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    Sha256::digest(password.as_bytes()).into()
}

impl EncryptedFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cached: Mutex::new(None),
        }
    }

    /// `{$HOME}/.codeconcat/`.
    pub fn default_location() -> Self {
        let dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".codeconcat");
        Self::new(dir)
    }

    fn salt_path(&self) -> PathBuf {
        self.dir.join(SALT_FILE)
    }

    fn keys_path(&self) -> PathBuf {
        self.dir.join(KEYS_FILE)
    }

    fn set_owner_only_permissions(path: &Path) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
        }
        #[cfg(not(unix))]
        {
            let _ = path;
        }
    }

    /// Load the 16-byte salt, generating and persisting it on first use.
    fn load_or_create_salt(&self) -> Result<[u8; 16]> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.salt_path();
        if let Ok(bytes) = std::fs::read(&path)
            && bytes.len() == 16
        {
            let mut salt = [0u8; 16];
            salt.copy_from_slice(&bytes);
            return Ok(salt);
        }

        let mut salt = [0u8; 16];
        getrandom::getrandom(&mut salt)?;
        std::fs::write(&path, salt)?;
        Self::set_owner_only_permissions(&path);
        Ok(salt)
    }

    /// PBKDF2-HMAC-SHA-256 with 600,000 iterations, 32-byte output. Callers
    /// holding a multi-threaded runtime should keep `ApiKeyManager`'s
    /// encrypted-file operations off latency-sensitive paths — this is the
    /// one CPU-bound primitive in the key store (SPEC_FULL.md §5).
    fn derive_key(password: &str, salt: &[u8; 16]) -> Zeroizing<[u8; 32]> {
        let mut key = Zeroizing::new([0u8; 32]);
        pbkdf2::pbkdf2_hmac::<sha2::Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut *key);
        key
    }

    /// Derive (or reuse a cached) key for `password`.
    fn key_for(&self, password: &str) -> Result<Zeroizing<[u8; 32]>> {
        let fingerprint = password_fingerprint(password);
        {
            let guard = self.cached.lock().unwrap();
            if let Some(cached) = guard.as_ref()
                && cached.password_fingerprint == fingerprint
            {
                return Ok(cached.key.clone());
            }
        }

        let salt = self.load_or_create_salt()?;
        let key = Self::derive_key(password, &salt);

        let mut guard = self.cached.lock().unwrap();
        *guard = Some(CachedDerivation {
            password_fingerprint: fingerprint,
            key: key.clone(),
        });
        Ok(key)
    }

    fn encrypt(&self, password: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = self.key_for(password)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*key));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        getrandom::getrandom(&mut nonce_bytes)?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| anyhow::anyhow!("encryption failed: {e}"))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(combined)
    }

    fn decrypt(&self, password: &str, combined: &[u8]) -> Result<Vec<u8>> {
        if combined.len() < NONCE_LEN {
            bail!("ciphertext too short");
        }
        let key = self.key_for(password)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*key));

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| anyhow::anyhow!("decryption failed"))
    }

    /// Load the `{provider → key}` map. An absent file is an empty store;
    /// a wrong password or corrupt file is [`KeyStoreError::WrongPasswordOrCorrupt`].
    fn load_records(&self, password: &str) -> Result<HashMap<String, String>> {
        let path = self.keys_path();
        let encoded = match std::fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };

        let combined = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|_| KeyStoreError::WrongPasswordOrCorrupt)?;
        let plaintext = self
            .decrypt(password, &combined)
            .map_err(|_| KeyStoreError::WrongPasswordOrCorrupt)?;

        serde_json::from_slice(&plaintext).map_err(|_| KeyStoreError::WrongPasswordOrCorrupt.into())
    }

    /// Serialize, encrypt, and atomically replace the key file.
    fn save_records(&self, password: &str, records: &HashMap<String, String>) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let canonical: std::collections::BTreeMap<_, _> = records.iter().collect();
        let plaintext = serde_json::to_vec(&canonical)?;
        let combined = self.encrypt(password, &plaintext)?;
        let encoded = URL_SAFE_NO_PAD.encode(combined);

        let path = self.keys_path();
        let tmp_path = self.dir.join(format!("{KEYS_FILE}.tmp"));
        std::fs::write(&tmp_path, encoded.as_bytes())?;
        Self::set_owner_only_permissions(&tmp_path);
        std::fs::rename(&tmp_path, &path)?;
        Self::set_owner_only_permissions(&path);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unified facade
// ---------------------------------------------------------------------------

/// Which of the three mutually-exclusive storage strategies an
/// [`ApiKeyManager`] was constructed with.
pub enum KeyStoreBackend {
    Environment,
    Keyring,
    EncryptedFile(std::sync::Arc<EncryptedFileStore>),
}

/// The key manager (spec.md §4.4). CRUD operations are async because the
/// encrypted-file backend's PBKDF2 derivation and the OS keyring's blocking
/// calls are both dispatched to `spawn_blocking`.
pub struct ApiKeyManager {
    backend: KeyStoreBackend,
}

impl ApiKeyManager {
    pub fn environment() -> Self {
        Self {
            backend: KeyStoreBackend::Environment,
        }
    }

    pub fn keyring() -> Self {
        Self {
            backend: KeyStoreBackend::Keyring,
        }
    }

    pub fn encrypted_file(store: EncryptedFileStore) -> Self {
        Self {
            backend: KeyStoreBackend::EncryptedFile(std::sync::Arc::new(store)),
        }
    }

    /// Fetch `provider`'s key. `password` is only consulted by the
    /// encrypted-file backend; a wrong password surfaces as `None`, per
    /// spec.md §7 ("Key decryption failure ... surfaces as a missing key").
    pub async fn get_key(&self, provider: ProviderKind, password: Option<&str>) -> Option<String> {
        match &self.backend {
            KeyStoreBackend::Environment => read_env_key(provider),
            KeyStoreBackend::Keyring => {
                let tag = provider.as_str().to_string();
                tokio::task::spawn_blocking(move || keyring_get(&tag))
                    .await
                    .ok()
                    .flatten()
            }
            KeyStoreBackend::EncryptedFile(_) => {
                let password = password?.to_string();
                self.with_records(|records| records.get(provider.as_str()).cloned(), &password)
                    .await
                    .ok()
                    .flatten()
            }
        }
    }

    /// Store `key` for `provider`. Validates format unless `skip_validation`
    /// is set; validation failure is the one place this API refuses loudly
    /// (spec.md §7).
    pub async fn set_key(
        &self,
        provider: ProviderKind,
        key: &str,
        password: Option<&str>,
        skip_validation: bool,
    ) -> Result<()> {
        if !skip_validation && !validate_key_format(provider.as_str(), key) {
            return Err(KeyStoreError::InvalidFormat(provider.as_str().to_string()).into());
        }

        match &self.backend {
            KeyStoreBackend::Environment => Err(KeyStoreError::ReadOnly.into()),
            KeyStoreBackend::Keyring => {
                let tag = provider.as_str().to_string();
                let key = key.to_string();
                tokio::task::spawn_blocking(move || keyring_set(&tag, &key)).await?
            }
            KeyStoreBackend::EncryptedFile(store) => {
                let password = password
                    .ok_or_else(|| anyhow::anyhow!("password required"))?
                    .to_string();
                let store = store.clone();
                let provider_key = provider.as_str().to_string();
                let key = key.to_string();
                tokio::task::spawn_blocking(move || {
                    let mut records = store.load_records(&password).unwrap_or_default();
                    records.insert(provider_key, key);
                    store.save_records(&password, &records)
                })
                .await?
            }
        }
    }

    pub async fn delete_key(&self, provider: ProviderKind, password: Option<&str>) -> Result<()> {
        match &self.backend {
            KeyStoreBackend::Environment => Err(KeyStoreError::ReadOnly.into()),
            KeyStoreBackend::Keyring => {
                let tag = provider.as_str().to_string();
                tokio::task::spawn_blocking(move || keyring_delete(&tag)).await?
            }
            KeyStoreBackend::EncryptedFile(store) => {
                let password = password
                    .ok_or_else(|| anyhow::anyhow!("password required"))?
                    .to_string();
                let store = store.clone();
                let provider_key = provider.as_str().to_string();
                tokio::task::spawn_blocking(move || {
                    let mut records = store.load_records(&password)?;
                    records.remove(&provider_key);
                    store.save_records(&password, &records)
                })
                .await?
            }
        }
    }

    /// Provider names with a stored key. For the encrypted-file backend, a
    /// wrong password yields an empty list rather than an error.
    pub async fn list_stored_providers(&self, password: Option<&str>) -> Vec<String> {
        match &self.backend {
            KeyStoreBackend::Environment => ProviderKind::ALL
                .iter()
                .filter(|p| read_env_key(**p).is_some())
                .map(|p| p.as_str().to_string())
                .collect(),
            KeyStoreBackend::Keyring => ProviderKind::ALL
                .iter()
                .filter(|p| keyring_get(p.as_str()).is_some())
                .map(|p| p.as_str().to_string())
                .collect(),
            KeyStoreBackend::EncryptedFile(_) => {
                let Some(password) = password else {
                    return Vec::new();
                };
                let password = password.to_string();
                self.with_records(|records| records.keys().cloned().collect(), &password)
                    .await
                    .unwrap_or_default()
            }
        }
    }

    /// Re-encrypt every record under `new_password`. Loads everything under
    /// `old_password` first; if that fails (wrong password), nothing is
    /// touched. The on-disk file is only replaced once the new ciphertext
    /// has been fully serialized (spec.md §4.4).
    pub async fn change_master_password(&self, old_password: &str, new_password: &str) -> Result<()> {
        let KeyStoreBackend::EncryptedFile(store) = &self.backend else {
            bail!("change_master_password only applies to the encrypted-file backend");
        };
        let store = store.clone();
        let old_password = old_password.to_string();
        let new_password = new_password.to_string();
        tokio::task::spawn_blocking(move || {
            let records = store.load_records(&old_password)?;
            store.save_records(&new_password, &records)
        })
        .await?
    }

    async fn with_records<T: Send + 'static>(
        &self,
        f: impl FnOnce(&HashMap<String, String>) -> T + Send + 'static,
        password: &str,
    ) -> Result<T> {
        let KeyStoreBackend::EncryptedFile(store) = &self.backend else {
            bail!("with_records only applies to the encrypted-file backend");
        };
        let store = store.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || match store.load_records(&password) {
            Ok(records) => Ok(f(&records)),
            Err(e) => Err(e),
        })
        .await?
    }
}

/// Build a minimal provider config for `kind` and run its
/// `validate_connection` as a liveness test (spec.md §4.4 "Liveness test").
pub async fn test_api_key(kind: ProviderKind, key: &str) -> bool {
    let mut cfg = crate::providers::ProviderConfig::new(kind);
    cfg.api_key = Some(key.to_string());
    match crate::providers::factory::ProviderFactory::build(&cfg) {
        Ok(provider) => provider.validate_connection_dyn().await,
        Err(_) => false,
    }
}

/// Record type as persisted on disk (documented for readers; not directly
/// (de)serialized — `load_records`/`save_records` use a plain
/// `HashMap<String, String>` keyed by provider tag).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    pub provider: String,
    pub key: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn validate_openai_key_formats() {
        assert!(validate_key_format("openai", "sk-abcdefghij"));
        assert!(validate_key_format("openai", "sess-abcdefghij"));
        assert!(!validate_key_format("openai", "sk-short"));
        assert!(!validate_key_format("openai", "wrong-prefix-1234567890"));
    }

    #[test]
    fn validate_anthropic_and_openrouter() {
        assert!(validate_key_format("anthropic", "sk-ant-abcdefghij"));
        assert!(!validate_key_format("anthropic", "sk-abcdefghij"));
        assert!(validate_key_format("openrouter", "sk-or-abcdefghij"));
        assert!(!validate_key_format("openrouter", "sk-abcdefghij"));
    }

    #[test]
    fn validate_unknown_provider_uses_length_rule() {
        assert!(validate_key_format("zhipu", "01234567890123456789"));
        assert!(!validate_key_format("zhipu", "short-key"));
    }

    #[test]
    fn all_keys_need_at_least_ten_chars() {
        assert!(!validate_key_format("anthropic", "sk-ant-x"));
    }

    #[tokio::test]
    #[serial]
    async fn env_backend_reads_configured_var() {
        unsafe {
            std::env::set_var("OPENAI_API_KEY", "sk-from-env-1234567890");
        }
        let mgr = ApiKeyManager::environment();
        let key = mgr.get_key(ProviderKind::Openai, None).await;
        assert_eq!(key.as_deref(), Some("sk-from-env-1234567890"));
        unsafe {
            std::env::remove_var("OPENAI_API_KEY");
        }
    }

    #[tokio::test]
    #[serial]
    async fn env_backend_is_read_only() {
        let mgr = ApiKeyManager::environment();
        let result = mgr.set_key(ProviderKind::Openai, "sk-abcdefghij", None, true).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn encrypted_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path());
        let mgr = ApiKeyManager::encrypted_file(store);

        mgr.set_key(ProviderKind::Openai, "sk-abcdefghij1234", Some("hunter2"), false)
            .await
            .unwrap();

        let got = mgr.get_key(ProviderKind::Openai, Some("hunter2")).await;
        assert_eq!(got.as_deref(), Some("sk-abcdefghij1234"));

        let wrong = mgr.get_key(ProviderKind::Openai, Some("wrong-password")).await;
        assert!(wrong.is_none());
    }

    #[tokio::test]
    async fn encrypted_file_rejects_invalid_key_format() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path());
        let mgr = ApiKeyManager::encrypted_file(store);

        let result = mgr
            .set_key(ProviderKind::Anthropic, "not-a-valid-key", Some("pw"), false)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn change_master_password_rewrites_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path());
        let mgr = ApiKeyManager::encrypted_file(store);

        mgr.set_key(ProviderKind::Openai, "sk-abcdefghij1234", Some("old-pw"), false)
            .await
            .unwrap();
        mgr.change_master_password("old-pw", "new-pw").await.unwrap();

        assert!(mgr.get_key(ProviderKind::Openai, Some("old-pw")).await.is_none());
        assert_eq!(
            mgr.get_key(ProviderKind::Openai, Some("new-pw")).await.as_deref(),
            Some("sk-abcdefghij1234")
        );
    }

    #[tokio::test]
    async fn list_stored_providers_reflects_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path());
        let mgr = ApiKeyManager::encrypted_file(store);

        mgr.set_key(ProviderKind::Openai, "sk-abcdefghij1234", Some("pw"), false)
            .await
            .unwrap();
        mgr.set_key(ProviderKind::Anthropic, "sk-ant-abcdefghij", Some("pw"), false)
            .await
            .unwrap();

        let mut providers = mgr.list_stored_providers(Some("pw")).await;
        providers.sort();
        assert_eq!(providers, vec!["anthropic".to_string(), "openai".to_string()]);
    }

    #[tokio::test]
    async fn salt_file_is_persisted_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path());
        let salt1 = store.load_or_create_salt().unwrap();
        let salt2 = store.load_or_create_salt().unwrap();
        assert_eq!(salt1, salt2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn encrypted_store_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path());
        let mgr = ApiKeyManager::encrypted_file(store);
        mgr.set_key(ProviderKind::Openai, "sk-abcdefghij1234", Some("pw"), false)
            .await
            .unwrap();

        let keys_meta = std::fs::metadata(dir.path().join(KEYS_FILE)).unwrap();
        assert_eq!(keys_meta.permissions().mode() & 0o777, 0o600);
        let salt_meta = std::fs::metadata(dir.path().join(SALT_FILE)).unwrap();
        assert_eq!(salt_meta.permissions().mode() & 0o777, 0o600);
    }
}
