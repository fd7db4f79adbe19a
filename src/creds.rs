//! Secure credential store backed by the OS keyring.
//!
//! Keychain on macOS, DPAPI-backed vault on Windows, libsecret on Linux —
//! all behind the `keyring` crate. The unlock credentials are **write-only**
//! at the public surface: they can be stored, probed for existence, and
//! cleared, but never read back except through the credential-provider path,
//! which the loopback server gates.

use tracing::warn;

const SERVICE_NAME: &str = "screencontrol";
const UNLOCK_USER_KEY: &str = "unlock.username";
const UNLOCK_PASS_KEY: &str = "unlock.password";

/// Key-value credential storage. Values are byte strings.
pub struct CredentialStore {
    service: String,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }

    /// Alternate service name, for tests and side-by-side installs.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key_id: &str) -> Result<keyring::Entry, String> {
        keyring::Entry::new(&self.service, key_id).map_err(|e| e.to_string())
    }

    pub fn store(&self, key_id: &str, value: &[u8]) -> Result<(), String> {
        self.entry(key_id)?
            .set_secret(value)
            .map_err(|e| e.to_string())
    }

    pub fn retrieve(&self, key_id: &str) -> Result<Vec<u8>, String> {
        self.entry(key_id)?.get_secret().map_err(|e| e.to_string())
    }

    pub fn delete(&self, key_id: &str) -> Result<(), String> {
        match self.entry(key_id)?.delete_credential() {
            Ok(()) => Ok(()),
            // Deleting something absent is not an error for callers.
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn exists(&self, key_id: &str) -> bool {
        self.entry(key_id)
            .and_then(|e| e.get_secret().map_err(|e| e.to_string()))
            .is_ok()
    }

    /// Store machine-unlock credentials. Returns `true` on success. This is
    /// the only public way in; there is no public way out.
    pub fn store_unlock_credentials(&self, username: &str, password: &str) -> bool {
        let user_ok = self.store(UNLOCK_USER_KEY, username.as_bytes()).is_ok();
        let pass_ok = self.store(UNLOCK_PASS_KEY, password.as_bytes()).is_ok();
        if !(user_ok && pass_ok) {
            warn!("Failed to store unlock credentials in the OS keyring");
            // Don't leave half a credential behind.
            let _ = self.delete(UNLOCK_USER_KEY);
            let _ = self.delete(UNLOCK_PASS_KEY);
            return false;
        }
        true
    }

    pub fn has_unlock_credentials(&self) -> bool {
        self.exists(UNLOCK_USER_KEY) && self.exists(UNLOCK_PASS_KEY)
    }

    /// Clearing is always allowed.
    pub fn clear_unlock_credentials(&self) -> bool {
        let user = self.delete(UNLOCK_USER_KEY);
        let pass = self.delete(UNLOCK_PASS_KEY);
        user.is_ok() && pass.is_ok()
    }

    /// Internal-use retrieval for the machine-unlock path and the Windows
    /// credential provider. Callers are responsible for gating access; the
    /// loopback server only exposes this to localhost.
    #[allow(dead_code)] // exercised on the macOS and Windows unlock paths
    pub(crate) fn unlock_credentials_internal(&self) -> Option<(String, String)> {
        let user = self.retrieve(UNLOCK_USER_KEY).ok()?;
        let pass = self.retrieve(UNLOCK_PASS_KEY).ok()?;
        Some((
            String::from_utf8_lossy(&user).into_owned(),
            String::from_utf8_lossy(&pass).into_owned(),
        ))
    }
}
