//! Encrypted cache of exported browser cookies.
//!
//! Cookies are exported once per browser through the extractor, sealed with
//! AES-256-GCM and kept in `~/.bingo-downloader/cookies/<browser>.cookies`
//! until they expire. A plaintext Netscape file is only written for the
//! lifetime of a download ([`CookieFile`]).
//!
//! Token layout: `base64url(0x80 | nonce[12] | ciphertext+tag)`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::errors::DownloadError;
use super::traits::MediaExtractor;

pub const SUPPORTED_BROWSERS: &[&str] = &[
    "chrome", "firefox", "edge", "safari", "brave", "opera", "chromium", "vivaldi",
];

pub const DEFAULT_EXPIRATION_HOURS: u64 = 24;

const TOKEN_VERSION: u8 = 0x80;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("Unsupported browser: {0}")]
    UnsupportedBrowser(String),

    #[error("No cached cookies for {0}")]
    NotCached(String),

    #[error("Failed to decrypt cookies: {0}. Please re-authorize cookies for this browser.")]
    Decryption(String),

    #[error("Failed to encrypt cookies: {0}")]
    Encryption(String),

    #[error("Cookie export failed: {0}")]
    Export(#[from] DownloadError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub dir: PathBuf,
    pub key_file: PathBuf,
    /// `COOKIE_ENCRYPTION_KEY`
    pub env_key: Option<String>,
    pub expiration_hours: u64,
    /// When false the cache holds plaintext
    pub encryption_enabled: bool,
}

impl CookieSettings {
    /// Settings rooted at `~/.bingo-downloader`
    pub fn new(env_key: Option<String>, expiration_hours: u64, encryption_enabled: bool) -> Self {
        let root = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".bingo-downloader");
        Self::rooted(&root, env_key, expiration_hours, encryption_enabled)
    }

    pub fn rooted(
        root: &Path,
        env_key: Option<String>,
        expiration_hours: u64,
        encryption_enabled: bool,
    ) -> Self {
        Self {
            dir: root.join("cookies"),
            key_file: root.join(".encryption_key"),
            env_key: env_key.filter(|k| !k.is_empty()),
            expiration_hours,
            encryption_enabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    Environment,
    KeyFile,
    Generated,
    Disabled,
}

#[derive(Debug, Clone, Serialize)]
pub struct EncryptionStatus {
    pub encryption_enabled: bool,
    pub key_from_env: bool,
    pub key_file_exists: bool,
    pub cookie_expiration_hours: u64,
    pub key_source: KeySource,
    pub warning: String,
}

/// Plaintext cookie file handed to yt-dlp; removed on drop
#[derive(Debug)]
pub struct CookieFile {
    path: PathBuf,
}

impl CookieFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CookieFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "Cookie file already gone");
        }
    }
}

pub struct CookieVault {
    settings: CookieSettings,
    cipher: Option<Aes256Gcm>,
    key_source: KeySource,
}

/// Stretch or hash a configured key to 32 bytes
fn key_from_env(raw: &str) -> [u8; KEY_LEN] {
    let bytes = raw.as_bytes();
    let mut key = [0u8; KEY_LEN];
    if bytes.len() > KEY_LEN {
        key.copy_from_slice(&Sha256::digest(bytes));
    } else {
        key[..bytes.len()].copy_from_slice(bytes);
    }
    key
}

fn read_key_file(path: &Path) -> Option<Vec<u8>> {
    let text = std::fs::read_to_string(path).ok()?;
    let key = URL_SAFE.decode(text.trim()).ok()?;
    (key.len() == KEY_LEN).then_some(key)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    restrict_permissions(path)
}

impl CookieVault {
    /// Resolve the key (environment, key file, or a freshly generated one).
    pub fn open(settings: CookieSettings) -> Result<Self, CookieError> {
        if !settings.encryption_enabled {
            warn!("Cookie encryption disabled, cached cookies are stored in plaintext");
            return Ok(Self {
                settings,
                cipher: None,
                key_source: KeySource::Disabled,
            });
        }

        let (cipher, key_source) = if let Some(raw) = &settings.env_key {
            let key = key_from_env(raw);
            (Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)), KeySource::Environment)
        } else if let Some(key) = read_key_file(&settings.key_file) {
            (Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)), KeySource::KeyFile)
        } else {
            let key = Aes256Gcm::generate_key(OsRng);
            write_private(&settings.key_file, URL_SAFE.encode(key).as_bytes())?;
            info!(path = %settings.key_file.display(), "Generated new cookie encryption key");
            (Aes256Gcm::new(&key), KeySource::Generated)
        };

        Ok(Self {
            settings,
            cipher: Some(cipher),
            key_source,
        })
    }

    pub fn key_source(&self) -> KeySource {
        self.key_source
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CookieError> {
        let cipher = match &self.cipher {
            Some(c) => c,
            None => return Ok(plaintext.to_string()),
        };

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CookieError::Encryption(e.to_string()))?;

        let mut token = Vec::with_capacity(1 + NONCE_LEN + sealed.len());
        token.push(TOKEN_VERSION);
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&sealed);
        Ok(URL_SAFE.encode(token))
    }

    pub fn decrypt(&self, token: &str) -> Result<String, CookieError> {
        let cipher = match &self.cipher {
            Some(c) => c,
            None => return Ok(token.to_string()),
        };

        let raw = URL_SAFE
            .decode(token.trim())
            .map_err(|e| CookieError::Decryption(format!("malformed token ({})", e)))?;
        if raw.len() < 1 + NONCE_LEN + TAG_LEN || raw[0] != TOKEN_VERSION {
            return Err(CookieError::Decryption("malformed token".to_string()));
        }

        let nonce = Nonce::from_slice(&raw[1..1 + NONCE_LEN]);
        let plain = cipher
            .decrypt(nonce, &raw[1 + NONCE_LEN..])
            .map_err(|_| CookieError::Decryption("wrong key or corrupted data".to_string()))?;
        String::from_utf8(plain).map_err(|e| CookieError::Decryption(e.to_string()))
    }

    fn check_browser(browser: &str) -> Result<String, CookieError> {
        let name = browser.trim().to_lowercase();
        if SUPPORTED_BROWSERS.contains(&name.as_str()) {
            Ok(name)
        } else {
            Err(CookieError::UnsupportedBrowser(browser.to_string()))
        }
    }

    pub fn cache_path(&self, browser: &str) -> PathBuf {
        self.settings.dir.join(format!("{}.cookies", browser))
    }

    /// Cache file exists, is younger than the expiration window and was
    /// written in the vault's current mode (sealed or plaintext)
    pub fn are_cookies_cached(&self, browser: &str) -> bool {
        let name = match Self::check_browser(browser) {
            Ok(n) => n,
            Err(_) => return false,
        };
        let cache = self.cache_path(&name);
        let max_age = Duration::from_secs(self.settings.expiration_hours * 3600);
        let fresh = std::fs::metadata(&cache)
            .and_then(|m| m.modified())
            .map(|mtime| {
                SystemTime::now()
                    .duration_since(mtime)
                    .map_or(true, |age| age < max_age)
            })
            .unwrap_or(false);
        if !fresh {
            return false;
        }

        let sealed = is_encrypted_file(&cache);
        if sealed != self.cipher.is_some() {
            debug!(browser = %name, sealed, "Cached cookies do not match the encryption mode");
            return false;
        }
        true
    }

    /// Export and cache cookies unless a fresh cache exists.
    pub fn ensure_cookies(
        &self,
        browser: &str,
        extractor: &dyn MediaExtractor,
    ) -> Result<PathBuf, CookieError> {
        let name = Self::check_browser(browser)?;
        let cache = self.cache_path(&name);
        if self.are_cookies_cached(&name) {
            debug!(browser = %name, "Using cached cookies");
            return Ok(cache);
        }

        std::fs::create_dir_all(&self.settings.dir)?;
        let export = self.settings.dir.join(format!("{}.export.txt", name));
        info!(browser = %name, "Exporting browser cookies");
        let exported = extractor
            .export_cookies(&name, &export)
            .map_err(CookieError::from)
            .and_then(|_| Ok(std::fs::read_to_string(&export)?));
        if let Err(e) = std::fs::remove_file(&export) {
            debug!(error = %e, "No export file to remove");
        }

        let sealed = self.encrypt(&exported?)?;
        write_private(&cache, sealed.as_bytes())?;
        info!(browser = %name, path = %cache.display(), "Cookies cached");
        Ok(cache)
    }

    /// Decrypt the cached cookies into a temporary Netscape file.
    pub fn materialize(&self, browser: &str) -> Result<CookieFile, CookieError> {
        let name = Self::check_browser(browser)?;
        let cache = self.cache_path(&name);
        if !self.are_cookies_cached(&name) {
            return Err(CookieError::NotCached(name));
        }

        let plain = self.decrypt(&std::fs::read_to_string(&cache)?)?;
        let path = self
            .settings
            .dir
            .join(format!("{}-{}.txt", name, uuid::Uuid::new_v4().simple()));
        write_private(&path, plain.as_bytes())?;
        Ok(CookieFile { path })
    }

    /// Cache freshness for every supported browser
    pub fn status(&self) -> BTreeMap<String, bool> {
        SUPPORTED_BROWSERS
            .iter()
            .map(|b| (b.to_string(), self.are_cookies_cached(b)))
            .collect()
    }

    pub fn encryption_status(&self) -> EncryptionStatus {
        let enabled = self.cipher.is_some();
        let warning = if enabled {
            format!(
                "Encrypted cookies are stored locally and expire after {} hours. \
                 The encryption key is stored in {}.",
                self.settings.expiration_hours,
                self.settings.key_file.display()
            )
        } else {
            "Cookie encryption is disabled; cached cookies are stored in plaintext.".to_string()
        };

        EncryptionStatus {
            encryption_enabled: enabled,
            key_from_env: self.key_source == KeySource::Environment,
            key_file_exists: self.settings.key_file.exists(),
            cookie_expiration_hours: self.settings.expiration_hours,
            key_source: self.key_source,
            warning,
        }
    }
}

/// Whether the file's first line looks like a sealed cookie token
pub fn is_encrypted_file(path: &Path) -> bool {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(_) => return false,
    };
    let first = text.lines().next().unwrap_or("").trim();
    match URL_SAFE.decode(first) {
        Ok(raw) => raw.len() >= 1 + NONCE_LEN + TAG_LEN && raw[0] == TOKEN_VERSION,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::{DownloadOptions, FetchOutcome, MediaInfo, PlaylistInfo};
    use crate::downloader::traits::{FetchRequest, ProgressSink};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    const JAR: &str = "# Netscape HTTP Cookie File\n.youtube.com\tTRUE\t/\tTRUE\t0\tSID\tabc\n";

    struct JarExtractor {
        exports: AtomicUsize,
    }

    impl MediaExtractor for JarExtractor {
        fn name(&self) -> &'static str {
            "jar"
        }
        fn is_available(&self) -> bool {
            true
        }
        fn extract_info(&self, _: &str, _: &DownloadOptions) -> Result<MediaInfo, DownloadError> {
            Err(DownloadError::Unknown("unused".into()))
        }
        fn playlist_info(&self, _: &str, _: &DownloadOptions) -> Result<Option<PlaylistInfo>, DownloadError> {
            Ok(None)
        }
        fn download(
            &self,
            _: &FetchRequest,
            _: &dyn ProgressSink,
            _: &CancellationToken,
        ) -> Result<FetchOutcome, DownloadError> {
            Err(DownloadError::Unknown("unused".into()))
        }
        fn export_cookies(&self, _browser: &str, dest: &Path) -> Result<(), DownloadError> {
            self.exports.fetch_add(1, Ordering::SeqCst);
            std::fs::write(dest, JAR)?;
            Ok(())
        }
    }

    fn vault(root: &Path, env_key: Option<&str>) -> CookieVault {
        CookieVault::open(CookieSettings::rooted(root, env_key.map(str::to_string), 24, true)).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let dir = tempdir().unwrap();
        let v = vault(dir.path(), None);
        assert_eq!(v.key_source(), KeySource::Generated);

        let token = v.encrypt(JAR).unwrap();
        assert_ne!(token, JAR);
        assert_eq!(v.decrypt(&token).unwrap(), JAR);

        // Same key file on reopen
        let again = vault(dir.path(), None);
        assert_eq!(again.key_source(), KeySource::KeyFile);
        assert_eq!(again.decrypt(&token).unwrap(), JAR);
    }

    #[test]
    fn test_wrong_key_fails() {
        let dir = tempdir().unwrap();
        let a = vault(dir.path(), Some("first-key"));
        let b = vault(dir.path(), Some("second-key"));
        assert_eq!(a.key_source(), KeySource::Environment);

        let token = a.encrypt("secret").unwrap();
        let err = b.decrypt(&token).unwrap_err();
        assert!(matches!(err, CookieError::Decryption(_)));
        assert!(err.to_string().contains("re-authorize"));
        assert!(b.decrypt("not a token").is_err());
    }

    #[test]
    fn test_long_env_key_is_hashed() {
        let long = "k".repeat(80);
        assert_eq!(key_from_env(&long).to_vec(), Sha256::digest(long.as_bytes()).to_vec());
        let short = key_from_env("abc");
        assert_eq!(&short[..3], b"abc");
        assert!(short[3..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_invalid_key_file_regenerates() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".encryption_key"), "garbage").unwrap();
        let v = vault(dir.path(), None);
        assert_eq!(v.key_source(), KeySource::Generated);
        assert!(read_key_file(&dir.path().join(".encryption_key")).is_some());
    }

    #[test]
    fn test_ensure_and_materialize() {
        let dir = tempdir().unwrap();
        let v = vault(dir.path(), None);
        let extractor = JarExtractor {
            exports: AtomicUsize::new(0),
        };

        assert!(!v.are_cookies_cached("chrome"));
        let cache = v.ensure_cookies("Chrome", &extractor).unwrap();
        assert!(v.are_cookies_cached("chrome"));
        assert!(is_encrypted_file(&cache));

        // Fresh cache is reused
        v.ensure_cookies("chrome", &extractor).unwrap();
        assert_eq!(extractor.exports.load(Ordering::SeqCst), 1);

        let path = {
            let file = v.materialize("chrome").unwrap();
            assert_eq!(std::fs::read_to_string(file.path()).unwrap(), JAR);
            assert!(!is_encrypted_file(file.path()));
            file.path().to_path_buf()
        };
        assert!(!path.exists());

        let status = v.status();
        assert_eq!(status.get("chrome"), Some(&true));
        assert_eq!(status.get("firefox"), Some(&false));
    }

    #[test]
    fn test_unsupported_browser() {
        let dir = tempdir().unwrap();
        let v = vault(dir.path(), None);
        let extractor = JarExtractor {
            exports: AtomicUsize::new(0),
        };
        assert!(matches!(
            v.ensure_cookies("netscape", &extractor),
            Err(CookieError::UnsupportedBrowser(_))
        ));
        assert!(matches!(v.materialize("firefox"), Err(CookieError::NotCached(_))));
    }

    #[test]
    fn test_plaintext_cache_is_reexported_once_encryption_is_on() {
        let dir = tempdir().unwrap();
        let extractor = JarExtractor {
            exports: AtomicUsize::new(0),
        };

        let plain = CookieVault::open(CookieSettings::rooted(dir.path(), None, 24, false)).unwrap();
        let cache = plain.ensure_cookies("firefox", &extractor).unwrap();
        assert!(plain.are_cookies_cached("firefox"));
        assert!(!is_encrypted_file(&cache));

        let sealed = vault(dir.path(), None);
        assert!(!sealed.are_cookies_cached("firefox"));
        assert!(matches!(sealed.materialize("firefox"), Err(CookieError::NotCached(_))));

        sealed.ensure_cookies("firefox", &extractor).unwrap();
        assert_eq!(extractor.exports.load(Ordering::SeqCst), 2);
        assert!(is_encrypted_file(&cache));
        assert!(!plain.are_cookies_cached("firefox"));
    }

    #[test]
    fn test_disabled_encryption() {
        let dir = tempdir().unwrap();
        let v = CookieVault::open(CookieSettings::rooted(dir.path(), None, 24, false)).unwrap();
        assert_eq!(v.encrypt("plain").unwrap(), "plain");
        let status = v.encryption_status();
        assert!(!status.encryption_enabled);
        assert!(!status.key_file_exists);
    }
}
