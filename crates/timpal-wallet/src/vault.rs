//! The encrypted seed vault.
//!
//! At-rest layout: the recovery phrase (and any imported private keys) are
//! encrypted with ChaCha20-Poly1305. The AEAD key is derived in two stages:
//! the password is hardened with Argon2id (time=3, memory=64 MiB,
//! parallelism=4, 32-byte output, 16-byte random salt), and the resulting
//! PHC hash string is stretched with PBKDF2-HMAC-SHA512 (210 000 iterations,
//! 32-byte output, same salt) into the symmetric key.
//!
//! Failure semantics: a password that fails Argon2 verification is
//! `WrongPassword`; a ciphertext that fails authentication after a correct
//! password is `Corrupted`.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::collections::BTreeMap;
use std::path::Path;
use timpal_core::constants::MIN_PIN_LEN;
use timpal_core::types::Address;
use timpal_crypto::KeyPair;
use tracing::info;
use zeroize::Zeroize;

use crate::error::WalletError;
use crate::hd::{account_path, derive_key, generate_phrase, validate_phrase};

const WALLET_VERSION: u32 = 2;

/// Account number reserved for keys imported from v1 wallets.
const LEGACY_IMPORT_ACCOUNT: u32 = 999;

const ARGON2_TIME_COST: u32 = 3;
const ARGON2_MEMORY_KIB: u32 = 64 * 1024;
const ARGON2_PARALLELISM: u32 = 4;
const ARGON2_OUTPUT_LEN: usize = 32;
const PBKDF2_ROUNDS: u32 = 210_000;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

// ── Account material ─────────────────────────────────────────────────────────

/// A fully derived (or imported) signing account held in memory while the
/// vault is unlocked.
#[derive(Clone, Serialize, Deserialize)]
pub struct DerivedAccount {
    pub private_key: String,
    pub public_key: String,
    pub address: Address,
    pub path: String,
    pub account: u32,
    pub change: u32,
    pub index: u32,
    #[serde(default)]
    pub imported: bool,
}

impl std::fmt::Debug for DerivedAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DerivedAccount {{ address: {}, path: {} }}", self.address, self.path)
    }
}

impl DerivedAccount {
    pub fn keypair(&self) -> Result<KeyPair, WalletError> {
        KeyPair::from_secret_hex(&self.private_key)
            .map_err(|e| WalletError::CryptoError(e.to_string()))
    }
}

// ── On-disk format ───────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct StoredAccount {
    address: Address,
    public_key: String,
    path: String,
    #[serde(default)]
    imported: bool,
    /// Present only for imported keys; derived keys are recomputed from the
    /// phrase on load.
    #[serde(default)]
    private_key_encrypted: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct WalletFile {
    version: u32,
    encrypted_phrase: String,
    salt: String,
    password_hash: String,
    passphrase_used: bool,
    pin_hash: Option<String>,
    accounts: BTreeMap<String, StoredAccount>,
}

// ── SeedVault ────────────────────────────────────────────────────────────────

/// The wallet vault: recovery phrase, derived account cache, transfer PIN.
///
/// The vault exclusively owns every keypair it derives or imports.
pub struct SeedVault {
    phrase: Option<String>,
    passphrase: String,
    accounts: BTreeMap<u32, DerivedAccount>,
    pin_hash: Option<String>,
    salt: Option<[u8; SALT_LEN]>,
}

impl std::fmt::Debug for SeedVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedVault")
            .field("phrase", &self.phrase.as_ref().map(|_| "<redacted>"))
            .field("passphrase", &"<redacted>")
            .field("accounts", &self.accounts.len())
            .field("pin_hash", &self.pin_hash.as_ref().map(|_| "<redacted>"))
            .field("salt", &self.salt.is_some())
            .finish()
    }
}

impl Default for SeedVault {
    fn default() -> Self {
        Self::new()
    }
}

impl SeedVault {
    pub fn new() -> Self {
        Self {
            phrase: None,
            passphrase: String::new(),
            accounts: BTreeMap::new(),
            pin_hash: None,
            salt: None,
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Create a fresh wallet: new phrase, PIN set, account 0 derived.
    /// Returns the phrase; the caller must ensure the user backs it up.
    pub fn create_new(
        &mut self,
        words: usize,
        pin: &str,
        passphrase: &str,
    ) -> Result<String, WalletError> {
        self.set_pin(pin)?;
        let phrase = generate_phrase(words)?;
        self.phrase = Some(phrase.clone());
        self.passphrase = passphrase.to_string();
        self.derive_account(0)?;
        Ok(phrase)
    }

    /// Restore from an existing phrase. Fails on a bad checksum.
    pub fn restore(
        &mut self,
        phrase: &str,
        pin: &str,
        passphrase: &str,
    ) -> Result<(), WalletError> {
        if !validate_phrase(phrase) {
            return Err(WalletError::InvalidPhrase);
        }
        self.set_pin(pin)?;
        self.phrase = Some(phrase.to_string());
        self.passphrase = passphrase.to_string();
        self.derive_account(0)?;
        Ok(())
    }

    pub fn phrase(&self) -> Option<&str> {
        self.phrase.as_deref()
    }

    // ── PIN ──────────────────────────────────────────────────────────────────

    /// Set the transfer-authorization PIN: numeric, at least six digits.
    /// Stored as a SHA-256 digest; distinct from the encryption password.
    pub fn set_pin(&mut self, pin: &str) -> Result<(), WalletError> {
        if pin.len() < MIN_PIN_LEN || !pin.chars().all(|c| c.is_ascii_digit()) {
            return Err(WalletError::InvalidPin(MIN_PIN_LEN));
        }
        self.pin_hash = Some(hex::encode(Sha256::digest(pin.as_bytes())));
        Ok(())
    }

    pub fn validate_pin(&self, pin: &str) -> bool {
        match &self.pin_hash {
            Some(stored) => *stored == hex::encode(Sha256::digest(pin.as_bytes())),
            None => false,
        }
    }

    /// Gate for outgoing transfers.
    pub fn authorize_transfer(&self, pin: &str) -> Result<(), WalletError> {
        if self.validate_pin(pin) {
            Ok(())
        } else {
            Err(WalletError::WrongPin)
        }
    }

    // ── Accounts ─────────────────────────────────────────────────────────────

    /// Get (deriving on first use) the default key of `account`.
    pub fn get_account(&mut self, account: u32) -> Result<&DerivedAccount, WalletError> {
        if !self.accounts.contains_key(&account) {
            self.derive_account(account)?;
        }
        Ok(&self.accounts[&account])
    }

    fn derive_account(&mut self, account: u32) -> Result<(), WalletError> {
        let derived = self.derive_at(account, 0, 0)?;
        self.accounts.insert(account, derived);
        Ok(())
    }

    fn derive_at(&self, account: u32, change: u32, index: u32) -> Result<DerivedAccount, WalletError> {
        let phrase = self.phrase.as_deref().ok_or(WalletError::NotInitialized)?;
        let path = account_path(account, change, index);
        let kp = derive_key(phrase, &self.passphrase, &path)?;
        Ok(DerivedAccount {
            private_key: kp.secret_hex(),
            public_key: kp.public_key_hex.clone(),
            address: kp.address.clone(),
            path,
            account,
            change,
            index,
            imported: false,
        })
    }

    /// Derive a new receiving address for `account`, at the next unused
    /// index unless one is given.
    pub fn derive_new_address(
        &mut self,
        account: u32,
        index: Option<u32>,
    ) -> Result<DerivedAccount, WalletError> {
        let index = index.unwrap_or_else(|| {
            self.accounts
                .values()
                .filter(|a| a.account == account && a.change == 0)
                .map(|a| a.index + 1)
                .max()
                .unwrap_or(0)
        });
        self.derive_at(account, 0, index)
    }

    /// Import a v1 private key, preserving its on-chain address. Stored
    /// under the reserved non-derived path `m/legacy/imported/<account>` and
    /// flagged so encrypted saves carry the key material itself.
    pub fn import_legacy_key(
        &mut self,
        private_key_hex: &str,
        account: Option<u32>,
    ) -> Result<&DerivedAccount, WalletError> {
        let account = account.unwrap_or(LEGACY_IMPORT_ACCOUNT);
        let kp = KeyPair::from_secret_hex(private_key_hex)
            .map_err(|e| WalletError::CryptoError(e.to_string()))?;
        let imported = DerivedAccount {
            private_key: kp.secret_hex(),
            public_key: kp.public_key_hex.clone(),
            address: kp.address.clone(),
            path: format!("m/legacy/imported/{account}"),
            account,
            change: 0,
            index: 0,
            imported: true,
        };
        self.accounts.insert(account, imported);
        Ok(&self.accounts[&account])
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    /// Encrypt and write the vault to `path`.
    pub fn save(&mut self, path: &Path, password: &str) -> Result<(), WalletError> {
        let phrase = self.phrase.clone().ok_or(WalletError::NotInitialized)?;

        let salt = match self.salt {
            Some(s) => s,
            None => {
                let mut s = [0u8; SALT_LEN];
                rand::thread_rng().fill_bytes(&mut s);
                self.salt = Some(s);
                s
            }
        };

        let password_hash = argon2_hash(password, &salt)?;
        let mut key = stretch_key(&password_hash, &salt);

        let mut accounts = BTreeMap::new();
        for (num, acc) in &self.accounts {
            let private_key_encrypted = if acc.imported {
                Some(encrypt_string(&key, &acc.private_key)?)
            } else {
                None
            };
            accounts.insert(
                num.to_string(),
                StoredAccount {
                    address: acc.address.clone(),
                    public_key: acc.public_key.clone(),
                    path: acc.path.clone(),
                    imported: acc.imported,
                    private_key_encrypted,
                },
            );
        }

        let file = WalletFile {
            version: WALLET_VERSION,
            encrypted_phrase: encrypt_string(&key, &phrase)?,
            salt: B64.encode(salt),
            password_hash,
            passphrase_used: !self.passphrase.is_empty(),
            pin_hash: self.pin_hash.clone(),
            accounts,
        };
        key.zeroize();

        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| WalletError::Serialization(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| WalletError::Io(e.to_string()))?;
        info!(path = %path.display(), accounts = self.accounts.len(), "wallet saved");
        Ok(())
    }

    /// Read and decrypt a vault from `path`. The BIP-39 passphrase is not
    /// stored; it must be supplied again when one was used.
    pub fn load(path: &Path, password: &str, passphrase: &str) -> Result<Self, WalletError> {
        let raw = std::fs::read_to_string(path).map_err(|e| WalletError::Io(e.to_string()))?;
        let file: WalletFile = serde_json::from_str(&raw).map_err(|_| WalletError::Corrupted)?;
        if file.version != WALLET_VERSION {
            return Err(WalletError::UnsupportedVersion(file.version));
        }

        let salt_vec = B64.decode(&file.salt).map_err(|_| WalletError::Corrupted)?;
        if salt_vec.len() != SALT_LEN {
            return Err(WalletError::Corrupted);
        }
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&salt_vec);

        argon2_verify(password, &salt, &file.password_hash)?;
        let mut key = stretch_key(&file.password_hash, &salt);

        let phrase = decrypt_string(&key, &file.encrypted_phrase)?;
        if !validate_phrase(&phrase) {
            key.zeroize();
            return Err(WalletError::Corrupted);
        }

        let mut vault = Self {
            phrase: Some(phrase),
            passphrase: passphrase.to_string(),
            accounts: BTreeMap::new(),
            pin_hash: file.pin_hash.clone(),
            salt: Some(salt),
        };

        for (num_str, stored) in &file.accounts {
            let num: u32 = num_str.parse().map_err(|_| WalletError::Corrupted)?;
            if stored.imported {
                let ciphertext = stored
                    .private_key_encrypted
                    .as_deref()
                    .ok_or(WalletError::Corrupted)?;
                let private_key = decrypt_string(&key, ciphertext)?;
                vault.import_legacy_key(&private_key, Some(num))?;
            } else {
                let (account, change, index) = parse_stored_path(&stored.path)?;
                let derived = vault.derive_at(account, change, index)?;
                vault.accounts.insert(num, derived);
            }
        }
        key.zeroize();
        Ok(vault)
    }
}

// ── Key derivation and AEAD helpers ──────────────────────────────────────────

fn argon2_context() -> Result<Argon2<'static>, WalletError> {
    let params = Params::new(
        ARGON2_MEMORY_KIB,
        ARGON2_TIME_COST,
        ARGON2_PARALLELISM,
        Some(ARGON2_OUTPUT_LEN),
    )
    .map_err(|e| WalletError::CryptoError(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Argon2id over password + base64(salt), producing a PHC hash string.
fn argon2_hash(password: &str, salt: &[u8]) -> Result<String, WalletError> {
    let secret = format!("{password}{}", B64.encode(salt));
    let salt_string =
        SaltString::encode_b64(salt).map_err(|e| WalletError::CryptoError(e.to_string()))?;
    let hash = argon2_context()?
        .hash_password(secret.as_bytes(), &salt_string)
        .map_err(|e| WalletError::CryptoError(e.to_string()))?;
    Ok(hash.to_string())
}

fn argon2_verify(password: &str, salt: &[u8], stored: &str) -> Result<(), WalletError> {
    let secret = format!("{password}{}", B64.encode(salt));
    let parsed = PasswordHash::new(stored).map_err(|_| WalletError::Corrupted)?;
    argon2_context()?
        .verify_password(secret.as_bytes(), &parsed)
        .map_err(|_| WalletError::WrongPassword)
}

/// Stretch the Argon2 hash string into the symmetric key.
fn stretch_key(password_hash: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha512>(password_hash.as_bytes(), salt, PBKDF2_ROUNDS, &mut key);
    key
}

/// ChaCha20-Poly1305; output is `base64(nonce).base64(ciphertext)`.
fn encrypt_string(key: &[u8; 32], plaintext: &str) -> Result<String, WalletError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|e| WalletError::CryptoError(e.to_string()))?;
    Ok(format!("{}.{}", B64.encode(nonce), B64.encode(ciphertext)))
}

fn decrypt_string(key: &[u8; 32], blob: &str) -> Result<String, WalletError> {
    let (nonce_b64, ct_b64) = blob.split_once('.').ok_or(WalletError::Corrupted)?;
    let nonce = B64.decode(nonce_b64).map_err(|_| WalletError::Corrupted)?;
    if nonce.len() != NONCE_LEN {
        return Err(WalletError::Corrupted);
    }
    let ciphertext = B64.decode(ct_b64).map_err(|_| WalletError::Corrupted)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
        .map_err(|_| WalletError::Corrupted)?;
    String::from_utf8(plaintext).map_err(|_| WalletError::Corrupted)
}

/// Recover (account, change, index) from a stored BIP-44 path.
fn parse_stored_path(path: &str) -> Result<(u32, u32, u32), WalletError> {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() != 6 {
        return Err(WalletError::InvalidPath(path.to_string()));
    }
    let account = parts[3]
        .trim_end_matches('\'')
        .parse()
        .map_err(|_| WalletError::InvalidPath(path.to_string()))?;
    let change = parts[4].parse().map_err(|_| WalletError::InvalidPath(path.to_string()))?;
    let index = parts[5].parse().map_err(|_| WalletError::InvalidPath(path.to_string()))?;
    Ok((account, change, index))
}
