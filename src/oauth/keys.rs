//! ES256 signing keys, the published key set and rotation.
//!
//! [`KeyManager`] owns the key material. It keeps the loaded [`KeyRing`] in a
//! cache whose lifetime is the rotation interval: when the cache expires the
//! current key is demoted to previous and a fresh current key is generated.
//! Callers always receive an `Arc` snapshot, so a rotation is never observed
//! half way through.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use p256::SecretKey;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{EncodePrivateKey, LineEnding};
use rand::rngs::OsRng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::errors::{KeyError, StorageError};
use crate::storage::traits::{KeyRecord, KeySlot, KeyStore};

pub type Result<T> = std::result::Result<T, KeyError>;

const KEY_TYPE: &str = "EC";
const CURVE: &str = "P-256";
const ALGORITHM: &str = "ES256";
const KEY_USE: &str = "sig";

/// Public half of a signing key as published in the JWKS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: String,
    pub kid: String,
    pub alg: String,
    #[serde(rename = "use")]
    pub key_use: String,
}

/// JSON Web Key Set, current key first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySet {
    pub keys: Vec<Jwk>,
}

/// A P-256 keypair with its jsonwebtoken handles
pub struct SigningKey {
    kid: String,
    slot: KeySlot,
    secret: SecretKey,
    x: String,
    y: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Generate a new keypair with a random key id
    pub fn generate(slot: KeySlot) -> Result<Self> {
        let secret = SecretKey::random(&mut OsRng);
        Self::from_secret(uuid::Uuid::new_v4().to_string(), slot, secret)
    }

    fn from_secret(kid: String, slot: KeySlot, secret: SecretKey) -> Result<Self> {
        let point = secret.public_key().to_encoded_point(false);
        let x = point
            .x()
            .ok_or_else(|| KeyError::GenerationFailed("missing x coordinate".to_string()))?;
        let y = point
            .y()
            .ok_or_else(|| KeyError::GenerationFailed("missing y coordinate".to_string()))?;
        let x = URL_SAFE_NO_PAD.encode(x.as_slice());
        let y = URL_SAFE_NO_PAD.encode(y.as_slice());

        // jsonwebtoken only takes EC private keys as PKCS8
        let private_pem = secret
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyError::GenerationFailed(e.to_string()))?;
        let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
            .map_err(|e| KeyError::GenerationFailed(e.to_string()))?;
        let decoding_key = DecodingKey::from_ec_components(&x, &y)
            .map_err(|e| KeyError::GenerationFailed(e.to_string()))?;

        Ok(Self {
            kid,
            slot,
            secret,
            x,
            y,
            encoding_key,
            decoding_key,
        })
    }

    /// Rebuild a key from its persisted record.
    ///
    /// The public coordinates must match the ones derived from `d`.
    pub fn from_record(record: &KeyRecord) -> Result<Self> {
        let malformed = |reason: &str| KeyError::MalformedRecord(record.kid.clone(), reason.to_string());

        if record.kty != KEY_TYPE || record.crv != CURVE || record.alg != ALGORITHM {
            return Err(malformed("unsupported key type"));
        }
        if record.kid.is_empty() {
            return Err(malformed("empty key id"));
        }

        let d = URL_SAFE_NO_PAD
            .decode(&record.d)
            .map_err(|_| malformed("private component is not base64url"))?;
        let secret = SecretKey::from_slice(&d).map_err(|_| malformed("invalid private scalar"))?;

        let key = Self::from_secret(record.kid.clone(), record.slot, secret)?;
        if key.x != record.x || key.y != record.y {
            return Err(malformed("public point does not match private scalar"));
        }
        Ok(key)
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn slot(&self) -> KeySlot {
        self.slot
    }

    pub fn to_record(&self) -> KeyRecord {
        KeyRecord {
            slot: self.slot,
            kid: self.kid.clone(),
            kty: KEY_TYPE.to_string(),
            crv: CURVE.to_string(),
            alg: ALGORITHM.to_string(),
            key_use: KEY_USE.to_string(),
            x: self.x.clone(),
            y: self.y.clone(),
            d: URL_SAFE_NO_PAD.encode(self.secret.to_bytes()),
        }
    }

    pub fn to_jwk(&self) -> Jwk {
        Jwk {
            kty: KEY_TYPE.to_string(),
            crv: CURVE.to_string(),
            x: self.x.clone(),
            y: self.y.clone(),
            kid: self.kid.clone(),
            alg: ALGORITHM.to_string(),
            key_use: KEY_USE.to_string(),
        }
    }
}

/// Immutable snapshot of the retained keys
#[derive(Debug)]
pub struct KeyRing {
    current: SigningKey,
    previous: Option<SigningKey>,
}

impl KeyRing {
    pub fn current(&self) -> &SigningKey {
        &self.current
    }

    pub fn previous(&self) -> Option<&SigningKey> {
        self.previous.as_ref()
    }

    fn iter(&self) -> impl Iterator<Item = &SigningKey> {
        std::iter::once(&self.current).chain(self.previous.iter())
    }

    pub fn to_key_set(&self) -> KeySet {
        KeySet {
            keys: self.iter().map(SigningKey::to_jwk).collect(),
        }
    }
}

#[derive(Default)]
struct StoredKeys {
    current: Option<SigningKey>,
    previous: Option<SigningKey>,
}

struct CachedKeyRing {
    ring: Arc<KeyRing>,
    cached_at: DateTime<Utc>,
}

/// Owns signing keys, publishes the key set and rotates keys on a fixed cadence.
pub struct KeyManager {
    store: Arc<dyn KeyStore>,
    clock: Arc<dyn Clock>,
    rotation_interval: Duration,
    cache: Mutex<Option<CachedKeyRing>>,
}

impl KeyManager {
    pub fn new(
        store: Arc<dyn KeyStore>,
        clock: Arc<dyn Clock>,
        rotation_interval: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            rotation_interval,
            cache: Mutex::new(None),
        }
    }

    /// Generate a new current key and persist it.
    ///
    /// Replaces whatever key occupied the current slot. The cached key ring is
    /// not touched: the key is read back from the store when the cache next
    /// expires, and that rotation demotes it to previous.
    pub async fn generate_key(&self) -> Result<SigningKey> {
        let key = SigningKey::generate(KeySlot::Current)?;
        self.store.store_key(&key.to_record()).await?;
        info!(kid = %key.kid, "generated signing key");
        Ok(key)
    }

    /// Snapshot of the retained keys, rotating first when the cache has expired.
    ///
    /// A failed rotation leaves the previous snapshot cached.
    pub async fn key_ring(&self) -> Result<Arc<KeyRing>> {
        let mut cache = self.cache.lock().await;
        let now = self.clock.now();

        let ring = match cache.as_ref() {
            Some(cached) if now - cached.cached_at < self.rotation_interval => {
                return Ok(cached.ring.clone());
            }
            Some(cached) => {
                let cached = cached.ring.clone();
                self.rotate_stored(&cached).await?
            }
            None => self.load().await?,
        };

        let ring = Arc::new(ring);
        *cache = Some(CachedKeyRing {
            ring: ring.clone(),
            cached_at: now,
        });
        Ok(ring)
    }

    /// Public key set, never empty
    pub async fn get_key_set(&self) -> Result<KeySet> {
        Ok(self.key_ring().await?.to_key_set())
    }

    /// Demote the current key to previous and generate a new current key,
    /// regardless of the cache age.
    pub async fn rotate(&self) -> Result<KeySet> {
        let mut cache = self.cache.lock().await;
        let cached = match cache.as_ref() {
            Some(cached) => cached.ring.clone(),
            None => Arc::new(self.load().await?),
        };
        let rotated = Arc::new(self.rotate_stored(&cached).await?);
        let key_set = rotated.to_key_set();
        *cache = Some(CachedKeyRing {
            ring: rotated,
            cached_at: self.clock.now(),
        });
        Ok(key_set)
    }

    /// Sign claims with the current key
    pub async fn sign<T: Serialize>(&self, claims: &T) -> Result<String> {
        let ring = self.key_ring().await?;
        let key = ring.current();

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(key.kid.clone());

        encode(&header, claims, &key.encoding_key).map_err(|e| KeyError::SigningFailed(e.to_string()))
    }

    /// Verify a token against the current or previous key and return its claims.
    ///
    /// Only the signature is checked here. Expiry and audience are checked by
    /// the caller against its own clock.
    pub async fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<T> {
        // Surface malformed tokens before trying any key
        decode_unverified::<T>(token)?;
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| KeyError::MalformedToken(e.to_string()))?;

        let ring = self.key_ring().await?;
        let matching: Vec<&SigningKey> = ring
            .iter()
            .filter(|key| header.kid.as_deref() == Some(key.kid.as_str()))
            .collect();
        let candidates = if matching.is_empty() {
            ring.iter().collect()
        } else {
            matching
        };

        let mut validation = Validation::new(Algorithm::ES256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        for key in candidates {
            match decode::<T>(token, &key.decoding_key, &validation) {
                Ok(data) => return Ok(data.claims),
                Err(error) => debug!(kid = %key.kid, %error, "signature check failed"),
            }
        }
        Err(KeyError::InvalidSignature)
    }

    /// Rotate from the persisted current key. `cached` stands in when the
    /// store holds no current key, e.g. after an interrupted rotation.
    async fn rotate_stored(&self, cached: &KeyRing) -> Result<KeyRing> {
        let stored = self.read_store().await?;
        let current = stored.current.as_ref().unwrap_or(cached.current());
        self.rotate_ring(current).await
    }

    async fn rotate_ring(&self, current: &SigningKey) -> Result<KeyRing> {
        let new_current = SigningKey::generate(KeySlot::Current)?;
        let demoted = SigningKey::from_secret(
            current.kid.clone(),
            KeySlot::Previous,
            current.secret.clone(),
        )?;

        self.store.clear_keys().await?;
        self.store.store_key(&demoted.to_record()).await?;
        self.store.store_key(&new_current.to_record()).await?;

        info!(
            current = %new_current.kid,
            previous = %demoted.kid,
            "rotated signing keys"
        );

        Ok(KeyRing {
            current: new_current,
            previous: Some(demoted),
        })
    }

    async fn load(&self) -> Result<KeyRing> {
        let stored = self.read_store().await?;
        let current = match stored.current {
            Some(key) => key,
            None => self.generate_key().await?,
        };
        Ok(KeyRing {
            current,
            previous: stored.previous,
        })
    }

    /// Read the persisted keys. An unreadable or malformed record wipes the
    /// store and nothing is returned.
    async fn read_store(&self) -> Result<StoredKeys> {
        let records = match self.store.list_keys().await {
            Ok(records) => records,
            Err(StorageError::SerializationFailed(reason)) => {
                warn!(%reason, "unreadable key record, wiping key store");
                self.store.clear_keys().await?;
                return Ok(StoredKeys::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut stored = StoredKeys::default();
        for record in &records {
            match SigningKey::from_record(record) {
                Ok(key) => match key.slot {
                    KeySlot::Current => stored.current = Some(key),
                    KeySlot::Previous => stored.previous = Some(key),
                },
                Err(error) => {
                    warn!(%error, "malformed key record, wiping key store");
                    self.store.clear_keys().await?;
                    return Ok(StoredKeys::default());
                }
            }
        }
        Ok(stored)
    }
}

/// Decode a token's claims without checking the signature
pub fn decode_unverified<T: DeserializeOwned>(token: &str) -> Result<T> {
    jsonwebtoken::dangerous::insecure_decode::<T>(token)
        .map(|data| data.claims)
        .map_err(|e| KeyError::MalformedToken(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryOAuthStorage;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Key store that can be told to return an unreadable record or refuse writes
    #[derive(Default)]
    struct FaultyKeyStore {
        inner: MemoryOAuthStorage,
        unreadable: AtomicBool,
        refuse_writes: AtomicBool,
    }

    #[async_trait]
    impl KeyStore for FaultyKeyStore {
        async fn store_key(&self, record: &KeyRecord) -> std::result::Result<(), StorageError> {
            if self.refuse_writes.load(Ordering::SeqCst) {
                return Err(StorageError::LockFailed("writes refused".to_string()));
            }
            self.inner.store_key(record).await
        }

        async fn list_keys(&self) -> std::result::Result<Vec<KeyRecord>, StorageError> {
            if self.unreadable.swap(false, Ordering::SeqCst) {
                return Err(StorageError::SerializationFailed(
                    "truncated key record".to_string(),
                ));
            }
            self.inner.list_keys().await
        }

        async fn clear_keys(&self) -> std::result::Result<(), StorageError> {
            self.inner.clear_keys().await
        }
    }

    fn faulty_manager() -> (KeyManager, Arc<FaultyKeyStore>, ManualClock) {
        let store = Arc::new(FaultyKeyStore::default());
        let clock = ManualClock::default();
        let manager = KeyManager::new(store.clone(), Arc::new(clock.clone()), Duration::days(14));
        (manager, store, clock)
    }

    fn manager() -> (KeyManager, Arc<MemoryOAuthStorage>, ManualClock) {
        let storage = Arc::new(MemoryOAuthStorage::new());
        let clock = ManualClock::default();
        let manager = KeyManager::new(
            storage.clone(),
            Arc::new(clock.clone()),
            Duration::days(14),
        );
        (manager, storage, clock)
    }

    #[tokio::test]
    async fn test_empty_store_synthesizes_key() {
        let (manager, storage, _clock) = manager();

        let key_set = manager.get_key_set().await.unwrap();
        assert_eq!(key_set.keys.len(), 1);
        assert_eq!(key_set.keys[0].alg, "ES256");
        assert_eq!(key_set.keys[0].crv, "P-256");
        assert_eq!(key_set.keys[0].key_use, "sig");

        let records = storage.list_keys().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kid, key_set.keys[0].kid);
    }

    #[tokio::test]
    async fn test_key_set_is_cached_until_rotation_interval() {
        let (manager, _storage, clock) = manager();

        let first = manager.get_key_set().await.unwrap();
        clock.advance(Duration::days(13));
        assert_eq!(manager.get_key_set().await.unwrap(), first);

        clock.advance(Duration::days(1));
        let rotated = manager.get_key_set().await.unwrap();
        assert_eq!(rotated.keys.len(), 2);
        assert_ne!(rotated.keys[0].kid, first.keys[0].kid);
        assert_eq!(rotated.keys[1].kid, first.keys[0].kid);
    }

    #[tokio::test]
    async fn test_expired_cache_rotates_from_stored_key() {
        let (manager, storage, clock) = manager();

        let first = manager.get_key_set().await.unwrap();
        let generated = manager.generate_key().await.unwrap();

        // Cache is still fresh, so the generated key is not published yet
        assert_eq!(manager.get_key_set().await.unwrap(), first);

        clock.advance(Duration::days(14));
        let rotated = manager.get_key_set().await.unwrap();
        assert_eq!(rotated.keys.len(), 2);
        assert_eq!(rotated.keys[1].kid, generated.kid());
        assert_ne!(rotated.keys[0].kid, generated.kid());
        assert_ne!(rotated.keys[0].kid, first.keys[0].kid);

        let records = storage.list_keys().await.unwrap();
        assert_eq!(records[1].slot, KeySlot::Previous);
        assert_eq!(records[1].kid, generated.kid());
    }

    #[tokio::test]
    async fn test_failed_rotation_keeps_verifying_key() {
        let (manager, store, clock) = faulty_manager();
        let token = manager.sign(&json!({"sub": "x"})).await.unwrap();
        let original = manager.get_key_set().await.unwrap().keys[0].kid.clone();

        store.refuse_writes.store(true, Ordering::SeqCst);
        clock.advance(Duration::days(14));
        assert!(matches!(
            manager.get_key_set().await,
            Err(KeyError::Storage(StorageError::LockFailed(_)))
        ));

        // The store was cleared before the write failed
        assert!(store.inner.list_keys().await.unwrap().is_empty());

        store.refuse_writes.store(false, Ordering::SeqCst);
        let key_set = manager.get_key_set().await.unwrap();
        assert_eq!(key_set.keys.len(), 2);
        assert_eq!(key_set.keys[1].kid, original);
        assert!(manager.verify::<Value>(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreadable_record_wipes_store() {
        let (manager, store, _clock) = faulty_manager();

        let stale = SigningKey::generate(KeySlot::Previous).unwrap().to_record();
        store.inner.store_key(&stale).await.unwrap();
        store.unreadable.store(true, Ordering::SeqCst);

        let key_set = manager.get_key_set().await.unwrap();
        assert_eq!(key_set.keys.len(), 1);
        assert_ne!(key_set.keys[0].kid, stale.kid);

        let records = store.inner.list_keys().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].slot, KeySlot::Current);
        assert_eq!(records[0].kid, key_set.keys[0].kid);
    }

    #[tokio::test]
    async fn test_rotation_keeps_exactly_two_keys() {
        let (manager, storage, _clock) = manager();

        manager.get_key_set().await.unwrap();
        manager.rotate().await.unwrap();
        let key_set = manager.rotate().await.unwrap();

        assert_eq!(key_set.keys.len(), 2);
        let records = storage.list_keys().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].slot, KeySlot::Current);
        assert_eq!(records[0].kid, key_set.keys[0].kid);
        assert_eq!(records[1].slot, KeySlot::Previous);
        assert_eq!(records[1].kid, key_set.keys[1].kid);
    }

    #[tokio::test]
    async fn test_sign_and_verify_across_rotations() {
        let (manager, _storage, _clock) = manager();
        let claims = json!({"sub": "user@example.com"});

        let token = manager.sign(&claims).await.unwrap();
        let verified: Value = manager.verify(&token).await.unwrap();
        assert_eq!(verified["sub"], "user@example.com");

        manager.rotate().await.unwrap();
        assert!(manager.verify::<Value>(&token).await.is_ok());

        manager.rotate().await.unwrap();
        assert!(matches!(
            manager.verify::<Value>(&token).await,
            Err(KeyError::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn test_verify_rejects_foreign_and_malformed_tokens() {
        let (other, _other_storage, _other_clock) = manager();
        let (manager, _storage, _clock) = manager();

        let foreign = other.sign(&json!({"sub": "x"})).await.unwrap();
        assert!(matches!(
            manager.verify::<Value>(&foreign).await,
            Err(KeyError::InvalidSignature)
        ));

        assert!(matches!(
            manager.verify::<Value>("not-a-token").await,
            Err(KeyError::MalformedToken(_))
        ));
    }

    #[tokio::test]
    async fn test_keys_survive_reload_from_store() {
        let (manager, storage, clock) = manager();
        let token = manager.sign(&json!({"sub": "x"})).await.unwrap();

        let reloaded = KeyManager::new(storage, Arc::new(clock), Duration::days(14));
        assert!(reloaded.verify::<Value>(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_record_wipes_store() {
        let (manager, storage, _clock) = manager();

        let mut record = SigningKey::generate(KeySlot::Previous).unwrap().to_record();
        record.d = "not a scalar".to_string();
        storage.store_key(&record).await.unwrap();
        let good = SigningKey::generate(KeySlot::Current).unwrap().to_record();
        storage.store_key(&good).await.unwrap();

        let key_set = manager.get_key_set().await.unwrap();
        assert_eq!(key_set.keys.len(), 1);
        assert_ne!(key_set.keys[0].kid, good.kid);
        assert_ne!(key_set.keys[0].kid, record.kid);

        let records = storage.list_keys().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kid, key_set.keys[0].kid);
    }

    #[tokio::test]
    async fn test_mismatched_public_point_is_malformed() {
        let mut record = SigningKey::generate(KeySlot::Current).unwrap().to_record();
        let other = SigningKey::generate(KeySlot::Current).unwrap().to_record();
        record.x = other.x;

        assert!(matches!(
            SigningKey::from_record(&record),
            Err(KeyError::MalformedRecord(_, _))
        ));
    }

    #[test]
    fn test_decode_unverified() {
        assert!(decode_unverified::<Value>("a.b").is_err());
    }
}
