use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::jwk::{
    AlgorithmParameters, CommonParameters, Jwk, JwkSet, KeyAlgorithm, PublicKeyUse,
    RSAKeyParameters, RSAKeyType,
};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use std::collections::HashMap;
use std::fs;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::config::{JwtConfig, SigningKeyConfig, TrustedIssuer};

/// Minimum spacing between two trusted keyset fetches triggered by misses
const TRUSTED_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

struct LocalKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
    jwk: Jwk,
}

#[derive(Clone)]
struct TrustedKey {
    issuer: String,
    decoding: DecodingKey,
}

/// Key resolved for verifying a token, with the issuer it is valid for.
#[derive(Clone)]
pub struct VerificationKey {
    pub issuer: String,
    pub decoding: DecodingKey,
}

/// Local RS256 signing keys plus public keys of trusted external issuers.
pub struct KeyRing {
    issuer: String,
    active_kid: String,
    local: HashMap<String, LocalKey>,
    trusted_issuers: Vec<TrustedIssuer>,
    trusted: RwLock<HashMap<String, TrustedKey>>,
    last_refresh: Mutex<Option<Instant>>,
    http: reqwest::Client,
}

impl KeyRing {
    /// Load every configured key pair from disk; the first one signs.
    pub fn new(config: &JwtConfig, trusted_issuers: Vec<TrustedIssuer>) -> Result<Self, anyhow::Error> {
        let active_kid = config
            .keys
            .first()
            .map(|k| k.kid.clone())
            .ok_or_else(|| anyhow::anyhow!("At least one signing key is required"))?;

        let mut local = HashMap::new();
        for key in &config.keys {
            if local.insert(key.kid.clone(), load_key(key)?).is_some() {
                return Err(anyhow::anyhow!("Duplicate signing key id {}", key.kid));
            }
        }

        tracing::info!(
            active_kid = %active_kid,
            key_count = local.len(),
            trusted_issuers = trusted_issuers.len(),
            "Key ring initialized with RS256 keys"
        );

        Ok(Self {
            issuer: config.issuer.clone(),
            active_kid,
            local,
            trusted_issuers,
            trusted: RwLock::new(HashMap::new()),
            last_refresh: Mutex::new(None),
            http: reqwest::Client::new(),
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn active_kid(&self) -> &str {
        &self.active_kid
    }

    /// Key id and encoding key used for new signatures.
    pub fn signing_key(&self) -> Result<(&str, &EncodingKey), anyhow::Error> {
        self.local
            .get(&self.active_kid)
            .map(|k| (self.active_kid.as_str(), &k.encoding))
            .ok_or_else(|| anyhow::anyhow!("Active signing key {} missing", self.active_kid))
    }

    /// Resolve a key id, local keys first.
    pub fn verification_key(&self, kid: &str) -> Option<VerificationKey> {
        if let Some(key) = self.local.get(kid) {
            return Some(VerificationKey {
                issuer: self.issuer.clone(),
                decoding: key.decoding.clone(),
            });
        }

        let trusted = self.trusted.read().ok()?;
        trusted.get(kid).map(|key| VerificationKey {
            issuer: key.issuer.clone(),
            decoding: key.decoding.clone(),
        })
    }

    /// Public keyset of the local keys, active key first.
    pub fn jwks(&self) -> JwkSet {
        let mut keys: Vec<Jwk> = Vec::with_capacity(self.local.len());
        if let Some(active) = self.local.get(&self.active_kid) {
            keys.push(active.jwk.clone());
        }
        let mut rest: Vec<(&String, &LocalKey)> = self
            .local
            .iter()
            .filter(|(kid, _)| **kid != self.active_kid)
            .collect();
        rest.sort_by(|a, b| a.0.cmp(b.0));
        keys.extend(rest.into_iter().map(|(_, k)| k.jwk.clone()));

        JwkSet { keys }
    }

    pub fn has_trusted_issuers(&self) -> bool {
        !self.trusted_issuers.is_empty()
    }

    /// Whether enough time passed since the last fetch to try again.
    /// Claims the slot when it returns true.
    pub fn should_refresh(&self) -> bool {
        if !self.has_trusted_issuers() {
            return false;
        }
        let Ok(mut last) = self.last_refresh.lock() else {
            return false;
        };
        match *last {
            Some(at) if at.elapsed() < TRUSTED_REFRESH_INTERVAL => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }

    /// Fetch the keysets of every trusted issuer. Failures are logged and
    /// leave previously fetched keys in place.
    pub async fn refresh_trusted_keys(&self) {
        for trusted in &self.trusted_issuers {
            match self.fetch_keyset(&trusted.jwks_url).await {
                Ok(set) => {
                    let mut fetched = HashMap::new();
                    for jwk in &set.keys {
                        let Some(kid) = jwk.common.key_id.clone() else {
                            continue;
                        };
                        match DecodingKey::from_jwk(jwk) {
                            Ok(decoding) => {
                                fetched.insert(
                                    kid,
                                    TrustedKey {
                                        issuer: trusted.issuer.clone(),
                                        decoding,
                                    },
                                );
                            }
                            Err(e) => {
                                tracing::warn!(
                                    issuer = %trusted.issuer,
                                    kid = %kid,
                                    error = %e,
                                    "Skipping unusable trusted key"
                                );
                            }
                        }
                    }

                    let count = fetched.len();
                    match self.trusted.write() {
                        Ok(mut keys) => keys.extend(fetched),
                        Err(e) => {
                            tracing::error!("Trusted key cache poisoned: {}", e);
                            return;
                        }
                    }
                    tracing::info!(issuer = %trusted.issuer, keys = count, "Fetched trusted keyset");
                }
                Err(e) => {
                    tracing::warn!(
                        issuer = %trusted.issuer,
                        url = %trusted.jwks_url,
                        error = %e,
                        "Failed to fetch trusted keyset"
                    );
                }
            }
        }
    }

    async fn fetch_keyset(&self, url: &str) -> Result<JwkSet, reqwest::Error> {
        self.http
            .get(url)
            .timeout(Duration::from_secs(5))
            .send()
            .await?
            .error_for_status()?
            .json::<JwkSet>()
            .await
    }
}

fn load_key(config: &SigningKeyConfig) -> Result<LocalKey, anyhow::Error> {
    let private_key_pem = fs::read_to_string(&config.private_key_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to read private key from {}: {}",
            config.private_key_path,
            e
        )
    })?;
    let encoding = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
        .map_err(|e| anyhow::anyhow!("Failed to parse private key {}: {}", config.kid, e))?;

    let public_key_pem = fs::read_to_string(&config.public_key_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to read public key from {}: {}",
            config.public_key_path,
            e
        )
    })?;
    let decoding = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
        .map_err(|e| anyhow::anyhow!("Failed to parse public key {}: {}", config.kid, e))?;

    let jwk = public_jwk(&config.kid, &public_key_pem)?;

    Ok(LocalKey {
        encoding,
        decoding,
        jwk,
    })
}

/// Accepts SPKI (`BEGIN PUBLIC KEY`) and PKCS#1 (`BEGIN RSA PUBLIC KEY`) PEM.
fn public_jwk(kid: &str, public_key_pem: &str) -> Result<Jwk, anyhow::Error> {
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(public_key_pem))
        .map_err(|e| anyhow::anyhow!("Failed to decode RSA public key {}: {}", kid, e))?;

    Ok(Jwk {
        common: CommonParameters {
            public_key_use: Some(PublicKeyUse::Signature),
            key_algorithm: Some(KeyAlgorithm::RS256),
            key_id: Some(kid.to_string()),
            ..Default::default()
        },
        algorithm: AlgorithmParameters::RSA(RSAKeyParameters {
            key_type: RSAKeyType::RSA,
            n: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        }),
    })
}
