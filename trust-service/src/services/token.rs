use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, decode_header, encode, errors::ErrorKind, Algorithm, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::events::{LifecycleEvent, Listeners};
use super::keys::KeyRing;
use super::ServiceError;
use crate::models::{NewToken, SecurityLevel, Token};
use crate::permission::{filter_for_app, Permission};
use crate::store::{Store, TokenIssuance};
use crate::utils::{generate_opaque_token, verify_secret, PlainSecret};

/// Which lifetime table to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Jwt,
    Refresh,
    Session,
}

/// Lifetimes in seconds, one entry per security level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutTable {
    pub jwt: [i64; 5],
    pub refresh: [i64; 5],
    pub session: [i64; 5],
    /// Lifetime of exchange codes
    pub exchange_code: i64,
}

impl TimeoutTable {
    /// A positive suggested value overrides the table entry.
    pub fn resolve(&self, kind: TimeoutKind, level: SecurityLevel, suggested: Option<i64>) -> i64 {
        if let Some(secs) = suggested.filter(|s| *s > 0) {
            return secs;
        }
        let table = match kind {
            TimeoutKind::Jwt => &self.jwt,
            TimeoutKind::Refresh => &self.refresh,
            TimeoutKind::Session => &self.session,
        };
        table[level.index()]
    }
}

/// Signed token payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    /// User id
    pub sub: String,
    /// Target application id
    pub aud: String,
    /// Client application the token is bound to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    /// Session id
    pub sid: String,
    /// Token document id
    pub jti: String,
    /// Scoped permissions for `aud`
    pub perm: Vec<String>,
    pub level: SecurityLevel,
    pub iat: i64,
    pub exp: i64,
}

/// What a holder receives after signing.
#[derive(Debug, Clone, Serialize)]
pub struct SignedToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_expires_in: Option<i64>,
    pub audience: String,
    pub scope: Vec<String>,
    pub level: SecurityLevel,
}

/// Result of minting a token document and signing it.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: Token,
    pub signed: SignedToken,
    /// Single-use exchange code, when requested
    pub code: Option<String>,
}

/// A verified bearer token together with its live document.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub claims: TokenClaims,
    pub token: Token,
}

/// Client authentication presented on refresh.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: PlainSecret,
}

#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn Store>,
    keys: Arc<KeyRing>,
    timeouts: TimeoutTable,
    self_app_id: String,
    listeners: Listeners,
}

impl TokenService {
    pub fn new(
        store: Arc<dyn Store>,
        keys: Arc<KeyRing>,
        timeouts: TimeoutTable,
        self_app_id: String,
        listeners: Listeners,
    ) -> Self {
        Self {
            store,
            keys,
            timeouts,
            self_app_id,
            listeners,
        }
    }

    pub fn timeouts(&self) -> &TimeoutTable {
        &self.timeouts
    }

    pub fn self_app_id(&self) -> &str {
        &self.self_app_id
    }

    pub fn keys(&self) -> &Arc<KeyRing> {
        &self.keys
    }

    /// Check signature, issuer and expiry; `audience`, when given, must
    /// match `aud`. Unknown key ids trigger a background keyset refresh.
    pub fn verify(&self, jwt: &str, audience: Option<&str>) -> Result<TokenClaims, ServiceError> {
        let header = decode_header(jwt).map_err(|_| ServiceError::InvalidToken)?;
        if header.alg != Algorithm::RS256 {
            return Err(ServiceError::InvalidToken);
        }
        let kid = header.kid.ok_or(ServiceError::InvalidToken)?;

        let Some(key) = self.keys.verification_key(&kid) else {
            if self.keys.should_refresh() {
                let keys = self.keys.clone();
                tokio::spawn(async move { keys.refresh_trusted_keys().await });
            }
            return Err(ServiceError::UnknownSigningKey(kid));
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[key.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub", "aud"]);
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        let data = decode::<TokenClaims>(jwt, &key.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => ServiceError::TokenExpired,
                _ => {
                    tracing::debug!(error = %e, "Token verification failed");
                    ServiceError::InvalidToken
                }
            }
        })?;

        Ok(data.claims)
    }

    /// Verify a token issued by this service for this service and load its
    /// document. The token and its session must both still be live.
    pub async fn authenticate(&self, jwt: &str) -> Result<AuthContext, ServiceError> {
        let claims = self.verify(jwt, Some(&self.self_app_id))?;
        if claims.iss != self.keys.issuer() {
            return Err(ServiceError::InvalidToken);
        }

        let token = self
            .store
            .find_token(&claims.jti)
            .await?
            .ok_or(ServiceError::InvalidToken)?;
        if token.session_id != claims.sid || token.user_id != claims.sub {
            return Err(ServiceError::InvalidToken);
        }
        if token.terminated {
            return Err(ServiceError::TokenTerminated);
        }
        if token.is_expired_at(Utc::now()) {
            return Err(ServiceError::TokenExpired);
        }

        let session = self
            .store
            .find_session(&token.session_id)
            .await?
            .ok_or(ServiceError::SessionNotFound)?;
        if session.terminated {
            return Err(ServiceError::TokenTerminated);
        }

        Ok(AuthContext { claims, token })
    }

    /// Sign a JWT for `token`, scoped to `target_app_id` (default: this
    /// service if the token holds any of its permissions, otherwise the
    /// first application found).
    pub async fn sign_token(
        &self,
        token: &Token,
        target_app_id: Option<&str>,
    ) -> Result<SignedToken, ServiceError> {
        let now = Utc::now();
        if token.terminated {
            return Err(ServiceError::TokenTerminated);
        }
        if token.is_expired_at(now) {
            return Err(ServiceError::TokenExpired);
        }

        let audience = match target_app_id {
            Some(app_id) => app_id.to_string(),
            None => self.default_audience(token)?,
        };

        let scope: Vec<String> = filter_for_app(&token.permissions, &self.self_app_id, &audience)?
            .iter()
            .map(Permission::to_scoped)
            .collect();
        if scope.is_empty() {
            return Err(ServiceError::NoPermission(audience));
        }

        let jwt_expires_at = token.expires_at.min(now + Duration::seconds(token.token_timeout));
        let (refresh_token, refresh_expires_at) = if jwt_expires_at < token.expires_at {
            let refresh = generate_opaque_token();
            let expires_at = token
                .expires_at
                .min(now + Duration::seconds(token.refresh_timeout));
            (Some(refresh), Some(expires_at))
        } else {
            (None, None)
        };

        let issuance = TokenIssuance {
            jwt_expires_at,
            refresh_token_hash: refresh_token.as_deref().map(Token::hash_secret),
            refresh_expires_at,
            issued_at: now,
        };
        if self
            .store
            .record_token_issuance(&token.id, &issuance)
            .await?
            .is_none()
        {
            return Err(ServiceError::TokenTerminated);
        }

        let watermark = refresh_expires_at.map_or(jwt_expires_at, |r| r.max(jwt_expires_at));
        self.store
            .raise_session_expiry(&token.session_id, watermark)
            .await?;

        let claims = TokenClaims {
            iss: self.keys.issuer().to_string(),
            sub: token.user_id.clone(),
            aud: audience.clone(),
            cid: token.client_id.clone(),
            sid: token.session_id.clone(),
            jti: token.id.clone(),
            perm: scope.clone(),
            level: token.level,
            iat: now.timestamp(),
            exp: jwt_expires_at.timestamp(),
        };
        let access_token = self.encode(&claims)?;

        self.listeners.after(
            &LifecycleEvent::TokenSigned {
                token_id: token.id.clone(),
                audience: audience.clone(),
            },
            &token.id,
        );

        Ok(SignedToken {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: seconds_until(now, jwt_expires_at),
            refresh_expires_in: refresh_expires_at.map(|at| seconds_until(now, at)),
            refresh_token,
            audience,
            scope,
            level: token.level,
        })
    }

    /// Redeem a single-use refresh token and sign a new JWT. Confidential
    /// tokens demand the client secret whenever a client id is presented.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        client: Option<&ClientCredentials>,
        target_app_id: Option<&str>,
    ) -> Result<SignedToken, ServiceError> {
        let token = self
            .store
            .redeem_refresh_token(&Token::hash_secret(refresh_token), Utc::now())
            .await?
            .ok_or(ServiceError::InvalidRefreshToken)?;

        if token.confidential {
            if let Some(client) = client {
                self.check_client_secret(&token, client).await?;
            }
        }

        self.listeners.after(
            &LifecycleEvent::TokenRefreshed {
                token_id: token.id.clone(),
            },
            &token.id,
        );

        self.sign_token(&token, target_app_id).await
    }

    /// Persist a new token document and sign it, optionally attaching an
    /// exchange code for deferred hand-off.
    pub async fn create_and_sign_token(
        &self,
        new: NewToken,
        with_code: bool,
        target_app_id: Option<&str>,
    ) -> Result<IssuedToken, ServiceError> {
        let token = Token::from(new);
        self.store.insert_token(&token).await?;

        let signed = self.sign_token(&token, target_app_id).await?;

        let code = if with_code {
            let code = generate_opaque_token();
            let expires_at = Utc::now() + Duration::seconds(self.timeouts.exchange_code);
            let stored = self
                .store
                .set_exchange_code(&token.id, &Token::hash_secret(&code), expires_at)
                .await?;
            if !stored {
                return Err(ServiceError::TokenTerminated);
            }
            Some(code)
        } else {
            None
        };

        Ok(IssuedToken {
            token,
            signed,
            code,
        })
    }

    /// Trade an exchange code for a freshly signed token. Single use.
    pub async fn redeem_exchange_code(
        &self,
        code: &str,
        target_app_id: Option<&str>,
    ) -> Result<SignedToken, ServiceError> {
        let token = self
            .store
            .redeem_exchange_code(&Token::hash_secret(code), Utc::now())
            .await?
            .ok_or(ServiceError::InvalidExchangeCode)?;

        self.listeners.after(
            &LifecycleEvent::ExchangeCodeRedeemed {
                token_id: token.id.clone(),
            },
            &token.id,
        );

        self.sign_token(&token, target_app_id).await
    }

    fn default_audience(&self, token: &Token) -> Result<String, ServiceError> {
        let mut first = None;
        for entry in &token.permissions {
            let permission = Permission::parse(entry, &self.self_app_id)?;
            if permission.app_id() == self.self_app_id {
                return Ok(self.self_app_id.clone());
            }
            if first.is_none() {
                first = Some(permission.app_id().to_string());
            }
        }
        first.ok_or_else(|| ServiceError::NoPermission(self.self_app_id.clone()))
    }

    async fn check_client_secret(
        &self,
        token: &Token,
        client: &ClientCredentials,
    ) -> Result<(), ServiceError> {
        if token.client_id.as_deref() != Some(client.client_id.as_str()) {
            return Err(ServiceError::InvalidClientSecret);
        }

        let application = self
            .store
            .find_application(&client.client_id)
            .await?
            .ok_or(ServiceError::InvalidClientSecret)?;
        let hash = application
            .secret_hash
            .as_deref()
            .ok_or(ServiceError::InvalidClientSecret)?;

        if !verify_secret(&client.client_secret, hash)? {
            tracing::warn!(client_id = %client.client_id, "Client secret mismatch on refresh");
            return Err(ServiceError::InvalidClientSecret);
        }
        Ok(())
    }

    fn encode(&self, claims: &TokenClaims) -> Result<String, ServiceError> {
        let (kid, key) = self.keys.signing_key()?;
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());

        encode(&header, claims, key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to encode token: {}", e)))
    }
}

fn seconds_until(now: DateTime<Utc>, at: DateTime<Utc>) -> i64 {
    (at - now).num_seconds().max(0)
}
