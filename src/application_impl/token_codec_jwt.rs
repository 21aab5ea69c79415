use crate::application_port::{TokenCodec, TokenError, TokenTtl};
use crate::domain_model::*;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Clone)]
pub struct JwtConfig {
    pub access_secret: Vec<u8>,
    pub refresh_secret: Vec<u8>,
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn from_secret(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

/// HS256 codec with separate keys for access and refresh tokens.
pub struct JwtHs256Codec {
    access: KeyPair,
    refresh: KeyPair,
    validation: Validation,
}

impl JwtHs256Codec {
    pub fn new(cfg: JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "iat"]);

        JwtHs256Codec {
            access: KeyPair::from_secret(&cfg.access_secret),
            refresh: KeyPair::from_secret(&cfg.refresh_secret),
            validation,
        }
    }

    fn sign<T: Serialize>(claims: &T, key: &EncodingKey) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    fn open<T: DeserializeOwned>(&self, token: &str, key: &DecodingKey) -> Result<T, TokenError> {
        decode::<T>(token, key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::InvalidToken,
            })
    }

    #[inline]
    fn gen_jti() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

impl TokenCodec for JwtHs256Codec {
    fn issue_token_pair(
        &self,
        subject: UserId,
        roles: &[String],
        permissions: &[String],
        ttl: &TokenTtl,
    ) -> Result<TokenPair, TokenError> {
        let (access_token, access_exp) =
            self.issue_access_token(subject, roles, permissions, ttl.access)?;

        let iat = Utc::now();
        let refresh_exp = iat + ttl.refresh;
        let claims = RefreshClaims {
            id: subject,
            token_type: TokenType::Refresh,
            exp: refresh_exp.timestamp(),
            iat: iat.timestamp(),
            jti: Self::gen_jti(),
        };
        let refresh_token = RefreshToken(Self::sign(&claims, &self.refresh.encoding)?);

        Ok(TokenPair {
            access_token,
            refresh_token,
            access_token_expires_at: access_exp,
            refresh_token_expires_at: refresh_exp,
        })
    }

    fn issue_access_token(
        &self,
        subject: UserId,
        roles: &[String],
        permissions: &[String],
        ttl: Duration,
    ) -> Result<(AccessToken, DateTime<Utc>), TokenError> {
        let iat = Utc::now();
        let exp = iat + ttl;
        let claims = AccessClaims {
            id: subject,
            roles: roles.to_vec(),
            permissions: permissions.to_vec(),
            token_type: TokenType::Access,
            exp: exp.timestamp(),
            iat: iat.timestamp(),
        };
        let token = Self::sign(&claims, &self.access.encoding)?;
        Ok((AccessToken(token), exp))
    }

    fn verify_token(
        &self,
        token: &str,
        expected: TokenType,
    ) -> Result<VerifiedClaims, TokenError> {
        match expected {
            TokenType::Access => {
                let claims: AccessClaims = self.open(token, &self.access.decoding)?;
                if claims.token_type != TokenType::Access {
                    return Err(TokenError::WrongType);
                }
                Ok(VerifiedClaims::Access(claims))
            }
            TokenType::Refresh => {
                let claims: RefreshClaims = self.open(token, &self.refresh.decoding)?;
                if claims.token_type != TokenType::Refresh {
                    return Err(TokenError::WrongType);
                }
                Ok(VerifiedClaims::Refresh(claims))
            }
        }
    }
}
