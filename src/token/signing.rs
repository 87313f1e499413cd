use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use josekit::jwe::{JweHeader, RSA_OAEP_256};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::registered_service::RegisteredService;
use crate::token::TokenError;

/// Content encryption for encrypted ID tokens.
const CONTENT_ENCRYPTION: &str = "A128CBC-HS256";

/// Turns an assembled claims set into the serialized token for one service.
pub trait IdTokenSigningAndEncryptionService: Send + Sync {
    /// JWS algorithm the token for `service` will carry ("none" when unsigned).
    fn signing_algorithm(&self, service: &RegisteredService) -> String;

    fn encode(
        &self,
        claims: &Map<String, Value>,
        service: &RegisteredService,
    ) -> Result<String, TokenError>;
}

/// Signs with the server RSA key and, when the service publishes a key,
/// encrypts the signed token to it (nested JWT).
#[derive(Clone)]
pub struct JwtIdTokenSigner {
    encoding_key: Option<EncodingKey>,
    key_id: Option<String>,
    default_alg: String,
}

impl std::fmt::Debug for JwtIdTokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtIdTokenSigner")
            .field("has_key", &self.encoding_key.is_some())
            .field("key_id", &self.key_id)
            .field("default_alg", &self.default_alg)
            .finish()
    }
}

impl JwtIdTokenSigner {
    /// `private_key_pem` must be an RSA private key (PKCS#1 or PKCS#8 PEM).
    pub fn new(
        private_key_pem: &str,
        key_id: Option<String>,
        default_alg: impl Into<String>,
    ) -> Result<Self, TokenError> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes()).map_err(|e| {
            warn!(error = %e, "failed to parse id token signing key PEM (expected RSA PEM)");
            TokenError::Signing(e.to_string())
        })?;

        Ok(Self {
            encoding_key: Some(encoding_key),
            key_id,
            default_alg: default_alg.into(),
        })
    }

    /// Signer without key material; only produces unsecured tokens.
    pub fn unsigned() -> Self {
        Self {
            encoding_key: None,
            key_id: None,
            default_alg: "none".to_string(),
        }
    }

    fn sign(&self, claims: &Map<String, Value>, alg: &str) -> Result<String, TokenError> {
        if alg.eq_ignore_ascii_case("none") {
            return unsecured_jwt(claims);
        }

        let algorithm = match alg.to_ascii_uppercase().as_str() {
            "RS256" => Algorithm::RS256,
            "RS384" => Algorithm::RS384,
            "RS512" => Algorithm::RS512,
            _ => return Err(TokenError::UnsupportedSigningAlgorithm(alg.to_string())),
        };
        let key = self
            .encoding_key
            .as_ref()
            .ok_or_else(|| TokenError::Signing("no signing key configured".to_string()))?;

        let mut header = Header::new(algorithm);
        header.typ = Some("JWT".to_string());
        header.kid = self.key_id.clone();
        jsonwebtoken::encode(&header, claims, key).map_err(|e| {
            error!(error = %e, "failed to sign id token");
            TokenError::Signing(e.to_string())
        })
    }
}

impl IdTokenSigningAndEncryptionService for JwtIdTokenSigner {
    fn signing_algorithm(&self, service: &RegisteredService) -> String {
        match service.oidc() {
            Some(oidc) if !oidc.sign_id_token => "none".to_string(),
            Some(oidc) if !oidc.id_token_signing_alg.is_empty() => {
                oidc.id_token_signing_alg.clone()
            }
            _ => self.default_alg.clone(),
        }
    }

    fn encode(
        &self,
        claims: &Map<String, Value>,
        service: &RegisteredService,
    ) -> Result<String, TokenError> {
        let alg = self.signing_algorithm(service);
        let signed = self.sign(claims, &alg)?;

        let Some(pem) = service
            .oidc()
            .and_then(|o| o.id_token_encryption_key_pem.as_deref())
        else {
            return Ok(signed);
        };

        debug!(service = %service.service_id, "encrypting id token");
        encrypt(&signed, pem)
    }
}

/// `alg: none` JWT: header and payload, empty signature.
fn unsecured_jwt(claims: &Map<String, Value>) -> Result<String, TokenError> {
    let header = serde_json::json!({ "alg": "none", "typ": "JWT" });
    let header = serde_json::to_vec(&header).map_err(|e| TokenError::Signing(e.to_string()))?;
    let payload = serde_json::to_vec(claims).map_err(|e| TokenError::Signing(e.to_string()))?;
    Ok(format!(
        "{}.{}.",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(payload)
    ))
}

fn encrypt(signed: &str, public_key_pem: &str) -> Result<String, TokenError> {
    let encrypter = RSA_OAEP_256
        .encrypter_from_pem(public_key_pem)
        .map_err(|e| TokenError::Encryption(e.to_string()))?;

    let mut header = JweHeader::new();
    header.set_token_type("JWT");
    header.set_content_type("JWT");
    header.set_content_encryption(CONTENT_ENCRYPTION);

    josekit::jwe::serialize_compact(signed.as_bytes(), &header, &encrypter).map_err(|e| {
        error!(error = %e, "failed to encrypt id token");
        TokenError::Encryption(e.to_string())
    })
}
