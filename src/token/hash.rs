use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256, Sha384, Sha512};
use tracing::debug;

use crate::token::TokenError;

/// `at_hash` for an access token id.
///
/// Left half of the digest matching the signing algorithm, base64url without
/// padding. With "none" there is nothing to bind to, so the raw id is encoded.
pub fn access_token_hash(access_token_id: &str, signing_alg: &str) -> Result<String, TokenError> {
    let bytes = access_token_id.as_bytes();

    if signing_alg.eq_ignore_ascii_case("none") {
        debug!("unsigned id token; at_hash is the encoded token id");
        return Ok(URL_SAFE_NO_PAD.encode(bytes));
    }

    let digest = match signing_alg.to_ascii_uppercase().as_str() {
        "RS256" => Sha256::digest(bytes).to_vec(),
        "RS384" => Sha384::digest(bytes).to_vec(),
        "RS512" => Sha512::digest(bytes).to_vec(),
        _ => {
            return Err(TokenError::UnsupportedSigningAlgorithm(
                signing_alg.to_string(),
            ));
        }
    };

    Ok(URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2]))
}
