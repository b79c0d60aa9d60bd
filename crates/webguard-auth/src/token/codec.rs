//! Compact JWT signing and verification.
//!
//! HMAC, RSA, P-256, P-384 and Ed25519 keys go through `jsonwebtoken`.
//! secp256k1 (ES256K) and P-521 (ES512) are not implemented there, so the
//! codec produces and checks the compact JWS for them itself with the
//! RustCrypto signers.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use elliptic_curve::sec1::ToEncodedPoint;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use pkcs8::{EncodePrivateKey, LineEnding};
use rsa::pkcs8::EncodePublicKey;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use signature::{Signer, Verifier};

use crate::AuthResult;
use crate::error::AuthError;
use crate::token::keys::{KeyMaterial, SigningAlgorithm};

enum Backend {
    Jwt {
        algorithm: Algorithm,
        encoding: EncodingKey,
        decoding: DecodingKey,
    },
    Es256k {
        signing: k256::ecdsa::SigningKey,
        verifying: k256::ecdsa::VerifyingKey,
    },
    Es512 {
        signing: p521::ecdsa::SigningKey,
        verifying: p521::ecdsa::VerifyingKey,
    },
}

/// Signs payloads into compact JWTs and verifies them back.
///
/// Verification checks the signature and that the header names this codec's
/// algorithm. Expiry is left to the caller.
pub struct TokenCodec {
    algorithm: SigningAlgorithm,
    backend: Backend,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Builds a codec for `key`, checking `requested` against the algorithm
    /// the key derives.
    ///
    /// # Errors
    /// Returns a configuration error on an algorithm mismatch or when the key
    /// cannot be used for signing.
    pub fn new(key: &KeyMaterial, requested: Option<SigningAlgorithm>) -> AuthResult<Self> {
        let algorithm = key.resolve_algorithm(requested)?;
        let backend = match key {
            KeyMaterial::Secret(secret) => Backend::Jwt {
                algorithm: jwt_algorithm(algorithm)?,
                encoding: EncodingKey::from_secret(secret),
                decoding: DecodingKey::from_secret(secret),
            },
            KeyMaterial::Rsa(private) => {
                let private_pem = private
                    .to_pkcs8_pem(LineEnding::LF)
                    .map_err(|e| AuthError::configuration(e.to_string()))?;
                let public_pem = private
                    .to_public_key()
                    .to_public_key_pem(LineEnding::LF)
                    .map_err(|e| AuthError::configuration(e.to_string()))?;
                Backend::Jwt {
                    algorithm: jwt_algorithm(algorithm)?,
                    encoding: EncodingKey::from_rsa_pem(private_pem.as_bytes())?,
                    decoding: DecodingKey::from_rsa_pem(public_pem.as_bytes())?,
                }
            }
            KeyMaterial::P256(secret) => {
                let private_pem = secret
                    .to_pkcs8_pem(LineEnding::LF)
                    .map_err(|e| AuthError::configuration(e.to_string()))?;
                let point = secret.public_key().to_encoded_point(false);
                Backend::Jwt {
                    algorithm: jwt_algorithm(algorithm)?,
                    encoding: EncodingKey::from_ec_pem(private_pem.as_bytes())?,
                    decoding: ec_decoding_key(point.as_bytes())?,
                }
            }
            KeyMaterial::P384(secret) => {
                let private_pem = secret
                    .to_pkcs8_pem(LineEnding::LF)
                    .map_err(|e| AuthError::configuration(e.to_string()))?;
                let point = secret.public_key().to_encoded_point(false);
                Backend::Jwt {
                    algorithm: jwt_algorithm(algorithm)?,
                    encoding: EncodingKey::from_ec_pem(private_pem.as_bytes())?,
                    decoding: ec_decoding_key(point.as_bytes())?,
                }
            }
            KeyMaterial::Ed25519(signing) => {
                let private_pem = signing
                    .to_pkcs8_pem(LineEnding::LF)
                    .map_err(|e| AuthError::configuration(e.to_string()))?;
                let x = URL_SAFE_NO_PAD.encode(signing.verifying_key().as_bytes());
                Backend::Jwt {
                    algorithm: jwt_algorithm(algorithm)?,
                    encoding: EncodingKey::from_ed_pem(private_pem.as_bytes())?,
                    decoding: DecodingKey::from_ed_components(&x)?,
                }
            }
            KeyMaterial::K256(secret) => {
                let signing = k256::ecdsa::SigningKey::from(secret);
                let verifying = signing.verifying_key().clone();
                Backend::Es256k { signing, verifying }
            }
            KeyMaterial::P521(secret) => {
                let signing = p521::ecdsa::SigningKey::from_bytes(&secret.to_bytes())
                    .map_err(|e| AuthError::configuration(format!("Invalid P-521 key: {e}")))?;
                let verifying = p521::ecdsa::VerifyingKey::from_sec1_bytes(
                    secret.public_key().to_encoded_point(false).as_bytes(),
                )
                .map_err(|e| AuthError::configuration(format!("Invalid P-521 key: {e}")))?;
                Backend::Es512 { signing, verifying }
            }
            KeyMaterial::Ed448 => {
                return Err(AuthError::configuration(
                    "Ed448 keys derive EdDSA, but signing with Ed448 is not supported",
                ));
            }
        };

        Ok(Self { algorithm, backend })
    }

    /// Convenience constructor classifying raw secret or PEM bytes.
    ///
    /// # Errors
    /// See [`KeyMaterial::detect`] and [`TokenCodec::new`].
    pub fn from_bytes(bytes: &[u8], requested: Option<SigningAlgorithm>) -> AuthResult<Self> {
        Self::new(&KeyMaterial::detect(bytes)?, requested)
    }

    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// Signs `claims` into a compact JWT.
    ///
    /// # Errors
    /// Returns an internal error if the claims cannot be serialized or signed.
    pub fn encode<T: Serialize>(&self, claims: &T) -> AuthResult<String> {
        match &self.backend {
            Backend::Jwt {
                algorithm,
                encoding,
                ..
            } => jsonwebtoken::encode(&Header::new(*algorithm), claims, encoding)
                .map_err(|e| AuthError::internal(format!("Failed to encode token: {e}"))),
            Backend::Es256k { signing, .. } => self.encode_compact(claims, |input| {
                let signature: k256::ecdsa::Signature = signing.sign(input);
                signature.to_bytes().to_vec()
            }),
            Backend::Es512 { signing, .. } => self.encode_compact(claims, |input| {
                let signature: p521::ecdsa::Signature = signing.sign(input);
                signature.to_bytes().to_vec()
            }),
        }
    }

    /// Verifies `token` and deserializes its payload. Expiry is not checked.
    ///
    /// # Errors
    /// Returns an invalid-token error for malformed tokens, bad signatures and
    /// tokens whose header names another algorithm.
    pub fn decode<T: DeserializeOwned>(&self, token: &str) -> AuthResult<T> {
        match &self.backend {
            Backend::Jwt {
                algorithm,
                decoding,
                ..
            } => {
                let mut validation = Validation::new(*algorithm);
                validation.validate_exp = false;
                validation.validate_aud = false;
                validation.required_spec_claims.clear();

                let data = jsonwebtoken::decode::<T>(token, decoding, &validation)?;
                Ok(data.claims)
            }
            Backend::Es256k { verifying, .. } => self.decode_compact(token, |input, raw| {
                k256::ecdsa::Signature::from_slice(raw)
                    .is_ok_and(|signature| verifying.verify(input, &signature).is_ok())
            }),
            Backend::Es512 { verifying, .. } => self.decode_compact(token, |input, raw| {
                p521::ecdsa::Signature::from_slice(raw)
                    .is_ok_and(|signature| verifying.verify(input, &signature).is_ok())
            }),
        }
    }

    fn encode_compact<T: Serialize>(
        &self,
        claims: &T,
        sign: impl FnOnce(&[u8]) -> Vec<u8>,
    ) -> AuthResult<String> {
        let header = CompactHeader {
            alg: self.algorithm.as_str().to_string(),
            typ: Some("JWT".to_string()),
        };
        let header = serde_json::to_vec(&header)
            .map_err(|e| AuthError::internal(format!("Failed to encode token header: {e}")))?;
        let payload = serde_json::to_vec(claims)
            .map_err(|e| AuthError::internal(format!("Failed to encode token: {e}")))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let signature = sign(signing_input.as_bytes());
        Ok(format!(
            "{signing_input}.{}",
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    fn decode_compact<T: DeserializeOwned>(
        &self,
        token: &str,
        verify: impl FnOnce(&[u8], &[u8]) -> bool,
    ) -> AuthResult<T> {
        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::invalid_token("Token is not a compact JWS"));
        };

        let parsed: CompactHeader = serde_json::from_slice(&base64_decode(header)?)
            .map_err(|e| AuthError::invalid_token(format!("Invalid token header: {e}")))?;
        if parsed.alg != self.algorithm.as_str() {
            return Err(AuthError::invalid_token(format!(
                "Token algorithm {} is not allowed",
                parsed.alg
            )));
        }

        let signing_input = &token[..header.len() + 1 + payload.len()];
        if !verify(signing_input.as_bytes(), &base64_decode(signature)?) {
            return Err(AuthError::invalid_token("Invalid signature"));
        }

        serde_json::from_slice(&base64_decode(payload)?)
            .map_err(|e| AuthError::invalid_token(format!("Invalid token payload: {e}")))
    }
}

#[derive(Serialize, Deserialize)]
struct CompactHeader {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

fn base64_decode(segment: &str) -> AuthResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AuthError::invalid_token(format!("Invalid base64 segment: {e}")))
}

fn jwt_algorithm(algorithm: SigningAlgorithm) -> AuthResult<Algorithm> {
    algorithm.to_jwt_algorithm().ok_or_else(|| {
        AuthError::configuration(format!("Algorithm {algorithm} needs a dedicated signer"))
    })
}

// `uncompressed` is the SEC1 encoding 0x04 || x || y.
fn ec_decoding_key(uncompressed: &[u8]) -> AuthResult<DecodingKey> {
    let coordinates = uncompressed
        .strip_prefix(&[0x04])
        .ok_or_else(|| AuthError::configuration("EC public key is not uncompressed"))?;
    let (x, y) = coordinates.split_at(coordinates.len() / 2);
    Ok(DecodingKey::from_ec_components(
        &URL_SAFE_NO_PAD.encode(x),
        &URL_SAFE_NO_PAD.encode(y),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Claims {
        sub: String,
        exp: i64,
    }

    fn claims() -> Claims {
        Claims {
            sub: "u1".to_string(),
            exp: 1, // long expired; the codec does not check it
        }
    }

    fn assert_round_trip(codec: &TokenCodec) {
        let token = codec.encode(&claims()).unwrap();
        assert_eq!(token.split('.').count(), 3);
        let decoded: Claims = codec.decode(&token).unwrap();
        assert_eq!(decoded, claims());
    }

    fn header_alg(token: &str) -> String {
        let header = token.split('.').next().unwrap();
        let header: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header).unwrap()).unwrap();
        header["alg"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_hmac_round_trip() {
        let codec = TokenCodec::from_bytes(&[7u8; 64], None).unwrap();
        assert_eq!(codec.algorithm(), SigningAlgorithm::HS512);
        assert_round_trip(&codec);
        assert_eq!(header_alg(&codec.encode(&claims()).unwrap()), "HS512");
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let signer = TokenCodec::from_bytes(b"first-secret-value-of-some-length", None).unwrap();
        let verifier = TokenCodec::from_bytes(b"other-secret-value-of-some-length", None).unwrap();

        let token = signer.encode(&claims()).unwrap();
        let err = verifier.decode::<Claims>(&token).unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken { .. }));
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let codec = TokenCodec::from_bytes(&[3u8; 32], None).unwrap();
        let token = codec.encode(&claims()).unwrap();

        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        parts[1] = URL_SAFE_NO_PAD.encode(json!({"sub": "admin", "exp": 1}).to_string());
        assert!(codec.decode::<Claims>(&parts.join(".")).is_err());
    }

    #[test]
    fn test_other_hmac_strength_is_rejected() {
        let hs384 = TokenCodec::from_bytes(&[5u8; 48], None).unwrap();
        let hs256 = TokenCodec::from_bytes(&[5u8; 32], None).unwrap();

        let token = hs384.encode(&claims()).unwrap();
        assert!(hs256.decode::<Claims>(&token).is_err());
    }

    #[test]
    fn test_requested_algorithm_mismatch() {
        let err = TokenCodec::from_bytes(&[1u8; 32], Some(SigningAlgorithm::HS512)).unwrap_err();
        assert!(err.to_string().contains("Expected algorithm HS256, but got HS512"));
    }

    #[test]
    fn test_rsa_round_trip() {
        let key = rsa::RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let codec = TokenCodec::new(&KeyMaterial::Rsa(Box::new(key)), None).unwrap();
        assert_eq!(codec.algorithm(), SigningAlgorithm::RS256);
        assert_round_trip(&codec);
    }

    #[test]
    fn test_ec_round_trips() {
        let keys = [
            KeyMaterial::P256(p256::SecretKey::random(&mut OsRng)),
            KeyMaterial::K256(k256::SecretKey::random(&mut OsRng)),
            KeyMaterial::P384(p384::SecretKey::random(&mut OsRng)),
            KeyMaterial::P521(p521::SecretKey::random(&mut OsRng)),
        ];
        for key in &keys {
            let codec = TokenCodec::new(key, None).unwrap();
            assert_round_trip(&codec);
            assert_eq!(
                header_alg(&codec.encode(&claims()).unwrap()),
                key.algorithm().as_str()
            );
        }
    }

    #[test]
    fn test_ed25519_round_trip() {
        let key = KeyMaterial::Ed25519(ed25519_dalek::SigningKey::generate(&mut OsRng));
        let codec = TokenCodec::new(&key, None).unwrap();
        assert_eq!(codec.algorithm(), SigningAlgorithm::EdDSA);
        assert_round_trip(&codec);
    }

    #[test]
    fn test_ed448_cannot_sign() {
        let err = TokenCodec::new(&KeyMaterial::Ed448, None).unwrap_err();
        assert!(matches!(err, AuthError::Configuration { .. }));
    }

    #[test]
    fn test_es256k_rejects_foreign_key_and_algorithm() {
        let signer =
            TokenCodec::new(&KeyMaterial::K256(k256::SecretKey::random(&mut OsRng)), None).unwrap();
        let other =
            TokenCodec::new(&KeyMaterial::K256(k256::SecretKey::random(&mut OsRng)), None).unwrap();

        let token = signer.encode(&claims()).unwrap();
        let err = other.decode::<Claims>(&token).unwrap_err();
        assert_eq!(err.to_string(), "Invalid token: Invalid signature");

        let hmac = TokenCodec::from_bytes(&[1u8; 32], None).unwrap();
        let hs_token = hmac.encode(&claims()).unwrap();
        let err = signer.decode::<Claims>(&hs_token).unwrap_err();
        assert!(err.to_string().contains("HS256 is not allowed"));

        assert!(signer.decode::<Claims>("only.two").is_err());
    }
}
