//! Signing keys: key pairs, public-key digest (`publicKeyID`), DER and PEM encodings.

use std::fmt;

use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Key strength accepted by [`Key::generate`].
pub const KEY_BITS: usize = 256;

/// Length of a `publicKeyID` (SHA-256).
pub const KEY_ID_LEN: usize = 32;

const PRIVATE_PEM_TAG: &str = "PRIVATE KEY";
const PUBLIC_PEM_TAG: &str = "PUBLIC KEY";

/// Public key digest. Pure function of the public key encoding.
pub type PublicKeyId = [u8; KEY_ID_LEN];

/// Asymmetric key. Public material is always present; private material is optional.
#[derive(Clone)]
pub struct Key {
    public: VerifyingKey,
    private: Option<SigningKey>,
    public_der: Vec<u8>,
    public_key_id: PublicKeyId,
}

/// SHA-256 of `bytes`. Used for key IDs, signing digests and implicit digest components.
pub fn digest(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

impl Key {
    /// Generate a new key pair. Only [`KEY_BITS`] is a valid strength.
    pub fn generate(bits: usize) -> Result<Self, KeyError> {
        if bits != KEY_BITS {
            return Err(KeyError::Generation(format!(
                "unsupported key size {} bits, expected {}",
                bits, KEY_BITS
            )));
        }
        let mut seed = [0u8; SECRET_KEY_LENGTH];
        OsRng
            .try_fill_bytes(&mut seed)
            .map_err(|e| KeyError::Generation(format!("entropy source failed: {}", e)))?;
        Self::from_signing_key(SigningKey::from_bytes(&seed))
    }

    fn from_signing_key(private: SigningKey) -> Result<Self, KeyError> {
        let mut key = Self::from_verifying_key(private.verifying_key())?;
        key.private = Some(private);
        Ok(key)
    }

    fn from_verifying_key(public: VerifyingKey) -> Result<Self, KeyError> {
        let public_der = public
            .to_public_key_der()
            .map_err(|e| KeyError::Encoding(e.to_string()))?
            .into_vec();
        let public_key_id = digest(&public_der);
        Ok(Self {
            public,
            private: None,
            public_der,
            public_key_id,
        })
    }

    pub fn from_private_der(der: &[u8]) -> Result<Self, KeyError> {
        let private =
            SigningKey::from_pkcs8_der(der).map_err(|e| KeyError::Encoding(e.to_string()))?;
        Self::from_signing_key(private)
    }

    pub fn from_public_der(der: &[u8]) -> Result<Self, KeyError> {
        let public =
            VerifyingKey::from_public_key_der(der).map_err(|e| KeyError::Encoding(e.to_string()))?;
        Self::from_verifying_key(public)
    }

    pub fn from_private_pem(text: &str) -> Result<Self, KeyError> {
        let der = parse_pem(text, PRIVATE_PEM_TAG)?;
        Self::from_private_der(&der)
    }

    pub fn from_public_pem(text: &str) -> Result<Self, KeyError> {
        let der = parse_pem(text, PUBLIC_PEM_TAG)?;
        Self::from_public_der(&der)
    }

    pub fn public_key_id(&self) -> &PublicKeyId {
        &self.public_key_id
    }

    pub fn has_private(&self) -> bool {
        self.private.is_some()
    }

    /// Public-only copy of this key.
    pub fn to_public(&self) -> Key {
        Key {
            private: None,
            ..self.clone()
        }
    }

    pub fn public_to_der(&self) -> &[u8] {
        &self.public_der
    }

    pub fn private_to_der(&self) -> Result<Vec<u8>, KeyError> {
        let private = self.private.as_ref().ok_or(KeyError::NoPrivateKey)?;
        let doc = private
            .to_pkcs8_der()
            .map_err(|e| KeyError::Encoding(e.to_string()))?;
        Ok(doc.as_bytes().to_vec())
    }

    pub fn public_to_pem(&self) -> String {
        pem::encode(&pem::Pem::new(PUBLIC_PEM_TAG, self.public_der.clone()))
    }

    pub fn private_to_pem(&self) -> Result<String, KeyError> {
        let der = self.private_to_der()?;
        Ok(pem::encode(&pem::Pem::new(PRIVATE_PEM_TAG, der)))
    }

    /// Sign `msg`. Fails without private material.
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, KeyError> {
        let private = self.private.as_ref().ok_or(KeyError::NoPrivateKey)?;
        Ok(private.sign(msg).to_bytes().to_vec())
    }

    /// Check a signature produced by [`Key::sign`].
    pub fn verify(&self, msg: &[u8], signature: &[u8]) -> bool {
        match Signature::from_slice(signature) {
            Ok(sig) => self.public.verify(msg, &sig).is_ok(),
            Err(_) => false,
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.public_key_id == other.public_key_id
    }
}

impl Eq for Key {}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("public_key_id", &hex_string(&self.public_key_id))
            .field("private", &self.private.is_some())
            .finish()
    }
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn parse_pem(text: &str, tag: &str) -> Result<Vec<u8>, KeyError> {
    let parsed = pem::parse(text).map_err(|e| KeyError::Encoding(e.to_string()))?;
    if parsed.tag() != tag {
        return Err(KeyError::Encoding(format!(
            "unexpected PEM tag {}, expected {}",
            parsed.tag(),
            tag
        )));
    }
    Ok(parsed.into_contents())
}

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key has no private material")]
    NoPrivateKey,
    #[error("key generation failed: {0}")]
    Generation(String),
    #[error("key encoding error: {0}")]
    Encoding(String),
}
