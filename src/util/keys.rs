use crate::error::{Error, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use curve25519_dalek::{constants, edwards::CompressedEdwardsY, scalar::Scalar, montgomery::MontgomeryPoint};
use sha2::{Digest, Sha512};

/// Elliptic curve key pair for X25519
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ECKeyPair {
    pub private_key: [u8; 32],
    pub public_key: [u8; 32],
}

impl ECKeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut rng = rand::thread_rng();
        let mut private_key = [0u8; 32];
        rng.fill_bytes(&mut private_key);
        
        // Clamp the private key for X25519
        private_key[0] &= 248;
        private_key[31] &= 127;
        private_key[31] |= 64;
        
        // Derive public key using curve25519-dalek
        let scalar = Scalar::from_bytes_mod_order(private_key);
        let public_point = &scalar * &constants::X25519_BASEPOINT;
        let public_key = public_point.to_bytes();
        
        Self {
            private_key,
            public_key,
        }
    }
    
    /// Create from private key bytes
    pub fn from_private_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(Error::Crypto("Private key must be 32 bytes".to_string()));
        }
        
        let mut private_key = [0u8; 32];
        private_key.copy_from_slice(bytes);
        
        // Clamp the private key for X25519
        private_key[0] &= 248;
        private_key[31] &= 127;
        private_key[31] |= 64;
        
        // Derive public key using curve25519-dalek
        let scalar = Scalar::from_bytes_mod_order(private_key);
        let public_point = &scalar * &constants::X25519_BASEPOINT;
        let public_key = public_point.to_bytes();
        
        Ok(Self {
            private_key,
            public_key,
        })
    }
    
    /// Get private key bytes
    pub fn private_bytes(&self) -> [u8; 32] {
        self.private_key
    }
    
    /// Get public key bytes
    pub fn public_bytes(&self) -> [u8; 32] {
        self.public_key
    }
    
    /// Perform ECDH using curve25519-dalek
    pub fn ecdh(&self, other_public: &[u8; 32]) -> [u8; 32] {
        // Create scalar from our private key
        let our_scalar = Scalar::from_bytes_mod_order(self.private_key);
        
        // Create Montgomery point from other party's public key
        let other_point = MontgomeryPoint(*other_public);
        
        // Perform scalar multiplication (ECDH)
        let shared_point = &our_scalar * &other_point;
        
        shared_point.to_bytes()
    }
    
    /// Perform ECDH with raw bytes
    pub fn ecdh_bytes(&self, other_public_bytes: &[u8; 32]) -> Result<[u8; 32]> {
        Ok(self.ecdh(other_public_bytes))
    }
}

/// Convert an Ed25519 public key (Edwards y-coordinate) to its X25519
/// Montgomery-form equivalent via `u = (1+y)/(1-y)`.
pub fn ed25519_public_to_x25519(ed_public: &[u8; 32]) -> Result<[u8; 32]> {
    let point = CompressedEdwardsY(*ed_public)
        .decompress()
        .ok_or_else(|| Error::Crypto("invalid ed25519 public key".to_string()))?;
    Ok(point.to_montgomery().to_bytes())
}

/// Convert an Ed25519 private seed to its X25519 scalar: SHA-512 the seed and
/// clamp the first half, the same expansion `ed25519-dalek` uses internally.
pub fn ed25519_private_to_x25519(ed_seed: &[u8; 32]) -> [u8; 32] {
    let hash = Sha512::digest(ed_seed);
    let mut scalar = [0u8; 32];
    scalar.copy_from_slice(&hash[0..32]);
    scalar[0] &= 248;
    scalar[31] &= 127;
    scalar[31] |= 64;
    scalar
}

/// Ed25519 signing key pair
#[derive(Debug, Clone)]
pub struct SigningKeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl SigningKeyPair {
    /// Generate a new random signing key pair
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut rng = rand::thread_rng();
        let mut secret_key_bytes = [0u8; 32];
        rng.fill_bytes(&mut secret_key_bytes);
        
        let signing_key = SigningKey::from_bytes(&secret_key_bytes);
        let verifying_key = signing_key.verifying_key();
        
        Self {
            signing_key,
            verifying_key,
        }
    }
    
    /// Create from private key bytes
    pub fn from_private_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(Error::Crypto("Signing key must be 32 bytes".to_string()));
        }
        
        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(bytes);
        
        let signing_key = SigningKey::from_bytes(&key_bytes);
        let verifying_key = signing_key.verifying_key();
        
        Ok(Self {
            signing_key,
            verifying_key,
        })
    }
    
    /// Get private key bytes  
    pub fn private_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
    
    /// Get public key bytes
    pub fn public_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }
    
    /// Get access to the signing key
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
    
    /// Get access to the verifying key
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Sign a message, producing a detached 64-byte Ed25519 signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Derive the X25519 keypair corresponding to this Ed25519 identity, for
    /// use as DH material in the ratchet (the identity key itself never
    /// participates in ECDH by reinterpreting its Edwards bytes).
    pub fn to_x25519_keypair(&self) -> Result<ECKeyPair> {
        let private_key = ed25519_private_to_x25519(&self.private_bytes());
        let public_key = ed25519_public_to_x25519(&self.public_bytes())?;
        Ok(ECKeyPair {
            private_key,
            public_key,
        })
    }
}

/// Verify a detached Ed25519 signature against a raw public key.
pub fn verify_signature(public_key: &[u8; 32], message: &[u8], signature: &[u8]) -> Result<()> {
    let verifying_key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| Error::Crypto(format!("invalid verifying key: {}", e)))?;
    let sig_bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| Error::InvalidSignature)?;
    let signature = Signature::from_bytes(&sig_bytes);
    verifying_key
        .verify(message, &signature)
        .map_err(|_| Error::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ec_keypair_generation() {
        let keypair1 = ECKeyPair::generate();
        let keypair2 = ECKeyPair::generate();

        assert_eq!(keypair1.private_bytes().len(), 32);
        assert_eq!(keypair1.public_bytes().len(), 32);
        assert_ne!(keypair1.private_bytes(), keypair2.private_bytes());
        assert_ne!(keypair1.public_bytes(), keypair2.public_bytes());
    }

    #[test]
    fn test_ec_keypair_from_private_bytes() {
        let private_key = [42u8; 32];
        let keypair = ECKeyPair::from_private_bytes(&private_key).unwrap();

        let clamped_private = keypair.private_bytes();
        assert_eq!(clamped_private[0] & 7, 0);
        assert_eq!(clamped_private[31] & 128, 0);
        assert_eq!(clamped_private[31] & 64, 64);
    }

    #[test]
    fn test_ecdh_consistency() {
        let alice = ECKeyPair::generate();
        let bob = ECKeyPair::generate();

        let shared_alice = alice.ecdh(&bob.public_bytes());
        let shared_bob = bob.ecdh(&alice.public_bytes());

        assert_eq!(shared_alice, shared_bob);
    }

    #[test]
    fn test_ecdh_different_keys() {
        let alice = ECKeyPair::generate();
        let bob = ECKeyPair::generate();
        let charlie = ECKeyPair::generate();

        let shared_alice_bob = alice.ecdh(&bob.public_bytes());
        let shared_alice_charlie = alice.ecdh(&charlie.public_bytes());

        assert_ne!(shared_alice_bob, shared_alice_charlie);
    }

    #[test]
    fn test_signing_keypair_generation() {
        let keypair1 = SigningKeyPair::generate();
        let keypair2 = SigningKeyPair::generate();

        assert_eq!(keypair1.private_bytes().len(), 32);
        assert_eq!(keypair1.public_bytes().len(), 32);
        assert_ne!(keypair1.private_bytes(), keypair2.private_bytes());
        assert_ne!(keypair1.public_bytes(), keypair2.public_bytes());
    }

    #[test]
    fn test_signing_keypair_from_private_bytes() {
        let private_key = [1u8; 32];
        let keypair = SigningKeyPair::from_private_bytes(&private_key).unwrap();

        assert_eq!(keypair.private_bytes(), private_key);
        assert_eq!(keypair.public_bytes().len(), 32);
    }

    #[test]
    fn test_invalid_private_key_length() {
        let invalid_key = [1u8; 16];
        assert!(ECKeyPair::from_private_bytes(&invalid_key).is_err());
        assert!(SigningKeyPair::from_private_bytes(&invalid_key).is_err());
    }

    #[test]
    fn test_sign_and_verify() {
        let keypair = SigningKeyPair::generate();
        let message = b"sender key distribution payload";
        let signature = keypair.sign(message);

        verify_signature(&keypair.public_bytes(), message, &signature).unwrap();
    }

    #[test]
    fn test_verify_rejects_tampered_message() {
        let keypair = SigningKeyPair::generate();
        let signature = keypair.sign(b"original");

        assert!(verify_signature(&keypair.public_bytes(), b"tampered", &signature).is_err());
    }

    #[test]
    fn test_ed25519_to_x25519_conversion_agrees_with_ecdh() {
        let alice = SigningKeyPair::generate();
        let bob = SigningKeyPair::generate();

        let alice_x = alice.to_x25519_keypair().unwrap();
        let bob_x = bob.to_x25519_keypair().unwrap();

        assert_eq!(
            ed25519_public_to_x25519(&alice.public_bytes()).unwrap(),
            alice_x.public_bytes()
        );

        let shared_alice = alice_x.ecdh(&bob_x.public_bytes());
        let shared_bob = bob_x.ecdh(&alice_x.public_bytes());
        assert_eq!(shared_alice, shared_bob);
    }
}