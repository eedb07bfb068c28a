use crate::error::{Error, Result};
use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use ring::digest;
use sha2::Sha256;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// HKDF-SHA256 key derivation, with an explicit salt (the Signal protocol's
/// root-key derivation requires a 32-zero-byte salt rather than HKDF's
/// default empty salt).
pub fn hkdf_expand_with_salt(salt: &[u8], key: &[u8], info: &[u8], length: usize) -> Result<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), key);
    let mut output = vec![0u8; length];
    hk.expand(info, &mut output)
        .map_err(|e| Error::Crypto(format!("HKDF expansion failed: {}", e)))?;
    Ok(output)
}

/// HKDF-SHA256 key derivation using the Signal protocol's conventional
/// 32-zero-byte salt.
pub fn hkdf_expand(key: &[u8], info: &[u8], length: usize) -> Result<Vec<u8>> {
    hkdf_expand_with_salt(&[0u8; 32], key, info, length)
}

/// HMAC-SHA256 over `data` keyed by `key`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Crypto(format!("HMAC key error: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// HMAC-SHA256 truncated to 8 bytes, as used for Signal message MACs.
pub fn hmac_sha256_truncated(key: &[u8], data: &[u8], truncate_to: usize) -> Result<Vec<u8>> {
    let full = hmac_sha256(key, data)?;
    Ok(full[..truncate_to].to_vec())
}

/// Constant-time comparison, used to compare MACs without leaking timing
/// information about the position of the first mismatch.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// AES-256-CBC encrypt with PKCS#7 padding.
pub fn aes_cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    if key.len() != 32 || iv.len() != 16 {
        return Err(Error::Crypto("AES-CBC requires a 32-byte key and 16-byte IV".to_string()));
    }
    let enc = Aes256CbcEnc::new(key.into(), iv.into());
    Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

/// AES-256-CBC decrypt, stripping PKCS#7 padding.
pub fn aes_cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if key.len() != 32 || iv.len() != 16 {
        return Err(Error::Crypto("AES-CBC requires a 32-byte key and 16-byte IV".to_string()));
    }
    let dec = Aes256CbcDec::new(key.into(), iv.into());
    dec.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|e| Error::Crypto(format!("AES-CBC decrypt failed: {}", e)))
}

/// SHA-256 hash.
pub fn sha256(data: &[u8]) -> Vec<u8> {
    digest::digest(&digest::SHA256, data).as_ref().to_vec()
}

/// Generate cryptographically secure random bytes.
pub fn random_bytes(length: usize) -> Vec<u8> {
    use ring::rand::{SecureRandom, SystemRandom};

    let rng = SystemRandom::new();
    let mut bytes = vec![0u8; length];
    rng.fill(&mut bytes).expect("system RNG failure");
    bytes
}

/// Generate a random 32-byte symmetric key.
pub fn generate_key() -> Vec<u8> {
    random_bytes(32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256() {
        let input = b"hello world";
        let hash = sha256(input);
        assert_eq!(hash.len(), 32);
        assert_ne!(hash, [0u8; 32]);
    }

    #[test]
    fn test_hkdf_expand() {
        let ikm = b"input key material";
        let result = hkdf_expand(ikm, b"info", 32).unwrap();
        assert_eq!(result.len(), 32);
        assert_ne!(result, vec![0u8; 32]);
    }

    #[test]
    fn test_hmac_sha256_truncated() {
        let key = [1u8; 32];
        let mac = hmac_sha256_truncated(&key, b"body", 8).unwrap();
        assert_eq!(mac.len(), 8);
        let mac2 = hmac_sha256_truncated(&key, b"body", 8).unwrap();
        assert_eq!(mac, mac2);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[test]
    fn test_aes_cbc_roundtrip() {
        let key = [7u8; 32];
        let iv = [9u8; 16];
        let plaintext = b"some plaintext that needs padding";

        let ciphertext = aes_cbc_encrypt(&key, &iv, plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);

        let decrypted = aes_cbc_decrypt(&key, &iv, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_aes_cbc_wrong_key_fails_or_mismatches() {
        let key1 = [1u8; 32];
        let key2 = [2u8; 32];
        let iv = [3u8; 16];
        let plaintext = b"secret message";

        let ciphertext = aes_cbc_encrypt(&key1, &iv, plaintext).unwrap();
        let result = aes_cbc_decrypt(&key2, &iv, &ciphertext);
        assert!(result.is_err() || result.unwrap() != plaintext);
    }

    #[test]
    fn test_generate_key() {
        let key1 = generate_key();
        let key2 = generate_key();
        assert_eq!(key1.len(), 32);
        assert_eq!(key2.len(), 32);
        assert_ne!(key1, key2);
    }
}
