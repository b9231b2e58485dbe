use std::path::Path;

use aes::Aes256;
use byteorder::{BigEndian, ByteOrder};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use rsa::pkcs8::{
    DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding,
};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{Error, Result};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

pub const AES_KEY_SIZE: usize = 32;
pub const IV_SIZE: usize = 16;
pub const RSA_KEY_BITS: usize = 2048;

/// Fresh 2048-bit RSA keypair.
pub fn generate_keypair() -> Result<(RsaPrivateKey, RsaPublicKey)> {
    let mut rng = rand::thread_rng();
    let private = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
        .map_err(|e| Error::Key(format!("keypair generation failed: {e}")))?;
    let public = RsaPublicKey::from(&private);
    info!("generated RSA keypair ({RSA_KEY_BITS} bits)");
    Ok((private, public))
}

/// Seal `plaintext` for the holder of `recipient`'s private key.
///
/// A fresh AES-256 key and IV encrypt the body (CBC, PKCS#7); the key is
/// wrapped with RSA-OAEP. Wire form:
/// `[wrapped_key_len:2 BE][wrapped_key][iv:16][ciphertext]`.
pub fn seal(plaintext: &[u8], recipient: &RsaPublicKey) -> Result<Vec<u8>> {
    let mut rng = rand::thread_rng();
    let mut key = [0u8; AES_KEY_SIZE];
    rng.fill_bytes(&mut key);
    let mut iv = [0u8; IV_SIZE];
    rng.fill_bytes(&mut iv);

    let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let wrapped = recipient
        .encrypt(&mut rng, Oaep::new::<Sha256>(), &key)
        .map_err(|e| Error::Key(format!("key wrap failed: {e}")))?;

    let mut out = Vec::with_capacity(2 + wrapped.len() + IV_SIZE + ciphertext.len());
    let mut len = [0u8; 2];
    BigEndian::write_u16(&mut len, wrapped.len() as u16);
    out.extend_from_slice(&len);
    out.extend_from_slice(&wrapped);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);

    debug!("sealed {} bytes into {} bytes", plaintext.len(), out.len());
    Ok(out)
}

/// Inverse of [`seal`].
pub fn open(data: &[u8], private: &RsaPrivateKey) -> Result<Vec<u8>> {
    if data.len() < 2 {
        return Err(Error::BadCiphertext("truncated header"));
    }
    let wrapped_len = BigEndian::read_u16(&data[..2]) as usize;
    let rest = &data[2..];
    if rest.len() < wrapped_len + IV_SIZE {
        return Err(Error::BadCiphertext("truncated key or IV"));
    }
    let wrapped = &rest[..wrapped_len];
    let iv = &rest[wrapped_len..wrapped_len + IV_SIZE];
    let ciphertext = &rest[wrapped_len + IV_SIZE..];
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(Error::BadCiphertext(
            "ciphertext is not a positive multiple of the block size",
        ));
    }

    let key = private
        .decrypt(Oaep::new::<Sha256>(), wrapped)
        .map_err(|_| Error::AuthFailure)?;
    if key.len() != AES_KEY_SIZE {
        return Err(Error::AuthFailure);
    }

    let plaintext = Aes256CbcDec::new_from_slices(&key, iv)
        .map_err(|_| Error::BadCiphertext("bad IV length"))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| Error::BadCiphertext("padding verification failed"))?;

    debug!("opened {} bytes into {} bytes", data.len(), plaintext.len());
    Ok(plaintext)
}

/// Symmetric-only sealing, wire form `[iv:16][ciphertext]`. Generates a key
/// when none is supplied and hands it back to the caller.
pub fn seal_symmetric(
    plaintext: &[u8],
    key: Option<[u8; AES_KEY_SIZE]>,
) -> Result<(Vec<u8>, [u8; AES_KEY_SIZE])> {
    let mut rng = rand::thread_rng();
    let key = key.unwrap_or_else(|| {
        let mut fresh = [0u8; AES_KEY_SIZE];
        rng.fill_bytes(&mut fresh);
        fresh
    });
    let mut iv = [0u8; IV_SIZE];
    rng.fill_bytes(&mut iv);

    let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(IV_SIZE + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok((out, key))
}

pub fn open_symmetric(data: &[u8], key: &[u8; AES_KEY_SIZE]) -> Result<Vec<u8>> {
    if data.len() < IV_SIZE + 16 {
        return Err(Error::BadCiphertext("truncated header"));
    }
    let iv = &data[..IV_SIZE];
    let ciphertext = &data[IV_SIZE..];
    if ciphertext.len() % 16 != 0 {
        return Err(Error::BadCiphertext(
            "ciphertext is not a positive multiple of the block size",
        ));
    }

    Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|_| Error::BadCiphertext("bad IV length"))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| Error::BadCiphertext("padding verification failed"))
}

pub fn hash(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

pub fn save_keypair(
    private: &RsaPrivateKey,
    public: &RsaPublicKey,
    private_path: &Path,
    public_path: &Path,
) -> Result<()> {
    let private_pem = private
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| Error::Key(format!("private key encoding failed: {e}")))?;
    let public_pem = public
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| Error::Key(format!("public key encoding failed: {e}")))?;
    std::fs::write(private_path, private_pem.as_bytes())?;
    std::fs::write(public_path, public_pem.as_bytes())?;
    info!(
        "saved keypair to {} and {}",
        private_path.display(),
        public_path.display()
    );
    Ok(())
}

pub fn load_private_key(path: &Path) -> Result<RsaPrivateKey> {
    let pem = std::fs::read_to_string(path)?;
    RsaPrivateKey::from_pkcs8_pem(&pem)
        .map_err(|e| Error::Key(format!("{}: {e}", path.display())))
}

pub fn load_public_key(path: &Path) -> Result<RsaPublicKey> {
    let pem = std::fs::read_to_string(path)?;
    RsaPublicKey::from_public_key_pem(&pem)
        .map_err(|e| Error::Key(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use super::*;

    // Key generation dominates the test runtime, so the suite shares two
    // keypairs.
    fn test_keys() -> &'static (RsaPrivateKey, RsaPublicKey) {
        static KEYS: OnceLock<(RsaPrivateKey, RsaPublicKey)> = OnceLock::new();
        KEYS.get_or_init(|| generate_keypair().unwrap())
    }

    fn other_keys() -> &'static (RsaPrivateKey, RsaPublicKey) {
        static KEYS: OnceLock<(RsaPrivateKey, RsaPublicKey)> = OnceLock::new();
        KEYS.get_or_init(|| generate_keypair().unwrap())
    }

    #[test]
    fn seal_open_round_trip() {
        let (private, public) = test_keys();
        let plaintext = b"attack at dawn";
        let sealed = seal(plaintext, public).unwrap();
        assert_ne!(&sealed[..], &plaintext[..]);
        assert!(sealed.len() > plaintext.len());
        assert_eq!(open(&sealed, private).unwrap(), plaintext);

        // Empty plaintext still pads out to one full block.
        let sealed = seal(b"", public).unwrap();
        assert_eq!(open(&sealed, private).unwrap(), b"");
    }

    #[test]
    fn sealing_is_randomized() {
        let (_, public) = test_keys();
        let a = seal(b"same message", public).unwrap();
        let b = seal(b"same message", public).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_is_an_auth_failure() {
        let (_, public) = test_keys();
        let (other_private, _) = other_keys();
        let sealed = seal(b"secret", public).unwrap();
        assert!(matches!(
            open(&sealed, other_private),
            Err(Error::AuthFailure)
        ));
    }

    #[test]
    fn truncation_is_a_bad_ciphertext() {
        let (private, public) = test_keys();
        let sealed = seal(b"secret", public).unwrap();
        assert!(matches!(
            open(&sealed[..1], private),
            Err(Error::BadCiphertext(_))
        ));
        // Shear off half the final cipher block.
        assert!(matches!(
            open(&sealed[..sealed.len() - 8], private),
            Err(Error::BadCiphertext(_))
        ));
    }

    #[test]
    fn symmetric_round_trip() {
        let (sealed, key) = seal_symmetric(b"loopback test payload", None).unwrap();
        assert_eq!(open_symmetric(&sealed, &key).unwrap(), b"loopback test payload");

        let fixed = [7u8; AES_KEY_SIZE];
        let (sealed, key) = seal_symmetric(b"fixed key", Some(fixed)).unwrap();
        assert_eq!(key, fixed);
        assert_eq!(open_symmetric(&sealed, &fixed).unwrap(), b"fixed key");
    }

    #[test]
    fn hash_is_sha256_sized_and_stable() {
        let a = hash(b"data");
        let b = hash(b"data");
        let c = hash(b"different");
        assert_eq!(a.len(), 32);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn pem_round_trip_through_disk() {
        let (private, public) = test_keys();
        let dir = std::env::temp_dir();
        let private_path = dir.join("soniclink_test_private.pem");
        let public_path = dir.join("soniclink_test_public.pem");

        save_keypair(private, public, &private_path, &public_path).unwrap();
        let loaded_private = load_private_key(&private_path).unwrap();
        let loaded_public = load_public_key(&public_path).unwrap();

        let sealed = seal(b"via disk", &loaded_public).unwrap();
        assert_eq!(open(&sealed, &loaded_private).unwrap(), b"via disk");

        let _ = std::fs::remove_file(private_path);
        let _ = std::fs::remove_file(public_path);
    }
}
