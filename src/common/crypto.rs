/*
 * Copyright (c) 2020-2023, Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Hashing and RSA sign/verify primitives shared by the DKIM and ARC
//! canonicalizers. Everything above this module talks in terms of the
//! [`SigningKey`] / [`VerifyingKey`] traits so that the wire format code
//! never touches `rsa` or `sha1`/`sha2` directly.

use std::marker::PhantomData;

use rsa::{
    pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey},
    pkcs8::{DecodePrivateKey, DecodePublicKey},
    Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey as RsaPublicKeyImpl,
};
use sha1::digest::Output;
use sha2::Digest;

use crate::error::{Error, Result};

/// Digest algorithm used by a signature, independent of the key type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum HashAlgorithm {
    Sha1 = 0x01,
    Sha256 = 0x02,
}

impl HashAlgorithm {
    pub fn hash(&self, data: &[u8]) -> HashOutput {
        match self {
            Self::Sha1 => HashOutput::Sha1(sha1::Sha1::digest(data)),
            Self::Sha256 => HashOutput::Sha256(sha2::Sha256::digest(data)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }
}

/// Signing algorithm as it appears in an `a=` tag: a key type bound to a
/// digest. ARC and DKIM in this crate are RSA-only -- no Ed25519 seals are
/// produced or accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    RsaSha1,
    RsaSha256,
}

impl Algorithm {
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        match self {
            Self::RsaSha1 => HashAlgorithm::Sha1,
            Self::RsaSha256 => HashAlgorithm::Sha256,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RsaSha1 => "rsa-sha1",
            Self::RsaSha256 => "rsa-sha256",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rsa-sha1" => Some(Self::RsaSha1),
            "rsa-sha256" => Some(Self::RsaSha256),
            _ => None,
        }
    }
}

pub enum HashOutput {
    Sha1(Output<sha1::Sha1>),
    Sha256(Output<sha2::Sha256>),
}

impl AsRef<[u8]> for HashOutput {
    fn as_ref(&self) -> &[u8] {
        match self {
            Self::Sha1(output) => output.as_ref(),
            Self::Sha256(output) => output.as_ref(),
        }
    }
}

/// Marker type selecting the digest a [`RsaKey`] signs with.
pub trait HashImpl: Clone + Copy {
    const ALGORITHM: HashAlgorithm;
}

#[derive(Debug, Clone, Copy)]
pub struct Sha1;
impl HashImpl for Sha1 {
    const ALGORITHM: HashAlgorithm = HashAlgorithm::Sha1;
}

#[derive(Debug, Clone, Copy)]
pub struct Sha256;
impl HashImpl for Sha256 {
    const ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;
}

pub trait SigningKey {
    /// Signs a pre-computed digest and returns the raw signature bytes.
    fn sign(&self, digest: &HashOutput) -> Result<Vec<u8>>;

    fn algorithm(&self) -> Algorithm;
}

#[derive(Clone)]
pub struct RsaKey<T> {
    inner: RsaPrivateKey,
    key_bits: usize,
    _hash: PhantomData<T>,
}

impl<T: HashImpl> RsaKey<T> {
    pub fn from_pkcs1_pem(pem: &str) -> Result<Self> {
        let inner =
            RsaPrivateKey::from_pkcs1_pem(pem).map_err(|e| Error::CryptoError(e.to_string()))?;
        Ok(Self::wrap(inner))
    }

    pub fn from_pkcs1_der(der: &[u8]) -> Result<Self> {
        let inner =
            RsaPrivateKey::from_pkcs1_der(der).map_err(|e| Error::CryptoError(e.to_string()))?;
        Ok(Self::wrap(inner))
    }

    pub fn from_pkcs8_pem(pem: &str) -> Result<Self> {
        let inner =
            RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| Error::CryptoError(e.to_string()))?;
        Ok(Self::wrap(inner))
    }

    /// Tries, in order, PKCS#1 DER, PKCS#8 DER, PKCS#1 PEM and PKCS#8 PEM,
    /// the same fallback chain production signers use when a key's exact
    /// encoding isn't known ahead of time.
    pub fn from_any(bytes_or_pem: &[u8]) -> Result<Self> {
        if let Ok(inner) = RsaPrivateKey::from_pkcs1_der(bytes_or_pem) {
            return Ok(Self::wrap(inner));
        }
        if let Ok(inner) = RsaPrivateKey::from_pkcs8_der(bytes_or_pem) {
            return Ok(Self::wrap(inner));
        }
        if let Ok(s) = std::str::from_utf8(bytes_or_pem) {
            if let Ok(inner) = RsaPrivateKey::from_pkcs1_pem(s) {
                return Ok(Self::wrap(inner));
            }
            if let Ok(inner) = RsaPrivateKey::from_pkcs8_pem(s) {
                return Ok(Self::wrap(inner));
            }
        }
        Err(Error::CryptoError("unrecognized RSA private key encoding".into()))
    }

    fn wrap(inner: RsaPrivateKey) -> Self {
        use rsa::traits::PublicKeyParts;
        let key_bits = inner.size() * 8;
        Self {
            inner,
            key_bits,
            _hash: PhantomData,
        }
    }

    pub fn key_bits(&self) -> usize {
        self.key_bits
    }
}

impl SigningKey for RsaKey<Sha1> {
    fn sign(&self, digest: &HashOutput) -> Result<Vec<u8>> {
        self.inner
            .sign(Pkcs1v15Sign::new::<sha1::Sha1>(), digest.as_ref())
            .map_err(|e| Error::CryptoError(e.to_string()))
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::RsaSha1
    }
}

impl SigningKey for RsaKey<Sha256> {
    fn sign(&self, digest: &HashOutput) -> Result<Vec<u8>> {
        self.inner
            .sign(Pkcs1v15Sign::new::<sha2::Sha256>(), digest.as_ref())
            .map_err(|e| Error::CryptoError(e.to_string()))
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::RsaSha256
    }
}

/// Public half of an RSA key, as recovered from a `p=` DNS record.
pub struct RsaVerifyingKey {
    inner: RsaPublicKeyImpl,
}

impl RsaVerifyingKey {
    pub fn from_spki_der(bytes: &[u8]) -> Result<Self> {
        let inner = RsaPublicKeyImpl::from_public_key_der(bytes)
            .or_else(|_| RsaPublicKeyImpl::from_pkcs1_der(bytes))
            .map_err(|e| Error::CryptoError(e.to_string()))?;
        Ok(Self { inner })
    }

    pub fn key_bits(&self) -> usize {
        use rsa::traits::PublicKeyParts;
        self.inner.size() * 8
    }

    pub fn verify(&self, hash_algorithm: HashAlgorithm, digest: &[u8], signature: &[u8]) -> Result<()> {
        let scheme = match hash_algorithm {
            HashAlgorithm::Sha1 => Pkcs1v15Sign::new::<sha1::Sha1>(),
            HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<sha2::Sha256>(),
        };
        self.inner
            .verify(scheme, digest, signature)
            .map_err(|_| Error::FailedVerification)
    }
}
