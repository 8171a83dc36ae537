/*
 * Copyright (c) 2020-2023, Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Shared key-retrieval-and-verify orchestration used by both
//! `ARC-Message-Signature` and `ARC-Seal` verification: resolve the
//! `d=`/`s=` key record, check its hash/key-size constraints, then hand the
//! canonicalized bytes to [`crate::dkim::verify`].

use crate::common::crypto::{Algorithm, RsaVerifyingKey};
use crate::common::resolver::{selector_query_name, DomainKeyRecord, Lookup};
use crate::error::{Error, Result};

/// Accessors a signature-shaped header (DKIM-Signature, ARC-Message-Signature
/// or ARC-Seal) must expose to go through the shared verification path.
pub trait VerifySignature {
    fn signature(&self) -> &[u8];
    fn algorithm(&self) -> Algorithm;
    fn selector(&self) -> &str;
    fn domain(&self) -> &str;
}

/// Non-cryptographic facts about the key record recovered during
/// verification, surfaced so the caller can fold them into the chain
/// verdict (e.g. a `t=y` testing key should not hard-fail a message).
#[derive(Debug, Clone, Copy)]
pub struct KeyRecordInfo {
    pub testing: bool,
    pub dnssec_authenticated: bool,
    pub key_bits: usize,
}

/// Minimum accepted RSA modulus size, matching common DKIM verifier
/// practice (RFC 8301 deprecates sub-1024-bit keys).
pub const MIN_RSA_KEY_BITS: usize = 1024;

pub async fn retrieve_and_verify(
    resolver: &dyn Lookup,
    domain: &str,
    selector: &str,
    algorithm: Algorithm,
    header_hash_input: &[u8],
    signature: &[u8],
    min_key_bits: usize,
) -> Result<KeyRecordInfo> {
    let name = selector_query_name(selector, domain)?;
    let lookup = resolver.txt_lookup(&name).await?;
    if lookup.records.is_empty() {
        return Err(Error::DnsRecordNotFound);
    }
    if lookup.records.len() > 1 {
        return Err(Error::MultiDnsReply);
    }
    let record = DomainKeyRecord::parse(&lookup.records[0])?;

    if let Some(hashes) = &record.hash_algorithms {
        let want = algorithm.hash_algorithm().as_str();
        if !hashes.iter().any(|h| h == want) {
            return Err(Error::IncompatibleAlgorithms);
        }
    }

    let key = RsaVerifyingKey::from_spki_der(&record.public_key)?;
    if key.key_bits() < min_key_bits {
        return Err(Error::InsecureKeySize {
            bits: key.key_bits(),
            minimum: min_key_bits,
        });
    }

    crate::dkim::verify::verify_header_hash(&key, algorithm.hash_algorithm(), header_hash_input, signature)?;

    Ok(KeyRecordInfo {
        testing: record.testing,
        dnssec_authenticated: lookup.dnssec_authenticated,
        key_bits: key.key_bits(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::crypto::{RsaKey, Sha256, SigningKey};
    use crate::common::resolver::FileResolver;
    use crate::dkim::sign::sign_header_hash;

    const TEST_RSA_PK: &str = include_str!("../../tests/data/rsa_test_key.pem");
    const TEST_RSA_PUB_B64: &str = include_str!("../../tests/data/rsa_test_key.pub.b64");

    #[tokio::test]
    async fn retrieves_and_verifies_against_file_resolver() {
        let key = RsaKey::<Sha256>::from_pkcs1_pem(TEST_RSA_PK).unwrap();
        let input = b"header hash input bytes";
        let sig = sign_header_hash(&key, input).unwrap();

        let resolver = FileResolver::new().with_record(
            "sel1._domainkey.example.com",
            &format!("v=DKIM1; k=rsa; p={TEST_RSA_PUB_B64}"),
        );

        let info = retrieve_and_verify(
            &resolver,
            "example.com",
            "sel1",
            Algorithm::RsaSha256,
            input,
            &sig,
            MIN_RSA_KEY_BITS,
        )
        .await
        .unwrap();
        assert!(!info.testing);
    }

    #[tokio::test]
    async fn missing_record_is_tempfail_shaped() {
        let resolver = FileResolver::new();
        let err = retrieve_and_verify(
            &resolver,
            "example.com",
            "sel1",
            Algorithm::RsaSha256,
            b"x",
            b"y",
            MIN_RSA_KEY_BITS,
        )
        .await
        .unwrap_err();
        assert_eq!(err, Error::DnsRecordNotFound);
    }

    #[tokio::test]
    async fn configured_min_key_bits_rejects_an_otherwise_valid_key() {
        let key = RsaKey::<Sha256>::from_pkcs1_pem(TEST_RSA_PK).unwrap();
        let input = b"header hash input bytes";
        let sig = sign_header_hash(&key, input).unwrap();
        let resolver = FileResolver::new().with_record(
            "sel1._domainkey.example.com",
            &format!("v=DKIM1; k=rsa; p={TEST_RSA_PUB_B64}"),
        );

        let err = retrieve_and_verify(
            &resolver,
            "example.com",
            "sel1",
            Algorithm::RsaSha256,
            input,
            &sig,
            4096,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::InsecureKeySize { minimum: 4096, .. }));
    }
}
