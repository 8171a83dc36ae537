/*
 * Copyright (c) 2020-2023, Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Key-record edge cases for the shared retrieve-and-verify path used by
//! both `ARC-Message-Signature` and `ARC-Seal` verification.

use mail_arc::common::crypto::{Algorithm, HashAlgorithm, RsaKey, RsaVerifyingKey, Sha256, SigningKey};
use mail_arc::common::resolver::FileResolver;
use mail_arc::common::verify::{retrieve_and_verify, MIN_RSA_KEY_BITS};
use mail_arc::Error;

const TEST_RSA_PK: &str = include_str!("data/rsa_test_key.pem");
const TEST_RSA_PUB_B64: &str = include_str!("data/rsa_test_key.pub.b64");

fn signed_input() -> (Vec<u8>, Vec<u8>) {
    let key = RsaKey::<Sha256>::from_pkcs1_pem(TEST_RSA_PK).unwrap();
    let input = b"From:a@example.com\r\nSubject:hi".to_vec();
    let digest = HashAlgorithm::Sha256.hash(&input);
    let sig = key.sign(&digest).unwrap();
    (input, sig)
}

#[tokio::test]
async fn revoked_key_record_is_rejected() {
    let (input, sig) = signed_input();
    let resolver = FileResolver::new().with_record("sel1._domainkey.example.com", "v=DKIM1; k=rsa; p=");

    let err = retrieve_and_verify(
        &resolver,
        "example.com",
        "sel1",
        Algorithm::RsaSha256,
        &input,
        &sig,
        MIN_RSA_KEY_BITS,
    )
    .await
    .unwrap_err();
    assert_eq!(err, Error::RevokedPublicKey);
}

#[tokio::test]
async fn testing_key_flag_is_surfaced_not_swallowed() {
    let (input, sig) = signed_input();
    let resolver = FileResolver::new().with_record(
        "sel1._domainkey.example.com",
        &format!("v=DKIM1; k=rsa; t=y; p={TEST_RSA_PUB_B64}"),
    );

    let info = retrieve_and_verify(
        &resolver,
        "example.com",
        "sel1",
        Algorithm::RsaSha256,
        &input,
        &sig,
        MIN_RSA_KEY_BITS,
    )
    .await
    .unwrap();
    assert!(info.testing);
}

#[tokio::test]
async fn incompatible_hash_algorithm_in_h_tag_is_rejected() {
    let (input, sig) = signed_input();
    let resolver = FileResolver::new().with_record(
        "sel1._domainkey.example.com",
        &format!("v=DKIM1; k=rsa; h=sha1; p={TEST_RSA_PUB_B64}"),
    );

    let err = retrieve_and_verify(
        &resolver,
        "example.com",
        "sel1",
        Algorithm::RsaSha256,
        &input,
        &sig,
        MIN_RSA_KEY_BITS,
    )
    .await
    .unwrap_err();
    assert_eq!(err, Error::IncompatibleAlgorithms);
}

#[tokio::test]
async fn unknown_selector_is_a_permanent_no_key_error() {
    let (input, sig) = signed_input();
    let resolver = FileResolver::new();
    let err = retrieve_and_verify(
        &resolver,
        "example.com",
        "missing-selector",
        Algorithm::RsaSha256,
        &input,
        &sig,
        MIN_RSA_KEY_BITS,
    )
    .await
    .unwrap_err();
    assert_eq!(err, Error::DnsRecordNotFound);
}

#[test]
fn tampered_input_fails_verification() {
    use base64::Engine;

    let key = RsaKey::<Sha256>::from_pkcs1_pem(TEST_RSA_PK).unwrap();
    let digest = HashAlgorithm::Sha256.hash(b"From:a@example.com");
    let sig = key.sign(&digest).unwrap();

    let der = base64::engine::general_purpose::STANDARD
        .decode(TEST_RSA_PUB_B64.trim())
        .unwrap();
    let verifying = RsaVerifyingKey::from_spki_der(&der).unwrap();

    let tampered_digest = HashAlgorithm::Sha256.hash(b"From:tampered@example.com");
    let err = verifying
        .verify(HashAlgorithm::Sha256, tampered_digest.as_ref(), &sig)
        .unwrap_err();
    assert_eq!(err, Error::FailedVerification);
}
