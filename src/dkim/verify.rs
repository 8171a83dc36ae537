/*
 * Copyright (c) 2020-2023, Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Verification half of the DKIM-shaped primitives: given a public key and
//! the canonicalized header hash input, check a `b=` signature.

use crate::common::crypto::{HashAlgorithm, RsaVerifyingKey};
use crate::error::Result;

pub(crate) fn verify_header_hash(
    key: &RsaVerifyingKey,
    hash_algorithm: HashAlgorithm,
    input: &[u8],
    signature: &[u8],
) -> Result<()> {
    let digest = hash_algorithm.hash(input);
    key.verify(hash_algorithm, digest.as_ref(), signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::crypto::{RsaKey, Sha256, SigningKey};
    use crate::dkim::sign::sign_header_hash;

    const TEST_RSA_PK: &str = include_str!("../../tests/data/rsa_test_key.pem");
    const TEST_RSA_PUB: &[u8] = include_bytes!("../../tests/data/rsa_test_key.pub.der");

    #[test]
    fn round_trips_sign_and_verify() {
        let key = RsaKey::<Sha256>::from_pkcs1_pem(TEST_RSA_PK).unwrap();
        let input = b"the canonicalized bytes";
        let sig = sign_header_hash(&key, input).unwrap();

        let vk = RsaVerifyingKey::from_spki_der(TEST_RSA_PUB).unwrap();
        verify_header_hash(&vk, key.algorithm().hash_algorithm(), input, &sig).unwrap();
    }

    #[test]
    fn rejects_tampered_input() {
        let key = RsaKey::<Sha256>::from_pkcs1_pem(TEST_RSA_PK).unwrap();
        let sig = sign_header_hash(&key, b"original").unwrap();
        let vk = RsaVerifyingKey::from_spki_der(TEST_RSA_PUB).unwrap();
        assert!(verify_header_hash(&vk, HashAlgorithm::Sha256, b"tampered", &sig).is_err());
    }
}
