/*
 * Copyright (c) 2020-2023, Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Signing half of the DKIM-shaped primitives: given the canonicalized
//! header hash input, produce the `b=` signature bytes.

use crate::common::crypto::SigningKey;
use crate::error::Result;

/// Hashes `input` with the key's own digest algorithm and signs the
/// resulting digest.
pub(crate) fn sign_header_hash<K: SigningKey>(key: &K, input: &[u8]) -> Result<Vec<u8>> {
    let digest = key.algorithm().hash_algorithm().hash(input);
    key.sign(&digest)
}
