/*
 * Copyright (c) 2020-2023, Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Chain evaluation rules (RFC 8617 section 5.2): verify every set's
//! `ARC-Message-Signature` and `ARC-Seal` independently, then fold the
//! per-set outcomes and `cv=` declarations into one `arc=` verdict.

use std::collections::HashMap;

use crate::arc::{ArcOutput, ArcSet};
use crate::common::crypto::HashAlgorithm;
use crate::common::headers::{strip_tag_value, HeaderField};
use crate::common::resolver::Lookup;
use crate::common::verify::retrieve_and_verify;
use crate::dkim::canonicalize::{build_header_hash_input, select_signed_headers, CanonType};
use crate::dkim::{ChainValidation, DkimResult};
use crate::error::Error;

pub type BodyDigestKey = (CanonType, HashAlgorithm, Option<u64>);
pub type BodyDigests = HashMap<BodyDigestKey, Vec<u8>>;

fn strip_b_from_raw(raw: &str) -> String {
    let colon = raw.find(':').unwrap_or(raw.len());
    let (name_part, rest) = raw.split_at(colon);
    let value = rest.strip_prefix(':').unwrap_or(rest);
    format!("{name_part}:{}", strip_tag_value(value, "b"))
}

/// Rejects a `t=`/`x=` pair once `now` is past whichever expiry applies:
/// the explicit `x=` tag if present, or `t=` plus the configured
/// `signature_ttl` otherwise. Either one alone, or neither, is fine.
fn check_not_expired(timestamp: Option<i64>, expiration: Option<i64>, signature_ttl: Option<i64>, now: i64) -> crate::error::Result<()> {
    if let Some(x) = expiration {
        if now > x {
            return Err(Error::SignatureExpired);
        }
    }
    if let (Some(t), Some(ttl)) = (timestamp, signature_ttl) {
        if now > t.saturating_add(ttl) {
            return Err(Error::SignatureExpired);
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn verify_ams(
    set: &ArcSet,
    headers: &[HeaderField],
    body_digests: &BodyDigests,
    resolver: &dyn Lookup,
    signature_ttl: Option<i64>,
    now: i64,
    raw_body_len: u64,
    min_key_bits: usize,
) -> crate::error::Result<()> {
    check_not_expired(set.ams.fields.timestamp, set.ams.fields.expiration, signature_ttl, now)?;
    if let Some(l) = set.ams.fields.body_length {
        if l < raw_body_len {
            return Err(Error::SignatureLength);
        }
    }

    let key = (
        set.ams.fields.canonicalization.body,
        set.ams.fields.algorithm.hash_algorithm(),
        set.ams.fields.body_length,
    );
    let digest = body_digests.get(&key).ok_or(Error::FailedBodyHashMatch)?;
    if digest.as_slice() != set.ams.fields.body_hash.as_slice() {
        return Err(Error::FailedBodyHashMatch);
    }

    let selected = select_signed_headers(
        &set.ams.fields.headers.iter().map(String::as_str).collect::<Vec<_>>(),
        headers,
    );
    let self_stripped = strip_b_from_raw(&set.ams.raw);
    let input = build_header_hash_input(&selected, &self_stripped, set.ams.fields.canonicalization.header);

    retrieve_and_verify(
        resolver,
        &set.ams.fields.domain,
        &set.ams.fields.selector,
        set.ams.fields.algorithm,
        &input,
        &set.ams.fields.signature,
        min_key_bits,
    )
    .await?;
    Ok(())
}

async fn verify_seal(
    set_idx: usize,
    sets: &[ArcSet],
    resolver: &dyn Lookup,
    signature_ttl: Option<i64>,
    now: i64,
    min_key_bits: usize,
) -> crate::error::Result<()> {
    let set = &sets[set_idx];
    check_not_expired(set.seal.timestamp, None, signature_ttl, now)?;
    let mut selected = Vec::new();
    for prior in &sets[..set_idx] {
        selected.push(prior.aar.raw.as_str());
        selected.push(prior.ams.raw.as_str());
        selected.push(prior.seal.raw.as_str());
    }
    selected.push(set.aar.raw.as_str());
    selected.push(set.ams.raw.as_str());
    let self_stripped = strip_b_from_raw(&set.seal.raw);
    let input = build_header_hash_input(&selected, &self_stripped, CanonType::Relaxed);

    retrieve_and_verify(
        resolver,
        &set.seal.domain,
        &set.seal.selector,
        set.seal.algorithm,
        &input,
        &set.seal.signature,
        min_key_bits,
    )
    .await?;
    Ok(())
}

/// Runs the full chain evaluation over an already structurally-valid set
/// of ARC sets (see [`crate::arc::discover_sets`]) and returns the `arc=`
/// verdict plus per-instance error detail.
#[allow(clippy::too_many_arguments)]
pub async fn verify_chain(
    sets: Vec<ArcSet>,
    headers: &[HeaderField],
    body_digests: &BodyDigests,
    resolver: &dyn Lookup,
    signature_ttl: Option<i64>,
    now: i64,
    raw_body_len: u64,
    min_key_bits: usize,
) -> ArcOutput {
    let n = sets.len();
    if n == 0 {
        return ArcOutput {
            result: DkimResult::None,
            sets,
            sigerror: Vec::new(),
            oldest_pass: None,
        };
    }

    let mut sigerror = Vec::new();
    let mut broken = false;
    let mut ams_ok = vec![true; n];
    let highest = n - 1;
    for (idx, set) in sets.iter().enumerate() {
        if let Err(e) = verify_ams(
            set,
            headers,
            body_digests,
            resolver,
            signature_ttl,
            now,
            raw_body_len,
            min_key_bits,
        )
        .await
        {
            tracing::debug!(instance = set.instance, error = %e, "ARC-Message-Signature failed verification");
            ams_ok[idx] = false;
            // Only the highest instance's AMS status feeds the chain
            // verdict; an intermediate instance's AMS failing is
            // diagnostic-only -- AS chain evaluation still continues
            // and that instance can still count toward `oldest_pass`.
            if idx == highest {
                sigerror.push((set.instance, e));
                broken = true;
            }
        }
        if let Err(e) = verify_seal(idx, &sets, resolver, signature_ttl, now, min_key_bits).await {
            tracing::debug!(instance = set.instance, error = %e, "ARC-Seal failed verification");
            sigerror.push((set.instance, e));
            broken = true;
        }
    }

    // Smallest instance whose AMS still validates against this message, or
    // `None` if every instance's AMS was tampered with (independent of any
    // seal/`cv=` breakage -- rule 6 in the chain-evaluation spec).
    let oldest_pass_candidate = ams_ok
        .iter()
        .position(|ok| *ok)
        .map(|idx| sets[idx].instance);

    // A signer that already observed a break reports `cv=fail`; later
    // validators trust that declaration instead of only their own crypto.
    let declared_fail = sets[1..].iter().any(|s| s.seal.cv == ChainValidation::Fail);

    let result = if broken || declared_fail {
        DkimResult::Fail
    } else if n == 1 {
        // A lone, internally valid link hasn't been vouched for by anyone
        // yet: RFC 8617 calls this `none`, not `pass`.
        DkimResult::None
    } else {
        DkimResult::Pass
    };
    // `oldest_pass` tracks AMS-only re-verification, independent of the
    // overall `cv=`/seal-driven verdict: a message whose seal chain is
    // broken can still have an intact oldest signature underneath it.
    let oldest_pass = oldest_pass_candidate;

    tracing::debug!(n, result = result.as_str(), "ARC chain evaluation complete");

    ArcOutput {
        result,
        sets,
        sigerror,
        oldest_pass,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_b_leaves_other_tags_intact() {
        let raw = "ARC-Seal: i=1; a=rsa-sha256; d=example.com; s=s; cv=none; b=AAAA";
        let stripped = strip_b_from_raw(raw);
        assert_eq!(
            stripped,
            "ARC-Seal: i=1; a=rsa-sha256; d=example.com; s=s; cv=none; b="
        );
    }

    #[test]
    fn explicit_expiration_tag_wins_even_without_ttl_configured() {
        assert_eq!(
            check_not_expired(Some(1000), Some(2000), None, 2001).unwrap_err(),
            Error::SignatureExpired
        );
        assert!(check_not_expired(Some(1000), Some(2000), None, 1999).is_ok());
    }

    #[test]
    fn ttl_expiry_is_relative_to_timestamp_not_now() {
        assert!(check_not_expired(Some(1000), None, Some(500), 1499).is_ok());
        assert_eq!(
            check_not_expired(Some(1000), None, Some(500), 1501).unwrap_err(),
            Error::SignatureExpired
        );
    }

    #[test]
    fn missing_timestamp_or_ttl_never_expires() {
        assert!(check_not_expired(None, None, Some(500), i64::MAX).is_ok());
        assert!(check_not_expired(Some(1000), None, None, i64::MAX).is_ok());
    }

    #[tokio::test]
    async fn expired_signature_ttl_short_circuits_before_any_dns_lookup() {
        use crate::arc::seal::ArcSealer;
        use crate::arc::AuthResults;
        use crate::common::crypto::{RsaKey, Sha256};
        use crate::common::message::{Message, SignPlan};
        use crate::common::resolver::FileResolver;
        use crate::dkim::Canonicalization;

        const TEST_RSA_PK: &str = include_str!("../../tests/data/rsa_test_key.pem");

        let mut msg = Message::with_sign_plan(Some(SignPlan {
            canon: CanonType::Relaxed,
            hash_algorithm: HashAlgorithm::Sha256,
        }));
        msg.header_field("From: a@example.com").unwrap();
        msg.eoh().unwrap();
        msg.body(b"hello\r\n").unwrap();
        msg.eom().unwrap();

        let key = RsaKey::<Sha256>::from_pkcs1_pem(TEST_RSA_PK).unwrap();
        let sealer = ArcSealer::new()
            .domain("example.com")
            .selector("sel1")
            .key(key)
            .headers(["from"])
            .header_canonicalization(Canonicalization {
                header: CanonType::Relaxed,
                body: CanonType::Relaxed,
            })
            .timestamp(1_000);
        let ar = AuthResults::parse("mx.example.com; dkim=pass header.d=example.com").unwrap();
        let sealed = sealer.seal(&msg, &ar).unwrap();

        let mut verify_msg = Message::new();
        for line in sealed.header_lines() {
            verify_msg.header_field(line).unwrap();
        }
        verify_msg.header_field("From: a@example.com").unwrap();
        verify_msg.eoh().unwrap();
        verify_msg.body(b"hello\r\n").unwrap();
        verify_msg.eom().unwrap();
        verify_msg.set_signature_ttl(100);
        verify_msg.set_fixed_time(10_000);

        // Deliberately empty: if expiry didn't short-circuit first, this
        // would fail with a DNS lookup error instead.
        let resolver = FileResolver::new();
        let output = verify_msg.verify_chain(&resolver).await;
        assert_eq!(output.result, DkimResult::Fail);
        assert!(output
            .sigerror
            .iter()
            .any(|(_, e)| *e == Error::SignatureExpired));
    }
}
