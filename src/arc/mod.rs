/*
 * Copyright (c) 2020-2023, Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Authenticated Received Chain (RFC 8617) data model: the three headers
//! making up one ARC set (`ARC-Authentication-Results`,
//! `ARC-Message-Signature`, `ARC-Seal`), chain discovery and the
//! cryptographic chain evaluation in [`verify`].

pub mod auth_results;
pub mod seal;
pub mod verify;

use crate::common::headers::{HeaderField, TaggedHeader};
use crate::dkim::{parse_sig_fields, CanonType, Canonicalization, ChainValidation, DkimResult, SigFields};
use crate::error::{Error, Result};

pub use auth_results::AuthResults;

/// RFC 8617 section 4.2: chains longer than this are rejected outright.
pub const MAX_ARC_INSTANCE: u8 = 50;

pub const AAR_NAME: &str = "ARC-Authentication-Results";
pub const AMS_NAME: &str = "ARC-Message-Signature";
pub const AS_NAME: &str = "ARC-Seal";

/// `ARC-Authentication-Results`: an opaque carrier of the authentication
/// verdict at the time this instance was added. The chain evaluator never
/// interprets its contents, only its `i=` tag.
#[derive(Debug, Clone)]
pub struct Aar {
    pub instance: u8,
    pub ar: AuthResults,
    pub raw: String,
}

impl Aar {
    fn parse(field: &HeaderField) -> Result<Self> {
        let value = field.value();
        let (i_part, rest) = value.split_once(';').ok_or(Error::ArcInvalidInstance)?;
        let i_part = i_part.trim();
        let i_str = i_part.strip_prefix("i=").ok_or(Error::ArcInvalidInstance)?.trim();
        let instance: u8 = i_str.parse().map_err(|_| Error::ArcInvalidInstance)?;
        let ar = AuthResults::parse(rest.trim_start()).map_err(|_| Error::ArcInvalidInstance)?;
        Ok(Self {
            instance,
            ar,
            raw: field.raw.clone(),
        })
    }
}

/// `ARC-Message-Signature`: identical tag vocabulary to `DKIM-Signature`
/// plus the mandatory `i=` instance tag, no `v=`.
#[derive(Debug, Clone)]
pub struct Ams {
    pub instance: u8,
    pub fields: SigFields,
    pub raw: String,
}

impl Ams {
    fn parse(field: &HeaderField) -> Result<Self> {
        let tagged = TaggedHeader::parse(field.value())?;
        let instance: u8 = tagged
            .require_str("i")?
            .trim()
            .parse()
            .map_err(|_| Error::ArcInvalidInstance)?;
        let fields = parse_sig_fields(&tagged)?;
        Ok(Self {
            instance,
            fields,
            raw: field.raw.clone(),
        })
    }
}

/// `ARC-Seal`: vouches for the integrity of the whole chain up to and
/// including this instance. Always canonicalized `relaxed` and never
/// carries an `h=` tag -- RFC 8617 fixes exactly which headers it covers
/// (every prior AAR/AMS/AS plus its own two siblings).
#[derive(Debug, Clone)]
pub struct Seal {
    pub instance: u8,
    pub algorithm: crate::common::crypto::Algorithm,
    pub domain: String,
    pub selector: String,
    pub cv: ChainValidation,
    pub timestamp: Option<i64>,
    pub signature: Vec<u8>,
    pub raw: String,
}

impl Seal {
    fn parse(field: &HeaderField) -> Result<Self> {
        use base64::Engine;
        let tagged = TaggedHeader::parse(field.value())?;
        if tagged.contains("h") {
            return Err(Error::ArcHasHeaderTag);
        }
        let instance: u8 = tagged
            .require_str("i")?
            .trim()
            .parse()
            .map_err(|_| Error::ArcInvalidInstance)?;
        let algorithm = crate::common::crypto::Algorithm::parse(tagged.require_str("a")?)
            .ok_or(Error::UnsupportedAlgorithm)?;
        let domain = tagged
            .require_str("d")?
            .trim_end_matches('.')
            .to_ascii_lowercase();
        let selector = tagged.require_str("s")?.trim().to_string();
        let cv = ChainValidation::parse(tagged.require_str("cv")?).ok_or(Error::ArcInvalidCv)?;
        let timestamp = tagged
            .get_str("t")
            .map(|v| v.parse::<i64>().map_err(|_| Error::ParseError))
            .transpose()?;
        let signature = base64::engine::general_purpose::STANDARD
            .decode(tagged.require("b")?.value_no_fws())
            .map_err(|_| Error::Base64)?;
        Ok(Self {
            instance,
            algorithm,
            domain,
            selector,
            cv,
            timestamp,
            signature,
            raw: field.raw.clone(),
        })
    }
}

impl crate::common::verify::VerifySignature for Seal {
    fn signature(&self) -> &[u8] {
        &self.signature
    }
    fn algorithm(&self) -> crate::common::crypto::Algorithm {
        self.algorithm
    }
    fn selector(&self) -> &str {
        &self.selector
    }
    fn domain(&self) -> &str {
        &self.domain
    }
}

/// One fully assembled ARC set: the AAR/AMS/AS triplet sharing an `i=`.
#[derive(Debug, Clone)]
pub struct ArcSet {
    pub instance: u8,
    pub aar: Aar,
    pub ams: Ams,
    pub seal: Seal,
}

impl ArcSet {
    pub fn ams_canonicalization(&self) -> Canonicalization {
        self.ams.fields.canonicalization
    }
}

/// Discovers and structurally validates the ARC sets among `headers`:
/// contiguous instances `1..=n`, no duplicates, no gaps, each instance
/// carrying exactly one AAR/AMS/AS, `cv=none` only on instance 1.
///
/// Returns `Ok(vec![])` when the message carries no ARC headers at all --
/// an unsealed message, not a structural error.
pub fn discover_sets(headers: &[HeaderField]) -> Result<Vec<ArcSet>> {
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct Bucket<'h> {
        aar: Vec<&'h HeaderField>,
        ams: Vec<&'h HeaderField>,
        seal: Vec<&'h HeaderField>,
    }

    let mut buckets: BTreeMap<u8, Bucket> = BTreeMap::new();
    let mut any_arc_header = false;

    for h in headers {
        let name = h.name_lower();
        if name.eq_ignore_ascii_case(&AAR_NAME.to_ascii_lowercase()) {
            any_arc_header = true;
            let aar = Aar::parse(h)?;
            buckets.entry(aar.instance).or_default().aar.push(h);
        } else if name.eq_ignore_ascii_case(&AMS_NAME.to_ascii_lowercase()) {
            any_arc_header = true;
            let ams = Ams::parse(h)?;
            buckets.entry(ams.instance).or_default().ams.push(h);
        } else if name.eq_ignore_ascii_case(&AS_NAME.to_ascii_lowercase()) {
            any_arc_header = true;
            let seal = Seal::parse(h)?;
            buckets.entry(seal.instance).or_default().seal.push(h);
        }
    }

    if !any_arc_header {
        return Ok(Vec::new());
    }

    let n = *buckets.keys().next_back().unwrap();
    if n as usize > MAX_ARC_INSTANCE as usize {
        return Err(Error::ArcChainTooLong);
    }

    let mut sets = Vec::with_capacity(n as usize);
    for i in 1..=n {
        let bucket = buckets.remove(&i).ok_or(Error::ArcMissingInstance(i))?;
        if bucket.aar.len() > 1 || bucket.ams.len() > 1 || bucket.seal.len() > 1 {
            return Err(Error::ArcDuplicateInstance(i));
        }
        let aar_field = *bucket.aar.first().ok_or(Error::ArcBrokenChain)?;
        let ams_field = *bucket.ams.first().ok_or(Error::ArcBrokenChain)?;
        let seal_field = *bucket.seal.first().ok_or(Error::ArcBrokenChain)?;

        let aar = Aar::parse(aar_field)?;
        let ams = Ams::parse(ams_field)?;
        let seal = Seal::parse(seal_field)?;

        if i == 1 && seal.cv != ChainValidation::None {
            return Err(Error::ArcInvalidCv);
        }
        if i > 1 && seal.cv == ChainValidation::None {
            return Err(Error::ArcInvalidCv);
        }

        sets.push(ArcSet {
            instance: i,
            aar,
            ams,
            seal,
        });
    }

    Ok(sets)
}

/// Needed body canonicalization parameters across all `ARC-Message-Signature`
/// headers in a chain, deduplicated so the engine only runs one streaming
/// hasher per distinct `(c=, a=, l=)` triple.
pub fn body_canon_keys(sets: &[ArcSet]) -> Vec<(CanonType, crate::common::crypto::HashAlgorithm, Option<u64>)> {
    let mut keys = Vec::new();
    for set in sets {
        let key = (
            set.ams.fields.canonicalization.body,
            set.ams.fields.algorithm.hash_algorithm(),
            set.ams.fields.body_length,
        );
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

/// Final chain evaluation output: the `arc=` result plus per-instance
/// detail needed to render an `ARC-Authentication-Results` style report.
#[derive(Debug, Clone)]
pub struct ArcOutput {
    pub result: DkimResult,
    pub sets: Vec<ArcSet>,
    pub sigerror: Vec<(u8, Error)>,
    pub oldest_pass: Option<u8>,
}

impl ArcOutput {
    pub fn result(&self) -> &DkimResult {
        &self.result
    }

    pub fn sets(&self) -> &[ArcSet] {
        &self.sets
    }

    /// The `:`-joined `d=` domains of every set from instance 1 up, i.e.
    /// which parties have taken custody of the message so far. Empty for
    /// an unsealed message.
    pub fn chain_custody_str(&self) -> String {
        self.sets
            .iter()
            .map(|set| set.seal.domain.as_str())
            .collect::<Vec<_>>()
            .join(":")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hf(name: &str, value: &str) -> HeaderField {
        HeaderField::parse(&format!("{name}: {value}")).unwrap()
    }

    #[test]
    fn empty_headers_yield_no_sets() {
        let headers = vec![hf("From", "a@example.com")];
        assert!(discover_sets(&headers).unwrap().is_empty());
    }

    #[test]
    fn missing_instance_is_reported() {
        let headers = vec![
            hf("ARC-Authentication-Results", "i=1; mx.example.com; dkim=pass"),
            hf(
                "ARC-Message-Signature",
                "i=1; a=rsa-sha256; d=example.com; s=s; h=from; bh=AAAA; b=BBBB",
            ),
            // Seal for instance 1 missing entirely.
            hf("ARC-Authentication-Results", "i=2; mx.example.com; dkim=pass"),
        ];
        assert_eq!(discover_sets(&headers).unwrap_err(), Error::ArcBrokenChain);
    }

    #[test]
    fn cv_none_only_allowed_on_instance_one() {
        let headers = vec![
            hf("ARC-Authentication-Results", "i=1; mx.example.com; dkim=pass"),
            hf(
                "ARC-Message-Signature",
                "i=1; a=rsa-sha256; d=example.com; s=s; h=from; bh=AAAA; b=BBBB",
            ),
            hf("ARC-Seal", "i=1; a=rsa-sha256; d=example.com; s=s; cv=pass; b=CCCC"),
        ];
        assert_eq!(discover_sets(&headers).unwrap_err(), Error::ArcInvalidCv);
    }

    #[test]
    fn seal_with_h_tag_is_rejected() {
        let headers = vec![
            hf("ARC-Authentication-Results", "i=1; mx.example.com; dkim=pass"),
            hf(
                "ARC-Message-Signature",
                "i=1; a=rsa-sha256; d=example.com; s=s; h=from; bh=AAAA; b=BBBB",
            ),
            hf(
                "ARC-Seal",
                "i=1; a=rsa-sha256; d=example.com; s=s; cv=none; h=from; b=CCCC",
            ),
        ];
        assert_eq!(discover_sets(&headers).unwrap_err(), Error::ArcHasHeaderTag);
    }
}
