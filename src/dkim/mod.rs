/*
 * Copyright (c) 2020-2023, Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! The DKIM primitives (RFC 6376) that `ARC-Message-Signature` reuses
//! verbatim: canonicalization, the algorithm/canonicalization tag vocabulary
//! and the tag-list shape shared by `b=`/`bh=`/`h=`. This crate never
//! verifies a plain `DKIM-Signature` header on its own -- only the ARC
//! engine in [`crate::arc`] consumes these.

pub mod canonicalize;
pub mod tables;
pub(crate) mod sign;
pub(crate) mod verify;

pub use canonicalize::{CanonType, Canonicalization};
pub use tables::{ChainValidation, DkimResult};

use base64::Engine;

use crate::common::crypto::Algorithm;
use crate::common::headers::TaggedHeader;
use crate::error::{Error, Result};

/// The fields shared by every DKIM-shaped signature header
/// (`DKIM-Signature`, `ARC-Message-Signature`): algorithm, canonicalization,
/// signing domain/selector, the `h=` selection and the two hashes.
#[derive(Debug, Clone)]
pub struct SigFields {
    pub algorithm: Algorithm,
    pub canonicalization: Canonicalization,
    pub domain: String,
    pub selector: String,
    pub headers: Vec<String>,
    pub body_hash: Vec<u8>,
    pub signature: Vec<u8>,
    pub timestamp: Option<i64>,
    pub expiration: Option<i64>,
    pub body_length: Option<u64>,
}

/// Parses the tags common to `DKIM-Signature` and `ARC-Message-Signature`.
/// `v=` and `i=` differ in meaning between the two (protocol version vs.
/// ARC instance) and are left to each caller.
pub(crate) fn parse_sig_fields(tagged: &TaggedHeader) -> Result<SigFields> {
    let algorithm = Algorithm::parse(tagged.require_str("a")?).ok_or(Error::UnsupportedAlgorithm)?;
    let canonicalization = match tagged.get_str("c") {
        Some(c) => Canonicalization::parse(c).ok_or(Error::UnsupportedCanonicalization)?,
        None => Canonicalization::default(),
    };
    let domain = tagged
        .require_str("d")?
        .trim_end_matches('.')
        .to_ascii_lowercase();
    let selector = tagged.require_str("s")?.trim().to_string();
    let headers: Vec<String> = crate::common::util::split_csv(tagged.require_str("h")?)
        .into_iter()
        .map(String::from)
        .collect();
    let body_hash = base64::engine::general_purpose::STANDARD
        .decode(tagged.require("bh")?.value_no_fws())
        .map_err(|_| Error::Base64)?;
    let signature = base64::engine::general_purpose::STANDARD
        .decode(tagged.require("b")?.value_no_fws())
        .map_err(|_| Error::Base64)?;
    let timestamp = tagged
        .get_str("t")
        .map(|v| v.parse::<i64>().map_err(|_| Error::ParseError))
        .transpose()?;
    let expiration = tagged
        .get_str("x")
        .map(|v| v.parse::<i64>().map_err(|_| Error::ParseError))
        .transpose()?;
    let body_length = tagged
        .get_str("l")
        .map(|v| v.parse::<u64>().map_err(|_| Error::ParseError))
        .transpose()?;

    if domain.is_empty() || selector.is_empty() || headers.is_empty() {
        return Err(Error::MissingParameters);
    }

    Ok(SigFields {
        algorithm,
        canonicalization,
        domain,
        selector,
        headers,
        body_hash,
        signature,
        timestamp,
        expiration,
        body_length,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_signature_tags() {
        let tagged = TaggedHeader::parse(
            "a=rsa-sha256; c=relaxed/simple; d=example.com; s=sel; h=from:to; bh=AAAA; b=BBBB",
        )
        .unwrap();
        let fields = parse_sig_fields(&tagged).unwrap();
        assert_eq!(fields.domain, "example.com");
        assert_eq!(fields.selector, "sel");
        assert_eq!(fields.headers, vec!["from", "to"]);
        assert_eq!(fields.canonicalization.header, CanonType::Relaxed);
        assert_eq!(fields.canonicalization.body, CanonType::Simple);
    }

    #[test]
    fn defaults_canonicalization_to_simple_simple() {
        let tagged =
            TaggedHeader::parse("a=rsa-sha256; d=example.com; s=sel; h=from; bh=AAAA; b=BBBB").unwrap();
        let fields = parse_sig_fields(&tagged).unwrap();
        assert_eq!(fields.canonicalization, Canonicalization::default());
    }

    #[test]
    fn rejects_missing_required_tag() {
        let tagged = TaggedHeader::parse("a=rsa-sha256; d=example.com; s=sel; h=from; b=BBBB").unwrap();
        assert!(parse_sig_fields(&tagged).is_err());
    }
}
