/*
 * Copyright (c) 2020-2023, Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Typestate builder for producing the next ARC set on an already-ingested
//! [`Message`]: `NeedDomain -> NeedSelector -> NeedKey -> Done`, so a seal
//! can't be produced without a domain, selector and key all set first.

use std::marker::PhantomData;

use base64::Engine;

use crate::arc::{auth_results::AuthResults, MAX_ARC_INSTANCE};
use crate::common::crypto::SigningKey;
use crate::common::message::Message;
use crate::dkim::canonicalize::{build_header_hash_input, select_signed_headers, CanonType};
use crate::dkim::sign::sign_header_hash;
use crate::dkim::{ChainValidation, Canonicalization, DkimResult};
use crate::error::{Error, Result};

pub struct NeedDomain;
pub struct NeedSelector;
pub struct NeedKey;
pub struct Done;

pub struct ArcSealer<K: SigningKey, State = NeedDomain> {
    _state: PhantomData<State>,
    domain: String,
    selector: String,
    key: Option<K>,
    headers: Vec<String>,
    oversign: Vec<String>,
    canonicalization: Canonicalization,
    timestamp: Option<i64>,
}

impl<K: SigningKey> Default for ArcSealer<K, NeedDomain> {
    fn default() -> Self {
        Self {
            _state: PhantomData,
            domain: String::new(),
            selector: String::new(),
            key: None,
            headers: Vec::new(),
            oversign: Vec::new(),
            canonicalization: Canonicalization::default(),
            timestamp: None,
        }
    }
}

impl<K: SigningKey> ArcSealer<K, NeedDomain> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domain(self, domain: impl Into<String>) -> ArcSealer<K, NeedSelector> {
        ArcSealer {
            _state: PhantomData,
            domain: domain.into(),
            selector: self.selector,
            key: self.key,
            headers: self.headers,
            oversign: self.oversign,
            canonicalization: self.canonicalization,
            timestamp: self.timestamp,
        }
    }
}

impl<K: SigningKey> ArcSealer<K, NeedSelector> {
    pub fn selector(self, selector: impl Into<String>) -> ArcSealer<K, NeedKey> {
        ArcSealer {
            _state: PhantomData,
            domain: self.domain,
            selector: selector.into(),
            key: self.key,
            headers: self.headers,
            oversign: self.oversign,
            canonicalization: self.canonicalization,
            timestamp: self.timestamp,
        }
    }
}

impl<K: SigningKey> ArcSealer<K, NeedKey> {
    pub fn key(self, key: K) -> ArcSealer<K, Done> {
        ArcSealer {
            _state: PhantomData,
            domain: self.domain,
            selector: self.selector,
            key: Some(key),
            headers: self.headers,
            oversign: self.oversign,
            canonicalization: self.canonicalization,
            timestamp: self.timestamp,
        }
    }
}

impl<K: SigningKey> ArcSealer<K, Done> {
    pub fn headers(mut self, headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.headers = headers.into_iter().map(Into::into).collect();
        self
    }

    /// Names that must be "oversigned": counted as present one more time in
    /// `h=` than they actually occur in the message, so a header of that
    /// name prepended after sealing is caught by the selection algorithm
    /// rather than silently riding along unsigned (RFC 6376 section 8.15).
    pub fn oversign_headers(mut self, headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.oversign = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn header_canonicalization(mut self, c: Canonicalization) -> Self {
        self.canonicalization = c;
        self
    }

    pub fn timestamp(mut self, t: i64) -> Self {
        self.timestamp = Some(t);
        self
    }

    /// Computes the next ARC set (AAR/AMS/AS) for `message`, using `ar` as
    /// the `ARC-Authentication-Results` body -- the caller's own
    /// authentication verdict for this hop, which may either be freshly
    /// computed or an explicit override of whatever this crate itself
    /// would have derived.
    pub fn seal(&self, message: &Message, ar: &AuthResults) -> Result<SealedSet> {
        let key = self.key.as_ref().ok_or(Error::NoKey)?;
        let prior = message.prior_sets();
        let next_instance = prior.len() as u8 + 1;
        if next_instance as usize > MAX_ARC_INSTANCE as usize {
            return Err(Error::ArcChainTooLong);
        }
        if self.domain.is_empty() || self.selector.is_empty() {
            return Err(Error::MissingParameters);
        }

        let cv = if next_instance == 1 {
            ChainValidation::None
        } else {
            match message.prior_chain_result() {
                Some(DkimResult::Fail) => ChainValidation::Fail,
                Some(_) => ChainValidation::Pass,
                None => {
                    return Err(Error::Invalid(
                        "verify_chain() must be called before sealing a message that already carries ARC sets",
                    ))
                }
            }
        };

        let aar_value = format!("i={next_instance}; {}", ar.to_value_string());
        let aar_raw = format!("ARC-Authentication-Results: {aar_value}");

        let algorithm = key.algorithm();
        let hash_algorithm = algorithm.hash_algorithm();
        let body_digest = message.body_digest(self.canonicalization.body, hash_algorithm)?;
        let bh = base64::engine::general_purpose::STANDARD.encode(body_digest);

        let mut h_list = if self.headers.is_empty() {
            vec!["from".to_string()]
        } else {
            self.headers.clone()
        };
        for name in &self.oversign {
            let lname = name.to_ascii_lowercase();
            h_list.retain(|h| !h.eq_ignore_ascii_case(&lname));
            let occurrences = message.headers().iter().filter(|h| h.name_lower() == lname).count();
            for _ in 0..occurrences + 1 {
                h_list.push(name.clone());
            }
        }
        let ams_t_tag = self.timestamp.map(|t| format!("t={t}; ")).unwrap_or_default();
        let ams_value_no_b = format!(
            "i={next_instance}; a={}; c={}; d={}; s={}; h={}; {ams_t_tag}bh={bh}; b=",
            algorithm.as_str(),
            self.canonicalization.as_str(),
            self.domain,
            self.selector,
            h_list.join(":"),
        );
        let ams_raw_no_b = format!("ARC-Message-Signature: {ams_value_no_b}");

        let selected = select_signed_headers(
            &h_list.iter().map(String::as_str).collect::<Vec<_>>(),
            message.headers(),
        );
        let ams_input = build_header_hash_input(&selected, &ams_raw_no_b, self.canonicalization.header);
        let ams_signature = sign_header_hash(key, &ams_input)?;
        let ams_b = base64::engine::general_purpose::STANDARD.encode(&ams_signature);
        let ams_raw = format!("{ams_raw_no_b}{ams_b}");

        let t_tag = self.timestamp.map(|t| format!("t={t}; ")).unwrap_or_default();
        let seal_value_no_b = format!(
            "i={next_instance}; a={}; {t_tag}cv={}; d={}; s={}; b=",
            algorithm.as_str(),
            cv.as_str(),
            self.domain,
            self.selector,
        );
        let seal_raw_no_b = format!("ARC-Seal: {seal_value_no_b}");

        let mut seal_selected: Vec<&str> = Vec::new();
        for set in prior {
            seal_selected.push(&set.aar.raw);
            seal_selected.push(&set.ams.raw);
            seal_selected.push(&set.seal.raw);
        }
        seal_selected.push(&aar_raw);
        seal_selected.push(&ams_raw);
        let seal_input = build_header_hash_input(&seal_selected, &seal_raw_no_b, CanonType::Relaxed);
        let seal_signature = sign_header_hash(key, &seal_input)?;
        let seal_b = base64::engine::general_purpose::STANDARD.encode(&seal_signature);
        let seal_raw = format!("{seal_raw_no_b}{seal_b}");

        tracing::debug!(instance = next_instance, domain = %self.domain, cv = cv.as_str(), "sealed new ARC set");

        Ok(SealedSet {
            instance: next_instance,
            aar: aar_raw,
            ams: ams_raw,
            seal: seal_raw,
        })
    }
}

/// The three new header lines to prepend to the message (in AAR, AMS, AS
/// order, matching RFC 8617's recommended presentation order).
#[derive(Debug, Clone)]
pub struct SealedSet {
    pub instance: u8,
    pub aar: String,
    pub ams: String,
    pub seal: String,
}

impl SealedSet {
    pub fn header_lines(&self) -> [&str; 3] {
        [&self.aar, &self.ams, &self.seal]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::crypto::{RsaKey, Sha256};
    use crate::common::message::{Message, SignPlan};

    const TEST_RSA_PK: &str = include_str!("../../tests/data/rsa_test_key.pem");

    #[test]
    fn seals_first_instance_with_cv_none() {
        let mut msg = Message::with_sign_plan(Some(SignPlan {
            canon: crate::dkim::CanonType::Relaxed,
            hash_algorithm: crate::common::crypto::HashAlgorithm::Sha256,
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
                header: crate::dkim::CanonType::Relaxed,
                body: crate::dkim::CanonType::Relaxed,
            });

        let ar = AuthResults::parse("mx.example.com; dkim=pass header.d=example.com").unwrap();
        let sealed = sealer.seal(&msg, &ar).unwrap();
        assert_eq!(sealed.instance, 1);
        assert!(sealed.seal.contains("cv=none"));
        assert!(sealed.aar.starts_with("ARC-Authentication-Results: i=1;"));
    }

    #[test]
    fn oversigned_header_is_listed_one_more_time_than_it_occurs() {
        let mut msg = Message::with_sign_plan(Some(SignPlan {
            canon: crate::dkim::CanonType::Relaxed,
            hash_algorithm: crate::common::crypto::HashAlgorithm::Sha256,
        }));
        msg.header_field("From: a@example.com").unwrap();
        msg.header_field("Subject: hi").unwrap();
        msg.eoh().unwrap();
        msg.body(b"hello\r\n").unwrap();
        msg.eom().unwrap();

        let key = RsaKey::<Sha256>::from_pkcs1_pem(TEST_RSA_PK).unwrap();
        let sealer = ArcSealer::new()
            .domain("example.com")
            .selector("sel1")
            .key(key)
            .headers(["from", "subject"])
            .oversign_headers(["subject"])
            .header_canonicalization(Canonicalization {
                header: crate::dkim::CanonType::Relaxed,
                body: crate::dkim::CanonType::Relaxed,
            });

        let ar = AuthResults::parse("mx.example.com; dkim=pass header.d=example.com").unwrap();
        let sealed = sealer.seal(&msg, &ar).unwrap();
        // "subject" occurs once in the message, so oversigning lists it
        // twice in h=; "from" is untouched since it isn't oversigned.
        assert!(sealed.ams.contains("h=from:subject:subject;"));
    }
}
