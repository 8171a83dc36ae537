/*
 * Copyright (c) 2020-2023, Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! The streaming ingestion engine: a `Message` is fed header fields and
//! body bytes one call at a time, mirroring a milter-style driver contract
//! (`header_field` / `eoh` / `body` / `eom`), and only talks to the
//! network once, in [`Message::verify_chain`], after every byte of the
//! message has already been canonicalized and hashed.

use std::collections::HashMap;

use crate::arc::verify::{BodyDigestKey, BodyDigests};
use crate::arc::{discover_sets, ArcOutput, ArcSet};
use crate::common::crypto::HashAlgorithm;
use crate::common::headers::HeaderField;
use crate::common::resolver::Lookup;
use crate::dkim::canonicalize::{BodyCanonicalizer, CanonType};
use crate::dkim::DkimResult;
use crate::error::{Error, Result};

/// What a [`Message`] is being ingested for. Only affects which body
/// canonicalizers get instantiated at `eoh()`: `Verify` needs one per
/// distinct `(c=, a=, l=)` found among the existing `ARC-Message-Signature`
/// headers, `Sign` additionally needs the one the caller's future
/// [`crate::arc::seal::ArcSealer`] call will use.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignPlan {
    pub canon: CanonType,
    pub hash_algorithm: HashAlgorithm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IngestState {
    Headers,
    Body,
    Done,
}

pub struct Message {
    state: IngestState,
    headers: Vec<HeaderField>,
    body_canons: HashMap<BodyDigestKey, BodyCanonicalizer>,
    body_digests: BodyDigests,
    raw_body_len: u64,
    sets: Vec<ArcSet>,
    sign_plan: Option<SignPlan>,
    fix_crlf: bool,
    chain_result: Option<DkimResult>,
    cv_override: Option<DkimResult>,
    signature_ttl: Option<i64>,
    fixed_time: Option<i64>,
    min_key_bits: usize,
}

impl Message {
    pub fn new() -> Self {
        Self::with_sign_plan(None)
    }

    /// `sign_plan` registers the body canonicalization the caller intends
    /// to use for a future seal, so its digest is ready by `eom()` even
    /// when the message currently has zero ARC sets.
    pub fn with_sign_plan(sign_plan: Option<SignPlan>) -> Self {
        Self {
            state: IngestState::Headers,
            headers: Vec::new(),
            body_canons: HashMap::new(),
            body_digests: HashMap::new(),
            raw_body_len: 0,
            sets: Vec::new(),
            sign_plan,
            fix_crlf: true,
            chain_result: None,
            cv_override: None,
            signature_ttl: None,
            fixed_time: None,
            min_key_bits: crate::common::verify::MIN_RSA_KEY_BITS,
        }
    }

    /// Forces the next [`Self::verify_chain`] call's verdict to `cv`,
    /// regardless of what crypto verification computes -- for a driver
    /// that already trusts an external `Authentication-Results: ... arc=`
    /// captured from an upstream hop and wants that verdict to win.
    pub fn set_cv(&mut self, cv: DkimResult) {
        self.cv_override = Some(cv);
    }

    /// Rejects any key record narrower than `bits` during chain
    /// verification (RFC 8301 deprecates sub-1024-bit RSA).
    pub fn set_min_key_bits(&mut self, bits: usize) {
        self.min_key_bits = bits;
    }

    /// Configures the `t=`+ttl expiry check applied to every `ARC-Message-Signature`
    /// and `ARC-Seal` during [`Self::verify_chain`]. Unset means no ttl-based
    /// expiry (only an explicit `x=` tag, where present, is honored).
    pub fn set_signature_ttl(&mut self, ttl: i64) {
        self.signature_ttl = Some(ttl);
    }

    /// Overrides "now" for expiry checks, for deterministic tests.
    pub fn set_fixed_time(&mut self, now: i64) {
        self.fixed_time = Some(now);
    }

    pub fn header_field(&mut self, raw: &str) -> Result<()> {
        if self.state != IngestState::Headers {
            return Err(Error::Invalid("header_field() called after eoh()"));
        }
        self.headers.push(HeaderField::parse(raw)?);
        Ok(())
    }

    pub fn eoh(&mut self) -> Result<()> {
        if self.state != IngestState::Headers {
            return Err(Error::Invalid("eoh() called more than once"));
        }
        self.sets = discover_sets(&self.headers)?;

        let mut keys: Vec<BodyDigestKey> = crate::arc::body_canon_keys(&self.sets);
        if let Some(plan) = self.sign_plan {
            let key = (plan.canon, plan.hash_algorithm, None);
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        for key in keys {
            self.body_canons
                .entry(key)
                .or_insert_with(|| BodyCanonicalizer::new(key.0, key.1, key.2, self.fix_crlf));
        }

        self.state = IngestState::Body;
        Ok(())
    }

    pub fn body(&mut self, data: &[u8]) -> Result<()> {
        if self.state != IngestState::Body {
            return Err(Error::Invalid("body() called before eoh() or after eom()"));
        }
        for canon in self.body_canons.values_mut() {
            canon.feed(data);
        }
        self.raw_body_len += data.len() as u64;
        Ok(())
    }

    /// Smallest number of canonical bytes still wanted by any active body
    /// canonicalizer, or `None` if at least one is unbounded (no `l=`).
    pub fn minbody(&self) -> Option<u64> {
        self.body_canons
            .values()
            .fold(None, |acc, c| crate::common::util::min_opt(acc, c.remaining()))
    }

    pub fn eom(&mut self) -> Result<()> {
        if self.state != IngestState::Body {
            return Err(Error::Invalid("eom() called before eoh() or more than once"));
        }
        for (key, canon) in self.body_canons.drain() {
            self.body_digests.insert(key, canon.finish().as_ref().to_vec());
        }
        self.state = IngestState::Done;
        Ok(())
    }

    /// Runs the chain evaluation and caches its result so a subsequent
    /// [`crate::arc::seal::ArcSealer::seal`] call can set `cv=` correctly
    /// without re-querying DNS.
    pub async fn verify_chain(&mut self, resolver: &dyn Lookup) -> ArcOutput {
        let now = self.fixed_time.unwrap_or_else(|| chrono::Utc::now().timestamp());
        let mut output = crate::arc::verify::verify_chain(
            self.sets.clone(),
            &self.headers,
            &self.body_digests,
            resolver,
            self.signature_ttl,
            now,
            self.raw_body_len,
            self.min_key_bits,
        )
        .await;
        if let Some(cv) = self.cv_override {
            tracing::debug!(forced = cv.as_str(), "chain verdict overridden via set_cv");
            output.result = cv;
        }
        self.chain_result = Some(output.result);
        output
    }

    /// The cached result of the last [`Self::verify_chain`] call, or `None`
    /// if the message was never verified. `DkimResult::Fail` is the only
    /// outcome that means the existing chain is broken; `None` and `Pass`
    /// both mean every existing link validated.
    pub fn prior_chain_result(&self) -> Option<DkimResult> {
        self.chain_result
    }

    pub fn headers(&self) -> &[HeaderField] {
        &self.headers
    }

    pub fn prior_sets(&self) -> &[ArcSet] {
        &self.sets
    }

    pub fn body_digest(&self, canon: CanonType, hash_algorithm: HashAlgorithm) -> Result<&[u8]> {
        self.body_digests
            .get(&(canon, hash_algorithm, None))
            .map(Vec::as_slice)
            .ok_or(Error::Invalid("body digest requested for a (c=, a=) pair never registered"))
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits a raw RFC 5322 message into its individual header field lines
/// (folded continuations kept attached to the header they belong to) and
/// its body. Used by tests and by callers that have a whole message in
/// memory rather than a true streaming source; production drivers are
/// expected to call `header_field`/`body` directly as the message arrives.
pub fn split_raw_message(raw: &str) -> (Vec<String>, Vec<u8>) {
    let mut lines = raw.split("\r\n").peekable();
    let mut header_lines: Vec<String> = Vec::new();
    while let Some(line) = lines.peek() {
        if line.is_empty() {
            lines.next();
            break;
        }
        let line = lines.next().unwrap();
        if (line.starts_with(' ') || line.starts_with('\t')) && !header_lines.is_empty() {
            let last = header_lines.last_mut().unwrap();
            last.push_str("\r\n");
            last.push_str(line);
        } else {
            header_lines.push(line.to_string());
        }
    }
    let body: Vec<&str> = lines.collect();
    let body = body.join("\r\n").into_bytes();
    (header_lines, body)
}

/// Folds a completed chain evaluation's result into a coarse
/// `DkimResult`-shaped summary the same way [`crate::arc::verify`] already
/// does; re-exported here for callers that only hold a finished
/// [`ArcOutput`] and want the one-line verdict.
pub fn summarize(output: &ArcOutput) -> DkimResult {
    output.result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_body_before_eoh() {
        let mut msg = Message::new();
        assert_eq!(
            msg.body(b"hi").unwrap_err(),
            Error::Invalid("body() called before eoh() or after eom()")
        );
    }

    #[test]
    fn rejects_header_field_after_eoh() {
        let mut msg = Message::new();
        msg.header_field("Subject: hi").unwrap();
        msg.eoh().unwrap();
        assert!(msg.header_field("From: a@example.com").is_err());
    }

    #[test]
    fn full_ingestion_happy_path_with_no_arc_headers() {
        let mut msg = Message::with_sign_plan(Some(SignPlan {
            canon: CanonType::Relaxed,
            hash_algorithm: HashAlgorithm::Sha256,
        }));
        msg.header_field("From: a@example.com").unwrap();
        msg.header_field("Subject: hi").unwrap();
        msg.eoh().unwrap();
        msg.body(b"hello").unwrap();
        msg.body(b" world\r\n").unwrap();
        msg.eom().unwrap();
        assert!(msg.body_digest(CanonType::Relaxed, HashAlgorithm::Sha256).is_ok());
        assert!(msg.prior_sets().is_empty());
    }

    #[test]
    fn splits_raw_message_preserving_folded_headers() {
        let raw = "From: a@example.com\r\nSubject: hi\r\n there\r\n\r\nbody line 1\r\nbody line 2\r\n";
        let (headers, body) = split_raw_message(raw);
        assert_eq!(headers, vec!["From: a@example.com", "Subject: hi\r\n there"]);
        assert_eq!(body, b"body line 1\r\nbody line 2\r\n");
    }
}
