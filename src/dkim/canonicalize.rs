/*
 * Copyright (c) 2020-2023, Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! The `simple`/`relaxed` canonicalization algorithms (RFC 6376 section
//! 3.4), plus the streaming body automaton that lets the engine hash a
//! message body as it arrives in arbitrarily sized `body()` chunks rather
//! than buffering the whole thing.

use crate::common::crypto::HashAlgorithm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonType {
    Simple,
    Relaxed,
}

impl CanonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Relaxed => "relaxed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "simple" => Some(Self::Simple),
            "relaxed" => Some(Self::Relaxed),
            _ => None,
        }
    }
}

/// The `c=` tag: a header algorithm and a body algorithm, independently
/// selectable (`c=relaxed/simple` is common and legal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canonicalization {
    pub header: CanonType,
    pub body: CanonType,
}

impl Default for Canonicalization {
    fn default() -> Self {
        Self {
            header: CanonType::Simple,
            body: CanonType::Simple,
        }
    }
}

impl Canonicalization {
    pub fn parse(s: &str) -> Option<Self> {
        match s.split_once('/') {
            Some((h, b)) => Some(Self {
                header: CanonType::parse(h)?,
                body: CanonType::parse(b)?,
            }),
            None => {
                let t = CanonType::parse(s)?;
                Some(Self { header: t, body: t })
            }
        }
    }

    pub fn as_str(&self) -> String {
        format!("{}/{}", self.header.as_str(), self.body.as_str())
    }
}

/// Canonicalizes one `Name:value` header line (no trailing CRLF) in place.
pub fn canon_header(raw: &str, t: CanonType) -> Vec<u8> {
    match t {
        CanonType::Simple => raw.as_bytes().to_vec(),
        CanonType::Relaxed => relaxed_header(raw).into_bytes(),
    }
}

fn relaxed_header(raw: &str) -> String {
    let colon = raw.find(':').unwrap_or(raw.len());
    let name = raw[..colon].trim().to_ascii_lowercase();
    let value = &raw[colon.min(raw.len())..];
    let value = value.strip_prefix(':').unwrap_or(value);
    let mut out_value = String::with_capacity(value.len());
    let mut last_was_wsp = false;
    for c in value.chars() {
        if c == ' ' || c == '\t' || c == '\r' || c == '\n' {
            last_was_wsp = true;
            continue;
        }
        if last_was_wsp && !out_value.is_empty() {
            out_value.push(' ');
        }
        last_was_wsp = false;
        out_value.push(c);
    }
    format!("{name}:{}", out_value.trim_end())
}

/// Builds the exact byte sequence that gets hashed for a header set: each
/// selected header canonicalized and CRLF-terminated, followed by the
/// signature header itself (already stripped of its `b=` value),
/// canonicalized *without* a trailing CRLF.
pub fn build_header_hash_input(selected: &[&str], self_header_stripped: &str, t: CanonType) -> Vec<u8> {
    let mut buf = Vec::new();
    for raw in selected {
        buf.extend(canon_header(raw, t));
        buf.extend_from_slice(b"\r\n");
    }
    buf.extend(canon_header(self_header_stripped, t));
    buf
}

/// Picks, for each name in `h=` (in the order listed), the last
/// not-yet-used header among `headers` with a case-insensitive matching
/// name (RFC 6376 section 5.4.2: "last, first" from the bottom of the
/// header block). Names with no remaining match are simply skipped: an
/// absent header contributes nothing to the hash even though it is still
/// listed in `h=`.
pub fn select_signed_headers<'a>(h_list: &[&str], headers: &'a [crate::common::headers::HeaderField]) -> Vec<&'a str> {
    let mut used = vec![false; headers.len()];
    let mut selected = Vec::with_capacity(h_list.len());
    for name in h_list {
        let name_lower = name.to_ascii_lowercase();
        if let Some(idx) = headers
            .iter()
            .enumerate()
            .rev()
            .find(|(i, h)| !used[*i] && h.name_lower() == name_lower)
            .map(|(i, _)| i)
        {
            used[idx] = true;
            selected.push(headers[idx].raw.as_str());
        }
    }
    selected
}

/// Streaming `simple`/`relaxed` body canonicalizer. Bytes are fed
/// incrementally via [`feed`](Self::feed); `finish` produces the digest of
/// the canonical body, applying the `l=` length cap if one was given.
///
/// Internally this is a 4-state automaton over line boundaries: a line is
/// buffered until its terminating CRLF is seen, at which point it is
/// either blank (deferred, since trailing blank lines are dropped) or
/// non-blank (flushes any deferred blank lines as bare CRLFs, then itself).
pub struct BodyCanonicalizer {
    canon: CanonType,
    hash_algorithm: HashAlgorithm,
    hasher: Hasher,
    limit: Option<u64>,
    cur_line: Vec<u8>,
    pending_blank_lines: u64,
    emitted_any: bool,
    last_was_cr: bool,
    fix_crlf: bool,
}

enum Hasher {
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
}

impl Hasher {
    fn new(alg: HashAlgorithm) -> Self {
        use sha2::Digest;
        match alg {
            HashAlgorithm::Sha1 => Hasher::Sha1(sha1::Sha1::new()),
            HashAlgorithm::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        use sha2::Digest;
        match self {
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    fn finalize(self) -> crate::common::crypto::HashOutput {
        use crate::common::crypto::HashOutput;
        use sha2::Digest as _;
        match self {
            Hasher::Sha1(h) => HashOutput::Sha1(h.finalize()),
            Hasher::Sha256(h) => HashOutput::Sha256(h.finalize()),
        }
    }
}

impl BodyCanonicalizer {
    pub fn new(canon: CanonType, hash_algorithm: HashAlgorithm, limit: Option<u64>, fix_crlf: bool) -> Self {
        Self {
            canon,
            hash_algorithm,
            hasher: Hasher::new(hash_algorithm),
            limit,
            cur_line: Vec::new(),
            pending_blank_lines: 0,
            emitted_any: false,
            last_was_cr: false,
            fix_crlf,
        }
    }

    /// Bytes of canonical output still permitted under `l=`, or `None` if
    /// unbounded. Used by the engine to compute the overall `minbody()`.
    pub fn remaining(&self) -> Option<u64> {
        self.limit
    }

    fn emit(&mut self, data: &[u8]) {
        let data = match self.limit {
            Some(remaining) => {
                let take = (remaining as usize).min(data.len());
                self.limit = Some(remaining - take as u64);
                &data[..take]
            }
            None => data,
        };
        if !data.is_empty() {
            self.hasher.update(data);
            self.emitted_any = true;
        }
    }

    fn flush_line(&mut self) {
        let blank = match self.canon {
            CanonType::Simple => self.cur_line.is_empty(),
            CanonType::Relaxed => {
                let relaxed = relaxed_body_line(&self.cur_line);
                self.cur_line = relaxed;
                self.cur_line.is_empty()
            }
        };
        if blank {
            self.pending_blank_lines += 1;
        } else {
            for _ in 0..self.pending_blank_lines {
                self.emit(b"\r\n");
            }
            self.pending_blank_lines = 0;
            let line = std::mem::take(&mut self.cur_line);
            self.emit(&line);
            self.emit(b"\r\n");
        }
        self.cur_line.clear();
    }

    /// Feeds raw (un-canonicalized) body bytes. May be called any number of
    /// times with arbitrarily sized chunks.
    pub fn feed(&mut self, data: &[u8]) {
        for &b in data {
            match b {
                b'\r' => {
                    if self.last_was_cr {
                        // A second bare CR before any LF/non-CR byte: the
                        // first CR is its own terminator event, not merged
                        // into this one.
                        if self.fix_crlf {
                            self.flush_line();
                        } else {
                            self.cur_line.push(b'\r');
                        }
                    }
                    self.last_was_cr = true;
                }
                b'\n' => {
                    self.flush_line();
                    self.last_was_cr = false;
                }
                _ => {
                    if self.last_was_cr {
                        self.last_was_cr = false;
                        if self.fix_crlf {
                            // bare CR: treat as a line terminator, same as a bare LF.
                            self.flush_line();
                        } else {
                            self.cur_line.push(b'\r');
                        }
                    }
                    self.cur_line.push(b);
                }
            }
        }
        if self.last_was_cr && self.fix_crlf {
            // A bare CR at the very end of a chunk is resolved once we know
            // whether the next byte is the matching LF; nothing to do here.
        }
    }

    /// Finalizes the canonical body and returns its digest. `simple` and
    /// `relaxed` both canonicalize a fully empty body to a single CRLF
    /// (RFC 6376 section 3.4.3's special case, applied uniformly).
    pub fn finish(mut self) -> crate::common::crypto::HashOutput {
        if self.last_was_cr {
            self.cur_line.push(b'\r');
        }
        if !self.cur_line.is_empty() {
            // Unterminated final line: still counts as content, gets a CRLF.
            self.flush_line();
        }
        // Trailing blank lines are dropped, never replayed.
        if !self.emitted_any {
            self.emit(b"\r\n");
        }
        self.hasher.finalize()
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash_algorithm
    }
}

fn relaxed_body_line(line: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len());
    let mut last_was_wsp = false;
    for &b in line {
        if b == b' ' || b == b'\t' {
            last_was_wsp = true;
            continue;
        }
        if last_was_wsp && !out.is_empty() {
            out.push(b' ');
        }
        last_was_wsp = false;
        out.push(b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_body(canon: CanonType, body: &[u8]) -> Vec<u8> {
        let mut c = BodyCanonicalizer::new(canon, HashAlgorithm::Sha256, None, true);
        c.feed(body);
        c.finish().as_ref().to_vec()
    }

    #[test]
    fn empty_body_hashes_as_single_crlf() {
        use sha2::Digest;
        let simple = hash_body(CanonType::Simple, b"");
        let expect = sha2::Sha256::digest(b"\r\n");
        assert_eq!(simple, expect.to_vec());
    }

    #[test]
    fn trailing_blank_lines_are_stripped() {
        let a = hash_body(CanonType::Simple, b"hi\r\n\r\n\r\n");
        let b = hash_body(CanonType::Simple, b"hi\r\n");
        assert_eq!(a, b);
    }

    #[test]
    fn relaxed_collapses_internal_whitespace_and_trailing_wsp() {
        let a = hash_body(CanonType::Relaxed, b"a  b \t\r\n");
        let b = hash_body(CanonType::Relaxed, b"a b\r\n");
        assert_eq!(a, b);
    }

    #[test]
    fn relaxed_empty_body_also_hashes_as_crlf() {
        let a = hash_body(CanonType::Relaxed, b"");
        let b = hash_body(CanonType::Relaxed, b"\r\n");
        assert_eq!(a, b);
    }

    #[test]
    fn select_signed_headers_picks_last_unused_match() {
        use crate::common::headers::HeaderField;
        let headers = vec![
            HeaderField::parse("From: a@example.com").unwrap(),
            HeaderField::parse("From: b@example.com").unwrap(),
            HeaderField::parse("Subject: hi").unwrap(),
        ];
        let selected = select_signed_headers(&["from", "from", "subject", "to"], &headers);
        assert_eq!(
            selected,
            vec!["From: b@example.com", "From: a@example.com", "Subject: hi"]
        );
    }
}
