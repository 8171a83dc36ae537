/*
 * Copyright (c) 2020-2023, Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! DNS TXT record retrieval for DKIM/ARC public key records
//! (`<selector>._domainkey.<domain>`). [`Lookup`] is the seam: production
//! code drives it with [`HickoryResolver`], tests drive it with a
//! [`FileResolver`] loaded from a fixture file so no network access is
//! needed to exercise the chain-evaluation logic.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::TokioAsyncResolver;

use crate::common::headers::TaggedHeader;
use crate::common::lru::TtlCache;
use crate::error::{Error, Result};

/// The result of a single TXT lookup: the (possibly several, though DKIM
/// requires exactly one) records found, and whether the resolver validated
/// the response with DNSSEC.
#[derive(Debug, Clone, Default)]
pub struct TxtLookup {
    pub records: Vec<String>,
    pub dnssec_authenticated: bool,
}

#[async_trait]
pub trait Lookup: Send + Sync {
    async fn txt_lookup(&self, name: &str) -> Result<TxtLookup>;
}

/// Production resolver backed by `hickory-resolver`, with an in-process
/// TTL cache so repeated signatures from the same selector within a
/// message (or across messages, within the TTL) don't re-query DNS.
pub struct HickoryResolver {
    resolver: TokioAsyncResolver,
    cache: TtlCache<TxtLookup>,
}

impl HickoryResolver {
    pub fn new_cloudflare() -> Result<Self> {
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::cloudflare(), ResolverOpts::default());
        Ok(Self {
            resolver,
            cache: TtlCache::new(4096, Duration::from_secs(300)),
        })
    }

    pub fn from_system_conf() -> Result<Self> {
        let (config, mut opts) =
            hickory_resolver::system_conf::read_system_conf().map_err(|e| Error::DnsError(e.to_string()))?;
        opts.timeout = Duration::from_secs(5);
        Ok(Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
            cache: TtlCache::new(4096, Duration::from_secs(300)),
        })
    }
}

/// Transient DNS failures (timeouts, servfail, refused) get a couple of
/// jittered retries before giving up -- a single dropped UDP packet
/// shouldn't turn into a permanent verification failure. NXDOMAIN/no-data
/// responses are not transient and are never retried.
const MAX_DNS_ATTEMPTS: u32 = 3;
const RETRY_BASE_MILLIS: u64 = 100;
const RETRY_JITTER_MILLIS: u64 = 150;

/// `NoRecordsFound` covers both NXDOMAIN and a name that exists but has no
/// TXT data -- both mean "no key record", not "ask again later".
fn is_permanent_absence(err: &ResolveError) -> bool {
    matches!(err.kind(), ResolveErrorKind::NoRecordsFound { .. })
}

#[async_trait]
impl Lookup for HickoryResolver {
    async fn txt_lookup(&self, name: &str) -> Result<TxtLookup> {
        if let Some(cached) = self.cache.get(name) {
            tracing::trace!(%name, "TXT record cache hit");
            return Ok(cached);
        }
        let ascii_name = idna::domain_to_ascii(name).map_err(|_| Error::ParseError)?;

        let mut attempt = 0;
        let lookup = loop {
            attempt += 1;
            match self.resolver.txt_lookup(ascii_name.clone()).await {
                Ok(lookup) => break lookup,
                Err(e) if is_permanent_absence(&e) => {
                    tracing::debug!(%name, "TXT lookup returned no records (NXDOMAIN or empty)");
                    return Err(Error::DnsRecordNotFound);
                }
                Err(e) if attempt < MAX_DNS_ATTEMPTS => {
                    let jitter = {
                        use rand::Rng;
                        rand::thread_rng().gen_range(0..RETRY_JITTER_MILLIS)
                    };
                    let backoff = Duration::from_millis(RETRY_BASE_MILLIS * attempt as u64 + jitter);
                    tracing::debug!(%name, attempt, error = %e, backoff_ms = backoff.as_millis() as u64, "TXT lookup failed, retrying");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                Err(e) => {
                    tracing::debug!(%name, error = %e, "TXT lookup failed");
                    return Err(Error::DnsError(e.to_string()));
                }
            }
        };
        let dnssec_authenticated = lookup.as_lookup().query().is_dnssec();
        let records: Vec<String> = lookup
            .iter()
            .map(|txt| txt.iter().map(|s| String::from_utf8_lossy(s)).collect::<String>())
            .collect();
        tracing::trace!(%name, count = records.len(), dnssec_authenticated, "TXT lookup resolved");
        let result = TxtLookup {
            records,
            dnssec_authenticated,
        };
        self.cache.insert(name.to_string(), result.clone());
        Ok(result)
    }
}

/// Deterministic, file-backed stand-in for [`HickoryResolver`] used by the
/// integration test suite: a flat `name -> TXT value` map built directly
/// in-process, with no network or on-disk parsing required.
#[derive(Default, Clone)]
pub struct FileResolver {
    records: HashMap<String, String>,
}

impl FileResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(mut self, name: &str, value: &str) -> Self {
        self.records.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }
}

#[async_trait]
impl Lookup for FileResolver {
    async fn txt_lookup(&self, name: &str) -> Result<TxtLookup> {
        match self.records.get(&name.to_ascii_lowercase()) {
            Some(value) => Ok(TxtLookup {
                records: vec![value.clone()],
                dnssec_authenticated: false,
            }),
            None => Err(Error::DnsRecordNotFound),
        }
    }
}

/// A DKIM/ARC public key record as published at
/// `<selector>._domainkey.<domain>` (RFC 6376 section 3.6.1).
#[derive(Debug, Clone)]
pub struct DomainKeyRecord {
    pub key_type: String,
    pub public_key: Vec<u8>,
    pub testing: bool,
    pub strict: bool,
    pub hash_algorithms: Option<Vec<String>>,
}

impl DomainKeyRecord {
    pub fn parse(txt: &str) -> Result<Self> {
        let tagged = TaggedHeader::parse(txt).map_err(|_| Error::InvalidRecordType)?;
        if let Some(v) = tagged.get_str("v") {
            if v != "DKIM1" {
                return Err(Error::InvalidRecordType);
            }
        }
        let key_type = tagged.get_str("k").unwrap_or("rsa").to_string();
        if key_type != "rsa" {
            return Err(Error::UnsupportedKeyType);
        }
        let p = tagged.require("p")?.value_no_fws();
        if p.is_empty() {
            return Err(Error::RevokedPublicKey);
        }
        let public_key = base64::engine::general_purpose::STANDARD
            .decode(p)
            .map_err(|_| Error::Base64)?;
        let flags = tagged
            .get_str("t")
            .map(crate::common::util::split_csv)
            .unwrap_or_default();
        let hash_algorithms = tagged.get_str("h").map(|h| {
            crate::common::util::split_csv(h)
                .into_iter()
                .map(String::from)
                .collect()
        });
        Ok(Self {
            key_type,
            public_key,
            testing: flags.contains(&"y"),
            strict: flags.contains(&"s"),
            hash_algorithms,
        })
    }
}

/// Builds the DNS query name for a selector/domain pair, IDNA-encoding the
/// domain if it contains non-ASCII labels.
pub fn selector_query_name(selector: &str, domain: &str) -> Result<String> {
    let domain = idna::domain_to_ascii(domain).map_err(|_| Error::ParseError)?;
    Ok(format!("{selector}._domainkey.{domain}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dkim1_txt_record() {
        let rec = DomainKeyRecord::parse("v=DKIM1; k=rsa; p=AAAA; t=y:s").unwrap();
        assert_eq!(rec.key_type, "rsa");
        assert!(rec.testing);
        assert!(rec.strict);
    }

    #[test]
    fn empty_p_tag_is_revoked() {
        assert_eq!(
            DomainKeyRecord::parse("v=DKIM1; k=rsa; p=").unwrap_err(),
            Error::RevokedPublicKey
        );
    }

    #[test]
    fn builds_selector_query_name() {
        assert_eq!(
            selector_query_name("sel1", "example.com").unwrap(),
            "sel1._domainkey.example.com"
        );
    }

    #[tokio::test]
    async fn file_resolver_round_trips() {
        let resolver = FileResolver::new().with_record(
            "sel1._domainkey.example.com",
            "v=DKIM1; k=rsa; p=AAAA",
        );
        let result = resolver.txt_lookup("sel1._domainkey.example.com").await.unwrap();
        assert_eq!(result.records.len(), 1);
        assert!(!result.dnssec_authenticated);
    }
}
