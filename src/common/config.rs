/*
 * Copyright (c) 2020-2023, Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Aggregate configuration knobs for driving a [`Message`] and
//! [`ArcSealer`] from one place, gathering the option table a caller would
//! otherwise thread through by hand one setter at a time.

use std::path::PathBuf;

use crate::arc::seal::{ArcSealer, Done};
use crate::common::crypto::{Algorithm, SigningKey};
use crate::common::message::{Message, SignPlan};
use crate::common::verify::MIN_RSA_KEY_BITS;
use crate::dkim::{CanonType, Canonicalization};

/// Which operations a [`Config`] is permitted to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sign,
    Verify,
    Both,
}

impl Mode {
    pub fn can_sign(self) -> bool {
        matches!(self, Mode::Sign | Mode::Both)
    }

    pub fn can_verify(self) -> bool {
        matches!(self, Mode::Verify | Mode::Both)
    }
}

/// Every option a driver can set before handing a message to this crate.
/// Plain struct with [`Default`], not a typestate builder: unlike
/// `ArcSealer`'s domain/selector/key, none of these fields require each
/// other to be set first.
#[derive(Debug, Clone)]
pub struct Config {
    pub canon_hdr: CanonType,
    pub canon_body: CanonType,
    pub sign_alg: Algorithm,
    pub mode: Mode,
    pub min_key_bits: usize,
    pub signature_ttl: Option<i64>,
    pub fixed_time: Option<i64>,
    pub sign_hdrs: Vec<String>,
    pub oversign_hdrs: Vec<String>,
    /// Flat-file key source for tests. Reading it is left to the driver;
    /// this crate's own test fixture is
    /// [`crate::common::resolver::FileResolver`], built programmatically
    /// rather than loaded from a path.
    pub test_keys: Option<PathBuf>,
    /// Directory to tee canonicalized bytes into for debugging. Carried as
    /// a knob for interface parity; nothing in this crate reads it, since
    /// the only consumer in the original implementation was an interactive
    /// debugging aid rather than something the chain engine itself needs.
    pub tmpdir: Option<PathBuf>,
    pub keep_tmpfiles: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            canon_hdr: CanonType::Relaxed,
            canon_body: CanonType::Relaxed,
            sign_alg: Algorithm::RsaSha256,
            mode: Mode::Both,
            min_key_bits: MIN_RSA_KEY_BITS,
            signature_ttl: None,
            fixed_time: None,
            sign_hdrs: vec!["from".to_string()],
            oversign_hdrs: Vec::new(),
            test_keys: None,
            tmpdir: None,
            keep_tmpfiles: false,
        }
    }
}

impl Config {
    pub fn header_canonicalization(&self) -> Canonicalization {
        Canonicalization {
            header: self.canon_hdr,
            body: self.canon_body,
        }
    }

    pub fn sign_plan(&self) -> SignPlan {
        SignPlan {
            canon: self.canon_body,
            hash_algorithm: self.sign_alg.hash_algorithm(),
        }
    }

    /// Wires `signature_ttl`, `fixed_time` and `min_key_bits` onto an
    /// already-constructed `Message` -- the knobs that affect verification
    /// rather than message construction itself.
    pub fn apply_to_message(&self, message: &mut Message) {
        if let Some(ttl) = self.signature_ttl {
            message.set_signature_ttl(ttl);
        }
        if let Some(now) = self.fixed_time {
            message.set_fixed_time(now);
        }
        message.set_min_key_bits(self.min_key_bits);
    }

    /// Applies `sign_hdrs`, `oversign_hdrs` and the configured header
    /// canonicalization to an already domain/selector/key-configured
    /// sealer.
    pub fn configure_sealer<K: SigningKey>(&self, sealer: ArcSealer<K, Done>) -> ArcSealer<K, Done> {
        sealer
            .headers(self.sign_hdrs.clone())
            .oversign_headers(self.oversign_hdrs.clone())
            .header_canonicalization(self.header_canonicalization())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_common_dkim_practice() {
        let config = Config::default();
        assert_eq!(config.canon_hdr, CanonType::Relaxed);
        assert_eq!(config.min_key_bits, MIN_RSA_KEY_BITS);
        assert!(config.mode.can_sign());
        assert!(config.mode.can_verify());
    }

    #[test]
    fn sign_only_mode_cannot_verify() {
        assert!(!Mode::Sign.can_verify());
        assert!(Mode::Verify.can_verify());
    }
}
