/*
 * Copyright (c) 2020-2023, Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! # mail-arc
//!
//! An implementation of the Authenticated Received Chain (ARC, RFC 8617),
//! built on the DKIM (RFC 6376) primitives it reuses: tag-list parsing,
//! `simple`/`relaxed` canonicalization and RSA-SHA1/RSA-SHA256 signing and
//! verification.
//!
//! Messages are fed to a [`common::message::Message`] the way a milter
//! would stream them in -- one header field at a time, then the body in
//! arbitrary-sized chunks -- so that canonicalization and hashing happen
//! incrementally instead of requiring the whole message in memory:
//!
//! ```no_run
//! use mail_arc::common::message::Message;
//! use mail_arc::common::resolver::HickoryResolver;
//!
//! # async fn run() -> mail_arc::Result<()> {
//! let resolver = HickoryResolver::new_cloudflare()?;
//! let mut message = Message::new();
//! message.header_field("From: alice@example.com")?;
//! message.header_field("ARC-Seal: i=1; a=rsa-sha256; cv=none; d=example.com; s=sel; b=...")?;
//! message.eoh()?;
//! message.body(b"Hi there\r\n")?;
//! message.eom()?;
//!
//! let outcome = message.verify_chain(&resolver).await;
//! println!("arc={}", outcome.result().as_str());
//! # Ok(())
//! # }
//! ```
//!
//! Sealing a verified message with a new ARC set goes through
//! [`arc::seal::ArcSealer`], a typestate builder that mirrors the shape of
//! a DKIM signer:
//!
//! ```no_run
//! use mail_arc::arc::auth_results::AuthResults;
//! use mail_arc::arc::seal::ArcSealer;
//! use mail_arc::common::crypto::{RsaKey, Sha256};
//! use mail_arc::common::message::Message;
//!
//! # fn run(message: &Message, pk_pem: &str) -> mail_arc::Result<()> {
//! let key = RsaKey::<Sha256>::from_pkcs1_pem(pk_pem)?;
//! let ar = AuthResults::parse("mx.example.com; dkim=pass header.d=example.com")?;
//!
//! let sealed = ArcSealer::new()
//!     .domain("example.com")
//!     .selector("sel1")
//!     .key(key)
//!     .headers(["from", "subject"])
//!     .seal(message, &ar)?;
//!
//! for line in sealed.header_lines() {
//!     println!("{line}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod arc;
pub mod common;
pub mod dkim;
mod error;

pub use error::{Error, Result, Status};
