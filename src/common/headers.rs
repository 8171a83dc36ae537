/*
 * Copyright (c) 2020-2023, Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Tag-list parsing shared by `DKIM-Signature`, `ARC-Message-Signature` and
//! `ARC-Seal` header bodies (`tag-list = tag-spec *( ";" tag-spec ) [ ";" ]`,
//! RFC 6376 section 3.2). Every one of those headers is a semicolon
//! separated `name=value` list, so the list-level syntax lives here and the
//! three callers only add their own required-tag checks on top.

use indexmap::IndexMap;

use crate::error::{Error, Result};

fn is_fws(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// A single header field as delivered to the engine: the raw `Name: value`
/// text, with no trailing CRLF, exactly as it appeared on the wire.
#[derive(Debug, Clone)]
pub struct HeaderField {
    pub name: String,
    pub raw: String,
}

impl HeaderField {
    /// Splits `Name: value` into the header name (preserved case) and the
    /// value with the single colon and any immediately-following FWS
    /// removed. Returns an error if there is no colon.
    pub fn parse(raw: &str) -> Result<Self> {
        let colon = raw.find(':').ok_or(Error::ParseError)?;
        let name = raw[..colon].trim_end_matches(|c| c == ' ' || c == '\t');
        if name.is_empty() || name.contains(['\r', '\n']) {
            return Err(Error::ParseError);
        }
        Ok(Self {
            name: name.to_string(),
            raw: raw.to_string(),
        })
    }

    pub fn name_lower(&self) -> String {
        self.name.to_ascii_lowercase()
    }

    /// The header value: everything after the first colon, with leading FWS
    /// stripped but internal folding preserved verbatim.
    pub fn value(&self) -> &str {
        let colon = self.raw.find(':').unwrap_or(self.raw.len());
        self.raw[colon + 1..].trim_start_matches(|c| c == ' ' || c == '\t')
    }
}

/// A parsed `name=value` entry from a tag-list, trimmed of surrounding FWS.
#[derive(Debug, Clone)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    /// The value with *all* whitespace removed, used for `b=`/`bh=` where
    /// base64 text may be folded across several lines.
    pub fn value_no_fws(&self) -> String {
        self.value.chars().filter(|c| !is_fws(*c)).collect()
    }
}

/// A parsed tag-list together with the original header value it came from.
/// `raw` is kept so that signature verification can re-derive the
/// "b= stripped" form byte-for-byte instead of re-serializing the tags.
#[derive(Debug, Clone)]
pub struct TaggedHeader {
    tags: IndexMap<String, Tag>,
    pub raw: String,
}

impl TaggedHeader {
    pub fn parse(value: &str) -> Result<Self> {
        let mut tags = IndexMap::new();
        for spec in split_tag_specs(value) {
            let spec = spec.trim_matches(is_fws);
            if spec.is_empty() {
                continue;
            }
            let eq = spec.find('=').ok_or(Error::ParseError)?;
            let name = spec[..eq].trim_matches(is_fws);
            let tag_value = spec[eq + 1..].trim_matches(is_fws);
            if name.is_empty() || !name.chars().next().unwrap().is_ascii_alphabetic() {
                return Err(Error::ParseError);
            }
            if !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(Error::ParseError);
            }
            if tags
                .insert(
                    name.to_string(),
                    Tag {
                        name: name.to_string(),
                        value: tag_value.to_string(),
                    },
                )
                .is_some()
            {
                return Err(Error::ParseError);
            }
        }
        if tags.is_empty() {
            return Err(Error::MissingParameters);
        }
        Ok(Self {
            tags,
            raw: value.to_string(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&Tag> {
        self.tags.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(|t| t.value.as_str())
    }

    pub fn require(&self, name: &str) -> Result<&Tag> {
        self.tags.get(name).ok_or(Error::MissingParameters)
    }

    pub fn require_str(&self, name: &str) -> Result<&str> {
        self.require(name).map(|t| t.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tags.contains_key(name)
    }

    pub fn tags(&self) -> impl Iterator<Item = &Tag> {
        self.tags.values()
    }
}

/// Splits `tag-list` into its `tag-spec` substrings on unescaped `;`.
/// Tag values in this grammar never contain `;`, so a byte-level split is
/// sufficient.
fn split_tag_specs(value: &str) -> Vec<&str> {
    value.split(';').collect()
}

/// Produces the tag-list text with the named tag's value blanked out (but
/// its name, `=`, and the surrounding delimiters left untouched), matching
/// RFC 6376's "remove the value of the `b=` tag" instruction for computing
/// a signature's own hash.
pub fn strip_tag_value(raw: &str, tag_name: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for (i, spec) in raw.split(';').enumerate() {
        if i > 0 {
            out.push(';');
        }
        let trimmed_start = spec.len() - spec.trim_start_matches(is_fws).len();
        let (leading, rest) = spec.split_at(trimmed_start);
        out.push_str(leading);
        if let Some(eq) = rest.find('=') {
            let name = rest[..eq].trim_matches(is_fws);
            if name == tag_name {
                out.push_str(&rest[..eq + 1]);
                continue;
            }
        }
        out.push_str(rest);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_tag_list() {
        let h = TaggedHeader::parse("v=1; a=rsa-sha256; d=example.com; s=sel; h=from; b=abc").unwrap();
        assert_eq!(h.get_str("v"), Some("1"));
        assert_eq!(h.get_str("a"), Some("rsa-sha256"));
        assert_eq!(h.get_str("d"), Some("example.com"));
    }

    #[test]
    fn rejects_duplicate_tags() {
        assert!(TaggedHeader::parse("a=1; a=2").is_err());
    }

    #[test]
    fn tolerates_folded_whitespace_in_values() {
        let h = TaggedHeader::parse("bh=\r\n abc\r\n def; a=rsa-sha256").unwrap();
        assert_eq!(h.get("bh").unwrap().value_no_fws(), "abcdef");
    }

    #[test]
    fn strip_b_preserves_surrounding_bytes() {
        let raw = "v=1; a=rsa-sha256; b=AAAA\r\n BBBB; bh=xyz";
        let stripped = strip_tag_value(raw, "b");
        assert_eq!(stripped, "v=1; a=rsa-sha256; b=; bh=xyz");
    }

    #[test]
    fn header_field_splits_name_and_value() {
        let hf = HeaderField::parse("Subject:  hello world").unwrap();
        assert_eq!(hf.name, "Subject");
        assert_eq!(hf.value(), "hello world");
        assert_eq!(hf.name_lower(), "subject");
    }
}
