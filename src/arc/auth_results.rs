/*
 * Copyright (c) 2020-2023, Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Hand-written `Authentication-Results` (RFC 8601) scanner. This header
//! shape is opaque to the mail content it describes but not to its own
//! syntax: quoted strings and nested comments can both legally contain the
//! `;` and whitespace that the grammar otherwise uses as delimiters, so a
//! naive `split(';')`/`split_whitespace()` would misparse real-world
//! headers. The two top-level scanners below (`split_top_level`,
//! `strip_comments`) track quote and paren depth instead.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub ptype: String,
    pub property: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodResult {
    pub method: String,
    pub method_version: Option<u32>,
    pub result: String,
    pub reason: Option<String>,
    pub props: Vec<Property>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResults {
    pub authserv_id: String,
    pub version: Option<u32>,
    pub results: Vec<MethodResult>,
}

impl AuthResults {
    pub fn parse(value: &str) -> Result<Self> {
        let segments = split_top_level(value, ';');
        let mut segments = segments.into_iter();
        let header_part = segments.next().ok_or(Error::ParseError)?;
        let header_part = strip_comments(&header_part);
        let mut tokens = header_part.split_whitespace();
        let authserv_id = tokens.next().ok_or(Error::ParseError)?.to_string();
        let version = tokens.next().and_then(|v| v.parse::<u32>().ok());

        let mut results = Vec::new();
        for segment in segments {
            let segment = strip_comments(&segment);
            let segment = segment.trim();
            if segment.is_empty() || segment.eq_ignore_ascii_case("none") {
                continue;
            }
            results.push(parse_resinfo(segment)?);
        }

        Ok(Self {
            authserv_id,
            version,
            results,
        })
    }

    pub fn result_of(&self, method: &str) -> Option<&MethodResult> {
        self.results.iter().find(|r| r.method.eq_ignore_ascii_case(method))
    }

    /// Re-serializes into `Authentication-Results`-header-value form, used
    /// when building `ARC-Authentication-Results` around an override AR.
    pub fn to_value_string(&self) -> String {
        let mut out = self.authserv_id.clone();
        if let Some(v) = self.version {
            out.push(' ');
            out.push_str(&v.to_string());
        }
        if self.results.is_empty() {
            out.push_str("; none");
        } else {
            for r in &self.results {
                out.push_str(";\r\n    ");
                out.push_str(&r.method);
                if let Some(v) = r.method_version {
                    out.push('/');
                    out.push_str(&v.to_string());
                }
                out.push('=');
                out.push_str(&r.result);
                if let Some(reason) = &r.reason {
                    out.push_str(" reason=\"");
                    out.push_str(reason);
                    out.push('"');
                }
                for p in &r.props {
                    out.push(' ');
                    out.push_str(&p.ptype);
                    out.push('.');
                    out.push_str(&p.property);
                    out.push('=');
                    out.push_str(&p.value);
                }
            }
        }
        out
    }
}

fn parse_resinfo(segment: &str) -> Result<MethodResult> {
    let tokens = split_top_level_ws(segment);
    let mut tokens = tokens.into_iter();
    let methodspec = tokens.next().ok_or(Error::ParseError)?;
    let (method_part, result) = methodspec.split_once('=').ok_or(Error::ParseError)?;
    let (method, method_version) = match method_part.split_once('/') {
        Some((m, v)) => (m.to_string(), v.parse::<u32>().ok()),
        None => (method_part.to_string(), None),
    };

    let mut reason = None;
    let mut props = Vec::new();
    for tok in tokens {
        if let Some(rest) = tok.strip_prefix("reason=") {
            reason = Some(unquote(rest));
            continue;
        }
        if let Some((key, value)) = tok.split_once('=') {
            if let Some((ptype, property)) = key.split_once('.') {
                props.push(Property {
                    ptype: ptype.to_string(),
                    property: property.to_string(),
                    value: unquote(value),
                });
            }
        }
    }

    Ok(MethodResult {
        method,
        method_version,
        result: result.to_string(),
        reason,
        props,
    })
}

fn unquote(s: &str) -> String {
    s.trim_matches('"').to_string()
}

/// Splits `s` on `delim` at comment/quote depth zero.
fn split_top_level(s: &str, delim: char) -> Vec<String> {
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut depth = 0i32;
    let mut in_quotes = false;
    for c in s.chars() {
        match c {
            '"' if depth == 0 => {
                in_quotes = !in_quotes;
                buf.push(c);
            }
            '(' if !in_quotes => {
                depth += 1;
                buf.push(c);
            }
            ')' if !in_quotes => {
                depth = (depth - 1).max(0);
                buf.push(c);
            }
            c if c == delim && depth == 0 && !in_quotes => {
                out.push(std::mem::take(&mut buf));
            }
            _ => buf.push(c),
        }
    }
    out.push(buf);
    out
}

/// Splits on runs of whitespace at comment/quote depth zero, so a quoted
/// reason string containing spaces stays a single token.
fn split_top_level_ws(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut depth = 0i32;
    let mut in_quotes = false;
    for c in s.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                buf.push(c);
            }
            '(' if !in_quotes => {
                depth += 1;
                buf.push(c);
            }
            ')' if !in_quotes => {
                depth = (depth - 1).max(0);
                buf.push(c);
            }
            c if c.is_whitespace() && depth == 0 && !in_quotes => {
                if !buf.is_empty() {
                    out.push(std::mem::take(&mut buf));
                }
            }
            _ => buf.push(c),
        }
    }
    if !buf.is_empty() {
        out.push(buf);
    }
    out
}

/// Removes every top-level `(...)` comment (including nested parens), used
/// before tokenizing a segment on whitespace.
fn strip_comments(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut depth = 0i32;
    let mut in_quotes = false;
    for c in s.chars() {
        match c {
            '"' if depth == 0 => {
                in_quotes = !in_quotes;
                out.push(c);
            }
            '(' if !in_quotes => depth += 1,
            ')' if !in_quotes => depth = (depth - 1).max(0),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_ar_header() {
        let ar = AuthResults::parse("mx.example.com 1; dkim=pass header.d=example.com; spf=pass smtp.mailfrom=example.com").unwrap();
        assert_eq!(ar.authserv_id, "mx.example.com");
        assert_eq!(ar.version, Some(1));
        assert_eq!(ar.results.len(), 2);
        assert_eq!(ar.results[0].method, "dkim");
        assert_eq!(ar.results[0].result, "pass");
        assert_eq!(ar.results[0].props[0].ptype, "header");
        assert_eq!(ar.results[0].props[0].property, "d");
        assert_eq!(ar.results[0].props[0].value, "example.com");
    }

    #[test]
    fn parses_none_result() {
        let ar = AuthResults::parse("mx.example.com; none").unwrap();
        assert!(ar.results.is_empty());
    }

    #[test]
    fn tolerates_comments_containing_semicolons() {
        let ar = AuthResults::parse("mx.example.com; dkim=pass (good; signature) header.d=example.com").unwrap();
        assert_eq!(ar.results.len(), 1);
        assert_eq!(ar.results[0].result, "pass");
    }

    #[test]
    fn parses_reason_with_quoted_spaces() {
        let ar = AuthResults::parse("mx.example.com; dkim=fail reason=\"bad signature\"").unwrap();
        assert_eq!(ar.results[0].reason.as_deref(), Some("bad signature"));
    }

    #[test]
    fn serializes_back_to_value_string() {
        let ar = AuthResults::parse("mx.example.com 1; dkim=pass header.d=example.com").unwrap();
        let s = ar.to_value_string();
        assert!(s.contains("dkim=pass"));
        assert!(s.contains("mx.example.com"));
    }
}
