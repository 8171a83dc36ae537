/*
 * Copyright (c) 2020-2023, Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! `From:`/`Sender:`-style address-list extraction (RFC 5322 section 3.4,
//! scoped to what a DKIM/ARC alignment check needs): recovering the
//! local-part and domain of one or more `addr-spec`s out of a header value,
//! tolerating parenthesized comments and a quoted local-part. Full mailbox
//! validation -- display-name encoding, group syntax, obsolete routes -- is
//! out of scope; this only needs to recover `(local-part, domain)` pairs.

/// Strips RFC 5322 comments (`(...)`, nesting supported, `\` escapes
/// preserved) from `s`, collapsing the result to single spaces where a
/// comment was removed so `a(comment)@b` still parses as `a@b` rather than
/// `a@b` glued together incorrectly. Quoted strings are passed through
/// untouched -- a `(` inside a `"..."` is not a comment.
fn strip_comments(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut depth = 0u32;
    let mut in_quotes = false;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            out.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == '"' {
                in_quotes = false;
            }
            continue;
        }
        if depth > 0 {
            match c {
                '\\' => {
                    chars.next();
                }
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => {
                in_quotes = true;
                out.push(c);
            }
            '(' => {
                depth += 1;
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Splits an address-list header value into its individual mailbox texts
/// on top-level commas -- i.e. commas outside quoted strings and outside
/// `<...>` angle-addr brackets (a display name is never quoted *and*
/// contains a literal comma in practice, but the bracket guard costs
/// nothing and protects against a stray comma in a route-addr).
fn split_top_level_commas(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut angle_depth = 0u32;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            cur.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    cur.push(escaped);
                }
            } else if c == '"' {
                in_quotes = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_quotes = true;
                cur.push(c);
            }
            '<' => {
                angle_depth += 1;
                cur.push(c);
            }
            '>' => {
                angle_depth = angle_depth.saturating_sub(1);
                cur.push(c);
            }
            ',' if angle_depth == 0 => {
                parts.push(std::mem::take(&mut cur));
            }
            _ => cur.push(c),
        }
    }
    if !cur.trim().is_empty() {
        parts.push(cur);
    }
    parts
}

/// Recovers the `addr-spec` substring from one mailbox's text: the content
/// of the last `<...>` pair if one is present (the common `Display Name
/// <addr-spec>` form), otherwise the whole trimmed text (bare `addr-spec`).
fn addr_spec_of(mailbox_text: &str) -> Option<&str> {
    let trimmed = mailbox_text.trim();
    if let Some(start) = trimmed.rfind('<') {
        let rest = &trimmed[start + 1..];
        let end = rest.find('>')?;
        Some(rest[..end].trim())
    } else if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Splits `addr-spec` (`local-part "@" domain`) into its two halves,
/// finding the `@` that separates them even when the local-part is a
/// quoted string containing an escaped `@`.
fn split_addr_spec(addr_spec: &str) -> Option<(&str, &str)> {
    let mut in_quotes = false;
    let mut chars = addr_spec.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' if in_quotes => {
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            '@' if !in_quotes => {
                return Some((&addr_spec[..i], &addr_spec[i + 1..]));
            }
            _ => {}
        }
    }
    None
}

/// Extracts `(local-part, domain)` from the first `addr-spec` in an
/// address-list header value (`From:`, `Sender:`, ...), tolerating
/// comments and a quoted local-part. The local-part's surrounding quotes,
/// if any, are kept (RFC 5322 treats a quoted and unquoted local-part as
/// textually different strings); the domain is lowercased with any
/// trailing dot stripped, matching [`is_subdomain`]'s comparison rules.
pub fn parse_first_mailbox(header_value: &str) -> Option<(String, String)> {
    let cleaned = strip_comments(header_value);
    let first = split_top_level_commas(&cleaned).into_iter().next()?;
    let addr_spec = addr_spec_of(&first)?;
    let (local, domain) = split_addr_spec(addr_spec)?;
    let local = local.trim().to_string();
    let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    if local.is_empty() || domain.is_empty() {
        None
    } else {
        Some((local, domain))
    }
}

/// Multi-address variant of [`parse_first_mailbox`]: parses every mailbox
/// in the address-list and returns parallel `(local-parts, domains)`
/// vectors, one entry per successfully parsed `addr-spec`. A mailbox that
/// fails to parse (malformed, no `@`, ...) is silently dropped rather than
/// aborting the whole list.
pub fn parse_all_mailboxes(header_value: &str) -> (Vec<String>, Vec<String>) {
    let cleaned = strip_comments(header_value);
    let mut locals = Vec::new();
    let mut domains = Vec::new();
    for mailbox_text in split_top_level_commas(&cleaned) {
        let Some(addr_spec) = addr_spec_of(&mailbox_text) else {
            continue;
        };
        let Some((local, domain)) = split_addr_spec(addr_spec) else {
            continue;
        };
        let local = local.trim();
        let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
        if local.is_empty() || domain.is_empty() {
            continue;
        }
        locals.push(local.to_string());
        domains.push(domain);
    }
    (locals, domains)
}

/// Extracts just the domain from a single address-list header value,
/// preferring the address inside the last `<...>` angle bracket pair and
/// falling back to the bare text if there are none.
pub fn extract_domain(header_value: &str) -> Option<String> {
    parse_first_mailbox(header_value).map(|(_, domain)| domain)
}

/// Whether `subdomain` is `base` or a subdomain of `base` (case-insensitive,
/// used for the `i=` / `d=` alignment check in DKIM/ARC signatures).
pub fn is_subdomain(subdomain: &str, base: &str) -> bool {
    let subdomain = subdomain.trim_end_matches('.').to_ascii_lowercase();
    let base = base.trim_end_matches('.').to_ascii_lowercase();
    subdomain == base || subdomain.ends_with(&format!(".{base}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_domain_from_angle_addr() {
        assert_eq!(
            extract_domain("John Doe <john@example.com>"),
            Some("example.com".to_string())
        );
    }

    #[test]
    fn extracts_domain_from_bare_addr() {
        assert_eq!(extract_domain("john@example.com"), Some("example.com".to_string()));
    }

    #[test]
    fn subdomain_matches_exact_and_nested() {
        assert!(is_subdomain("example.com", "example.com"));
        assert!(is_subdomain("mail.example.com", "example.com"));
        assert!(!is_subdomain("notexample.com", "example.com"));
    }

    #[test]
    fn parses_local_part_and_domain() {
        assert_eq!(
            parse_first_mailbox("John Doe <john.doe@example.com>"),
            Some(("john.doe".to_string(), "example.com".to_string()))
        );
    }

    #[test]
    fn tolerates_comments_around_the_address() {
        assert_eq!(
            parse_first_mailbox("john(comment)@(another comment)example.com"),
            Some(("john".to_string(), "example.com".to_string()))
        );
    }

    #[test]
    fn tolerates_nested_comments() {
        assert_eq!(
            parse_first_mailbox("john@example.com (outer (inner) comment)"),
            Some(("john".to_string(), "example.com".to_string()))
        );
    }

    #[test]
    fn keeps_quoted_local_part_with_escaped_at() {
        let (local, domain) = parse_first_mailbox("\"john\\@doe\"@example.com").unwrap();
        assert_eq!(local, "\"john\\@doe\"");
        assert_eq!(domain, "example.com");
    }

    #[test]
    fn multi_address_returns_parallel_arrays() {
        let (locals, domains) =
            parse_all_mailboxes("alice@example.com, Bob Smith <bob@example.org>, carol@example.net");
        assert_eq!(locals, vec!["alice", "bob", "carol"]);
        assert_eq!(
            domains,
            vec!["example.com".to_string(), "example.org".to_string(), "example.net".to_string()]
        );
    }

    #[test]
    fn malformed_mailbox_in_a_list_is_skipped_not_fatal() {
        let (locals, domains) = parse_all_mailboxes("not-an-address, bob@example.org");
        assert_eq!(locals, vec!["bob"]);
        assert_eq!(domains, vec!["example.org".to_string()]);
    }
}
