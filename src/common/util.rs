/*
 * Copyright (c) 2020-2023, Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Small buffer and string helpers shared by the canonicalizers and tag
//! parsers.

/// A byte sink with an optional cap, used anywhere a fixed-size staging
/// buffer is needed. `push` silently truncates once the cap is reached
/// rather than growing without bound.
#[derive(Debug, Clone)]
pub struct MaxLenBuf {
    buf: Vec<u8>,
    max: Option<usize>,
}

impl MaxLenBuf {
    pub fn new(max: Option<usize>) -> Self {
        Self {
            buf: Vec::new(),
            max: max.map(|m| m.max(1)),
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        match self.max {
            Some(max) if self.buf.len() >= max => {}
            Some(max) => {
                let room = max - self.buf.len();
                self.buf.extend_from_slice(&data[..data.len().min(room)]);
            }
            None => self.buf.extend_from_slice(data),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn is_full(&self) -> bool {
        matches!(self.max, Some(max) if self.buf.len() >= max)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Splits a comma-separated tag value (`h=`, `z=` continuation lists are
/// handled elsewhere) into trimmed, non-empty fields.
pub fn split_csv(value: &str) -> Vec<&str> {
    value
        .split(':')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// The smaller of two optional bounds, where `None` means unbounded.
pub fn min_opt(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}
