//! Natural (numeric-aware) ordering for versioned catalog links.
//!
//! `DROID_SignatureFile_V120.xml` must sort after `..._V99.xml`, which a
//! lexical comparison gets wrong.

use std::cmp::Ordering;

#[derive(Debug, PartialEq, Eq)]
enum Chunk<'a> {
    Digits(&'a str),
    Text(&'a str),
}

fn chunks(s: &str) -> Vec<Chunk<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_digits = None;

    for (i, c) in s.char_indices() {
        let is_digit = c.is_ascii_digit();
        match in_digits {
            Some(prev) if prev != is_digit => {
                out.push(chunk(&s[start..i], prev));
                start = i;
            }
            _ => {}
        }
        in_digits = Some(is_digit);
    }
    if let Some(prev) = in_digits {
        out.push(chunk(&s[start..], prev));
    }
    out
}

fn chunk(s: &str, digits: bool) -> Chunk<'_> {
    if digits {
        Chunk::Digits(s)
    } else {
        Chunk::Text(s)
    }
}

fn cmp_digits(a: &str, b: &str) -> Ordering {
    let a_trim = a.trim_start_matches('0');
    let b_trim = b.trim_start_matches('0');
    a_trim
        .len()
        .cmp(&b_trim.len())
        .then_with(|| a_trim.cmp(b_trim))
        // "007" after "7" so the order stays total
        .then_with(|| a.len().cmp(&b.len()))
}

/// Compare two strings treating runs of ASCII digits as numbers.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let left = chunks(a);
    let right = chunks(b);

    for (l, r) in left.iter().zip(right.iter()) {
        let ord = match (l, r) {
            (Chunk::Digits(x), Chunk::Digits(y)) => cmp_digits(x, y),
            (Chunk::Digits(_), Chunk::Text(_)) => Ordering::Less,
            (Chunk::Text(_), Chunk::Digits(_)) => Ordering::Greater,
            (Chunk::Text(x), Chunk::Text(y)) => x.cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    left.len().cmp(&right.len())
}

/// The greatest entry under natural ordering.
pub fn latest_version<'a, I>(items: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    items.into_iter().max_by(|a, b| natural_cmp(a, b))
}
