//! Length-prefixed token join for column qualifiers and composite rows.
//!
//! Each token is written as a big-endian `u32` length followed by its bytes, so
//! tokens may contain any byte. `join(a, b)` is a byte prefix of `join(a, b, c)`.

use crate::error::{Error, Result};

pub fn join<T: AsRef<[u8]>>(tokens: &[T]) -> Vec<u8> {
    let len = tokens.iter().map(|t| t.as_ref().len() + 4).sum();
    let mut out = Vec::with_capacity(len);
    for token in tokens {
        let token = token.as_ref();
        out.extend_from_slice(&(token.len() as u32).to_be_bytes());
        out.extend_from_slice(token);
    }
    out
}

pub fn split(bytes: &[u8]) -> Result<Vec<&[u8]>> {
    let mut tokens = Vec::new();
    let mut rest = bytes;
    while !rest.is_empty() {
        if rest.len() < 4 {
            return Err(Error::integrity(format!(
                "qualifier has {} dangling length bytes",
                rest.len()
            )));
        }
        let (len, tail) = rest.split_at(4);
        let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
        if tail.len() < len {
            return Err(Error::integrity(format!(
                "qualifier token declares {} bytes but only {} remain",
                len,
                tail.len()
            )));
        }
        let (token, tail) = tail.split_at(len);
        tokens.push(token);
        rest = tail;
    }
    Ok(tokens)
}

/// Split into exactly `N` tokens.
pub fn split_exact<const N: usize>(bytes: &[u8]) -> Result<[&[u8]; N]> {
    let tokens = split(bytes)?;
    let count = tokens.len();
    tokens.try_into().map_err(|_| {
        Error::integrity(format!("expected {} qualifier tokens, found {}", N, count))
    })
}
