//! Fractional ordering keys for playlist membership.
//!
//! Keys are strings over the base-62 alphabet `0-9A-Za-z`, compared
//! bytewise. Between any two distinct keys another key always exists, so a
//! row can be inserted or moved without renumbering its neighbours. Keys
//! never end in `'0'`, which keeps that property true at every depth.

use crate::{Error, Result};

const DIGITS: &[u8; 62] =
  b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const BASE: usize = DIGITS.len();

fn digit_value(c: u8) -> Option<usize> {
  match c {
    b'0'..=b'9' => Some((c - b'0') as usize),
    b'A'..=b'Z' => Some((c - b'A') as usize + 10),
    b'a'..=b'z' => Some((c - b'a') as usize + 36),
    _ => None,
  }
}

/// Reject empty keys, foreign characters and trailing zeros.
pub fn validate(key: &str) -> Result<()> {
  let bytes = key.as_bytes();
  let valid = !bytes.is_empty()
    && bytes.iter().all(|&c| digit_value(c).is_some())
    && bytes.last() != Some(&b'0');
  if valid {
    Ok(())
  } else {
    Err(Error::InvalidOrderingKey(key.to_owned()))
  }
}

/// A key that sorts strictly between `before` and `after`.
///
/// `None` means unbounded on that side: `key_between(None, None)` is the key
/// for the first row of an empty list.
pub fn key_between(before: Option<&str>, after: Option<&str>) -> Result<String> {
  if let Some(a) = before {
    validate(a)?;
  }
  if let Some(b) = after {
    validate(b)?;
  }
  if let (Some(a), Some(b)) = (before, after)
    && a >= b
  {
    return Err(Error::KeysOutOfOrder(a.to_owned(), b.to_owned()));
  }

  let mut out = Vec::new();
  midpoint(
    before.unwrap_or_default().as_bytes(),
    after.map(str::as_bytes),
    &mut out,
  );
  // Every byte pushed comes from DIGITS or from a validated key.
  Ok(out.into_iter().map(char::from).collect())
}

/// `n` ascending keys strictly between `before` and `after`.
///
/// Bisects recursively, so key length grows with `log(n)` rather than `n`.
pub fn keys_between(
  before: Option<&str>,
  after: Option<&str>,
  n: usize,
) -> Result<Vec<String>> {
  match n {
    0 => Ok(Vec::new()),
    1 => Ok(vec![key_between(before, after)?]),
    _ => {
      let mid = key_between(before, after)?;
      let left_len = n / 2;
      let mut keys = keys_between(before, Some(&mid), left_len)?;
      let right = keys_between(Some(&mid), after, n - left_len - 1)?;
      keys.push(mid);
      keys.extend(right);
      Ok(keys)
    }
  }
}

fn midpoint(a: &[u8], b: Option<&[u8]>, out: &mut Vec<u8>) {
  if let Some(b) = b {
    // Shared prefix, treating a missing digit in `a` as '0'.
    let n = b
      .iter()
      .enumerate()
      .take_while(|&(i, &c)| a.get(i).copied().unwrap_or(b'0') == c)
      .count();
    if n > 0 {
      out.extend_from_slice(&b[..n]);
      midpoint(a.get(n..).unwrap_or_default(), Some(&b[n..]), out);
      return;
    }
  }

  let da = a.first().and_then(|&c| digit_value(c)).unwrap_or(0);
  let db = b
    .and_then(|b| b.first())
    .and_then(|&c| digit_value(c))
    .unwrap_or(BASE);

  if db - da > 1 {
    out.push(DIGITS[(da + db).div_ceil(2)]);
    return;
  }

  match b {
    Some(b) if b.len() > 1 => out.push(b[0]),
    _ => {
      out.push(DIGITS[da]);
      midpoint(a.get(1..).unwrap_or_default(), None, out);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn first_key_of_empty_list() {
    assert_eq!(key_between(None, None).unwrap(), "V");
  }

  #[test]
  fn appends_and_prepends_stay_ordered() {
    let mut keys = vec![key_between(None, None).unwrap()];
    for _ in 0..50 {
      let last = keys.last().cloned();
      keys.push(key_between(last.as_deref(), None).unwrap());
    }
    for _ in 0..50 {
      let first = keys.first().cloned();
      keys.insert(0, key_between(None, first.as_deref()).unwrap());
    }
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
    assert!(keys.iter().all(|k| validate(k).is_ok()));
  }

  #[test]
  fn repeated_insertion_between_neighbours() {
    let low = "a".to_owned();
    let mut high = "b".to_owned();
    for _ in 0..40 {
      let mid = key_between(Some(&low), Some(&high)).unwrap();
      assert!(low < mid && mid < high, "{low} < {mid} < {high}");
      high = mid;
    }
  }

  #[test]
  fn adjacent_digits_descend_a_level() {
    let k = key_between(Some("a"), Some("b")).unwrap();
    assert!(k.as_str() > "a" && k.as_str() < "b");
    let k = key_between(None, Some("1")).unwrap();
    assert!(k.as_str() < "1");
  }

  #[test]
  fn rejects_bad_input() {
    assert!(key_between(Some("b"), Some("a")).is_err());
    assert!(key_between(Some("a0"), None).is_err());
    assert!(key_between(Some("a-"), None).is_err());
    assert!(key_between(Some(""), None).is_err());
  }

  #[test]
  fn bulk_keys_are_short_and_sorted() {
    let keys = keys_between(None, None, 1000).unwrap();
    assert_eq!(keys.len(), 1000);
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
    assert!(keys.iter().all(|k| k.len() <= 12), "keys grew too long");
  }
}
