//! Fractional sort keys.
//!
//! Keys are strings over the 62 ASCII characters `0-9A-Za-z`, which are
//! already in byte order, so plain `str` comparison orders them. A key is
//! valid when it is non-empty, uses only the alphabet and does not end with
//! the minimum character: a key ending in `'0'` would leave no room for a key
//! directly before it.
//!
//! Nothing here touches storage. Misuse (invalid keys, misordered bounds) is
//! a caller bug and panics.

const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const BASE: u8 = 62;
const MIN_DIGIT: u8 = 0;
const MAX_DIGIT: u8 = BASE - 1;
const MID_DIGIT: u8 = BASE / 2;

/// Returns a key strictly between `before` and `after`.
///
/// Either bound may be open. With both open the canonical middle key `"V"`
/// is returned.
///
/// # Panics
///
/// Panics if a bound is not a valid key or if `before >= after`.
pub fn key_between(before: Option<&str>, after: Option<&str>) -> String {
    match (before, after) {
        (None, None) => encode(&[MID_DIGIT]),
        (None, Some(after)) => decrement(after),
        (Some(before), None) => increment(before),
        (Some(before), Some(after)) => midpoint(before, after),
    }
}

/// Smallest "odometer" step above `key`.
///
/// Carried positions reset to the minimum and are trimmed; when the carry
/// runs off the front of the key a middle character is appended instead.
pub fn increment(key: &str) -> String {
    let mut digits = digits_of(key);
    for index in (0..digits.len()).rev() {
        if digits[index] < MAX_DIGIT {
            digits[index] += 1;
            digits.truncate(index + 1);
            return encode(&digits);
        }
        digits[index] = MIN_DIGIT;
    }

    let mut grown = digits_of(key);
    grown.push(MID_DIGIT);
    encode(&grown)
}

/// Mirror of [`increment`]: a key strictly below `key`.
///
/// The last character of a valid key is never the minimum, so there is
/// always something to borrow from. When lowering it lands on the minimum a
/// middle character is appended to keep the result a valid key.
pub fn decrement(key: &str) -> String {
    let mut digits = digits_of(key);
    let last = digits.len() - 1;
    digits[last] -= 1;
    if digits[last] == MIN_DIGIT {
        digits.push(MID_DIGIT);
    }
    encode(&digits)
}

/// `count` strictly increasing keys spread over the whole alphabet range.
///
/// Used to seed an empty column, not for individual inserts.
pub fn evenly_spaced(count: usize) -> Vec<String> {
    if count == 0 {
        return Vec::new();
    }

    let slots = count as u128 + 1;
    let mut width = 1usize;
    let mut space = u128::from(BASE);
    while space < slots * 2 {
        width += 1;
        space *= u128::from(BASE);
    }

    (1..=count as u128)
        .map(|slot| {
            let mut digits = fixed_width_digits(slot * space / slots, width);
            while digits.last() == Some(&MIN_DIGIT) {
                digits.pop();
            }
            encode(&digits)
        })
        .collect()
}

pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.bytes().all(|byte| digit_value(byte).is_some())
        && !key.ends_with(char::from(ALPHABET[MIN_DIGIT as usize]))
}

fn midpoint(before: &str, after: &str) -> String {
    let lower = digits_of(before);
    let upper = digits_of(after);
    assert!(
        before < after,
        "sort key '{before}' must order strictly before '{after}'"
    );

    let mut out = Vec::with_capacity(lower.len().max(upper.len()) + 1);
    let mut upper_open = false;
    let mut index = 0;
    loop {
        let lo = lower.get(index).copied().unwrap_or(MIN_DIGIT);
        let hi = if upper_open {
            BASE
        } else {
            upper.get(index).copied().unwrap_or(MIN_DIGIT)
        };

        if lo == hi {
            out.push(lo);
        } else if hi - lo > 1 {
            out.push(lo + (hi - lo) / 2);
            return encode(&out);
        } else {
            // Adjacent digits: keep the lower one, anything after it is
            // already below `after`.
            out.push(lo);
            upper_open = true;
        }
        index += 1;
    }
}

fn fixed_width_digits(mut value: u128, width: usize) -> Vec<u8> {
    let mut digits = vec![MIN_DIGIT; width];
    for slot in digits.iter_mut().rev() {
        *slot = (value % u128::from(BASE)) as u8;
        value /= u128::from(BASE);
    }
    digits
}

fn digits_of(key: &str) -> Vec<u8> {
    assert!(is_valid_key(key), "invalid sort key '{key}'");
    key.bytes().filter_map(digit_value).collect()
}

fn digit_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'A'..=b'Z' => Some(byte - b'A' + 10),
        b'a'..=b'z' => Some(byte - b'a' + 36),
        _ => None,
    }
}

fn encode(digits: &[u8]) -> String {
    digits
        .iter()
        .map(|digit| char::from(ALPHABET[*digit as usize]))
        .collect()
}
