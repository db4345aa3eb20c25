//! PostgreSQL NUMERIC binary format.
//!
//! Binary layout:
//! - 2 bytes: ndigits (number of base-10000 digits)
//! - 2 bytes: weight (position of first digit relative to decimal point)
//! - 2 bytes: sign (0x0000=positive, 0x4000=negative, 0xC000=NaN, 0xD000=+Inf, 0xF000=-Inf)
//! - 2 bytes: dscale (display scale)
//! - ndigits * 2 bytes: digits (each 0-9999 in base 10000)

use crate::error::{Error, Result};

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Converts PostgreSQL NUMERIC binary encoding to String.
///
/// Based on PostgreSQL's `get_str_from_var()` from `numeric.c`.
pub fn numeric_to_string(bytes: &[u8]) -> Result<String> {
    if bytes.len() < 8 {
        return Err(Error::Decode(format!(
            "invalid NUMERIC length: {}",
            bytes.len()
        )));
    }

    let ndigits = i16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    let weight = i16::from_be_bytes([bytes[2], bytes[3]]) as i32;
    let sign = u16::from_be_bytes([bytes[4], bytes[5]]);
    let dscale = u16::from_be_bytes([bytes[6], bytes[7]]) as i32;

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        NUMERIC_POS | NUMERIC_NEG => {}
        other => {
            return Err(Error::Decode(format!("invalid NUMERIC sign: {:#06x}", other)));
        }
    }

    let expected_len = 8 + ndigits * 2;
    if bytes.len() < expected_len {
        return Err(Error::Decode(format!(
            "invalid NUMERIC length: {} (expected {})",
            bytes.len(),
            expected_len
        )));
    }

    let digits: Vec<i16> = bytes[8..expected_len]
        .chunks_exact(2)
        .map(|pair| i16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    let digit = |idx: i32| -> i16 {
        usize::try_from(idx)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut result = String::new();
    if sign == NUMERIC_NEG && ndigits > 0 {
        result.push('-');
    }

    // Integer part: groups 0..=weight
    if weight < 0 {
        result.push('0');
    } else {
        result.push_str(&digit(0).to_string());
        for idx in 1..=weight {
            result.push_str(&format!("{:04}", digit(idx)));
        }
    }

    // Fractional part: groups weight+1.., cut at dscale
    if dscale > 0 {
        result.push('.');
        let mut written = 0;
        let mut idx = weight + 1;
        while written < dscale {
            let group = format!("{:04}", digit(idx));
            for c in group.chars() {
                if written < dscale {
                    result.push(c);
                    written += 1;
                }
            }
            idx += 1;
        }
    }

    Ok(result)
}

/// Converts a decimal string to PostgreSQL NUMERIC binary encoding.
///
/// Accepts an optional sign, a fractional part, an exponent, and the
/// special values `NaN`, `Infinity` and `-Infinity`.
pub fn string_to_numeric(text: &str) -> Result<Vec<u8>> {
    let text = text.trim();
    let invalid = || Error::Encode(format!("invalid numeric value: {:?}", text));

    let special = match text.to_ascii_lowercase().as_str() {
        "nan" => Some(NUMERIC_NAN),
        "infinity" | "+infinity" | "inf" | "+inf" => Some(NUMERIC_PINF),
        "-infinity" | "-inf" => Some(NUMERIC_NINF),
        _ => None,
    };
    if let Some(sign) = special {
        return Ok(header(0, 0, sign, 0));
    }

    let (negative, unsigned) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(pos) => (
            &unsigned[..pos],
            unsigned[pos + 1..].parse::<i32>().map_err(|_| invalid())?,
        ),
        None => (unsigned, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if (int_part.is_empty() && frac_part.is_empty())
        || !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }

    // Shift the decimal point by the exponent
    let mut all_digits = format!("{}{}", int_part, frac_part);
    let mut point = int_part.len() as i64 + exponent as i64;
    if point < 0 {
        all_digits.insert_str(0, &"0".repeat((-point) as usize));
        point = 0;
    }
    if point as usize > all_digits.len() {
        let pad = point as usize - all_digits.len();
        all_digits.push_str(&"0".repeat(pad));
    }
    let (int_digits, frac_digits) = all_digits.split_at(point as usize);
    let dscale = u16::try_from(frac_digits.len()).map_err(|_| invalid())?;

    let int_digits = int_digits.trim_start_matches('0');
    let int_pad = (4 - int_digits.len() % 4) % 4;
    let frac_pad = (4 - frac_digits.len() % 4) % 4;
    let padded = format!(
        "{}{}{}{}",
        "0".repeat(int_pad),
        int_digits,
        frac_digits,
        "0".repeat(frac_pad)
    );

    let mut groups: Vec<i16> = padded
        .as_bytes()
        .chunks_exact(4)
        .map(|chunk| {
            chunk
                .iter()
                .fold(0_i16, |acc, b| acc * 10 + i16::from(b - b'0'))
        })
        .collect();
    let mut weight = ((int_digits.len() + int_pad) / 4) as i32 - 1;

    let leading = groups.iter().take_while(|g| **g == 0).count();
    groups.drain(..leading);
    weight -= leading as i32;
    while groups.last() == Some(&0) {
        groups.pop();
    }

    if groups.is_empty() {
        return Ok(header(0, 0, NUMERIC_POS, dscale));
    }

    let ndigits = i16::try_from(groups.len()).map_err(|_| invalid())?;
    let weight = i16::try_from(weight).map_err(|_| invalid())?;
    let sign = if negative { NUMERIC_NEG } else { NUMERIC_POS };
    let mut out = header(ndigits, weight, sign, dscale);
    for group in groups {
        out.extend_from_slice(&group.to_be_bytes());
    }
    Ok(out)
}

fn header(ndigits: i16, weight: i16, sign: u16, dscale: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + ndigits.max(0) as usize * 2);
    out.extend_from_slice(&ndigits.to_be_bytes());
    out.extend_from_slice(&weight.to_be_bytes());
    out.extend_from_slice(&sign.to_be_bytes());
    out.extend_from_slice(&dscale.to_be_bytes());
    out
}

/// Check a decimal string without encoding it.
pub fn validate(text: &str) -> Result<()> {
    string_to_numeric(text).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Helper to build NUMERIC binary representation
    fn make_numeric(ndigits: i16, weight: i16, sign: u16, dscale: u16, digits: &[i16]) -> Vec<u8> {
        let mut buf = header(ndigits, weight, sign, dscale);
        for &d in digits {
            buf.extend_from_slice(&d.to_be_bytes());
        }
        buf
    }

    #[test]
    fn decode_zero() {
        assert_eq!(numeric_to_string(&make_numeric(0, 0, 0, 0, &[])).unwrap(), "0");
        assert_eq!(numeric_to_string(&make_numeric(0, 0, 0, 2, &[])).unwrap(), "0.00");
    }

    #[test]
    fn decode_values() {
        // 12345 = 1 * 10000 + 2345, weight=1
        assert_eq!(numeric_to_string(&make_numeric(2, 1, 0, 0, &[1, 2345])).unwrap(), "12345");
        assert_eq!(numeric_to_string(&make_numeric(2, 0, 0, 2, &[123, 4500])).unwrap(), "123.45");
        assert_eq!(
            numeric_to_string(&make_numeric(2, 0, 0x4000, 2, &[123, 4500])).unwrap(),
            "-123.45"
        );
        assert_eq!(numeric_to_string(&make_numeric(1, -1, 0, 4, &[1])).unwrap(), "0.0001");
        assert_eq!(numeric_to_string(&make_numeric(1, -2, 0, 8, &[1])).unwrap(), "0.00000001");
        // 10000 with trailing zero groups stripped
        assert_eq!(numeric_to_string(&make_numeric(1, 1, 0, 0, &[1])).unwrap(), "10000");
    }

    #[test]
    fn decode_special_values() {
        assert_eq!(numeric_to_string(&make_numeric(0, 0, 0xC000, 0, &[])).unwrap(), "NaN");
        assert_eq!(numeric_to_string(&make_numeric(0, 0, 0xD000, 0, &[])).unwrap(), "Infinity");
        assert_eq!(numeric_to_string(&make_numeric(0, 0, 0xF000, 0, &[])).unwrap(), "-Infinity");
    }

    #[test]
    fn encode_matches_server_layout() {
        assert_eq!(string_to_numeric("123.45").unwrap(), make_numeric(2, 0, 0, 2, &[123, 4500]));
        assert_eq!(string_to_numeric("12345").unwrap(), make_numeric(2, 1, 0, 0, &[1, 2345]));
        assert_eq!(string_to_numeric("0.0001").unwrap(), make_numeric(1, -1, 0, 4, &[1]));
        assert_eq!(string_to_numeric("-0.5").unwrap(), make_numeric(1, -1, 0x4000, 1, &[5000]));
        assert_eq!(string_to_numeric("0.00").unwrap(), make_numeric(0, 0, 0, 2, &[]));
        assert_eq!(string_to_numeric("1e4").unwrap(), make_numeric(1, 1, 0, 0, &[1]));
        assert_eq!(string_to_numeric("NaN").unwrap(), make_numeric(0, 0, 0xC000, 0, &[]));
    }

    #[test]
    fn encode_then_decode() {
        for text in ["0", "1", "-1", "3.14159", "100000000.000001", "-0.00000042", "Infinity"] {
            let encoded = string_to_numeric(text).unwrap();
            assert_eq!(numeric_to_string(&encoded).unwrap(), text);
        }
    }

    #[test]
    fn reject_garbage() {
        assert!(string_to_numeric("12a").is_err());
        assert!(string_to_numeric("").is_err());
        assert!(string_to_numeric(".").is_err());
    }
}
