//! Parsers for user-typed values: integers with an optional `0x` prefix,
//! floats, and the bracketed hex-byte vector literals used for vector
//! registers and memory writes.

use crate::errors::{DebuggerError, Result};

/// Parses an integer in the given radix, stripping an optional `0x` prefix
/// when the radix is 16.
pub fn to_integral<T>(text: &str, radix: u32) -> Result<T>
where
    T: TryFrom<u64>,
{
    let digits = if radix == 16 {
        text.strip_prefix("0x").unwrap_or(text)
    } else {
        text
    };

    let wide = u64::from_str_radix(digits, radix)?;
    T::try_from(wide).map_err(|_| DebuggerError::Parse(format!("value out of range: {text}")))
}

/// Parses a float.
pub fn to_float(text: &str) -> Result<f64> {
    Ok(text.parse::<f64>()?)
}

/// Parses a `[0xNN,0xNN,…]` byte list.
pub fn parse_vector(text: &str) -> Result<Vec<u8>> {
    let invalid = || DebuggerError::Parse(format!("invalid vector format: {text}"));

    let inner = text
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(invalid)?;

    if inner.is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .map(|token| to_integral::<u8>(token, 16).map_err(|_| invalid()))
        .collect()
}

/// Parses a byte list of exactly `N` entries.
pub fn parse_fixed_vector<const N: usize>(text: &str) -> Result<[u8; N]> {
    let bytes = parse_vector(text)?;
    bytes.try_into().map_err(|_| {
        DebuggerError::Parse(format!("expected exactly {N} bytes in vector literal"))
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_to_integral() {
        assert_eq!(to_integral::<u64>("19", 10).unwrap(), 19);
        assert_eq!(to_integral::<u64>("0x19", 16).unwrap(), 0x19);
        assert_eq!(to_integral::<u64>("19", 16).unwrap(), 0x19);
        assert_eq!(to_integral::<u8>("ff", 16).unwrap(), 0xff);
        assert!(to_integral::<u8>("100", 16).is_err());
        assert!(to_integral::<u64>("wat", 16).is_err());
    }

    #[test]
    fn test_parse_vector() {
        assert_eq!(
            parse_vector("[0xde,0xad,0xbe,0xef]").unwrap(),
            vec![0xde, 0xad, 0xbe, 0xef]
        );
        assert_eq!(parse_vector("[]").unwrap(), Vec::<u8>::new());
        assert!(parse_vector("0xde,0xad").is_err());
        assert!(parse_vector("[0xde,0xad").is_err());
        assert!(parse_vector("[zz]").is_err());
    }

    #[test]
    fn test_parse_fixed_vector() {
        let bytes: [u8; 2] = parse_fixed_vector("[0x01,0x02]").unwrap();
        assert_eq!(bytes, [1, 2]);
        assert!(parse_fixed_vector::<4>("[0x01,0x02]").is_err());
    }

    #[test]
    fn test_to_float() {
        assert_eq!(to_float("42.24").unwrap(), 42.24);
        assert!(to_float("4x").is_err());
    }
}
