//! Checksum and format validators.
//!
//! Each validator receives the exact substring matched by a rule pattern
//! and decides whether it is a real instance of the data type. Validators
//! never panic and never allocate more than a copy of their input.

use std::net::IpAddr;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use super::normalize::strip_separators;

const DNI_LETTERS: &[u8; 23] = b"TRWAGMYFPDXBNJZSQVHLCKE";
const CIF_CONTROL_LETTERS: &[u8; 10] = b"JABCDEFGHI";

/// Luhn (mod 10) check for payment-card numbers.
///
/// Inputs containing anything other than digits, spaces or hyphens are
/// rejected outright.
pub fn is_valid_card(value: &str) -> bool {
    if value
        .chars()
        .any(|c| !(c.is_ascii_digit() || c == ' ' || c == '-'))
    {
        return false;
    }

    let digits: Vec<u32> = value.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 || digits.len() > 19 {
        return false;
    }

    luhn_checksum(&digits) % 10 == 0
}

/// Sums digits from the least significant one, doubling every second digit.
fn luhn_checksum(digits: &[u32]) -> u32 {
    digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum()
}

/// IBAN mod-97 check over the rearranged, numerically encoded string.
pub fn is_valid_iban(value: &str) -> bool {
    let clean: String = strip_separators(value).to_ascii_uppercase();
    if clean.len() < 15 || clean.len() > 34 || !clean.is_ascii() {
        return false;
    }

    let bytes = clean.as_bytes();
    if !bytes[..2].iter().all(u8::is_ascii_alphabetic) || !bytes[2..4].iter().all(u8::is_ascii_digit)
    {
        return false;
    }

    let rearranged = clean[4..].chars().chain(clean[..4].chars());
    let mut remainder: u32 = 0;
    for c in rearranged {
        let value = match c.to_digit(36) {
            Some(v) => v,
            None => return false,
        };
        // Letters expand to two digits (A = 10 .. Z = 35)
        remainder = if value >= 10 {
            (remainder * 100 + value) % 97
        } else {
            (remainder * 10 + value) % 97
        };
    }

    remainder == 1
}

/// Spanish DNI: eight digits followed by the mod-23 control letter.
pub fn is_valid_dni(value: &str) -> bool {
    let clean = strip_separators(value).to_ascii_uppercase();
    if clean.len() != 9 || !clean.is_ascii() {
        return false;
    }
    let (number, letter) = clean.split_at(8);
    dni_letter_matches(number, letter)
}

/// Spanish NIE: X/Y/Z prefix mapped to 0/1/2, then the DNI letter rule.
pub fn is_valid_nie(value: &str) -> bool {
    let clean = strip_separators(value).to_ascii_uppercase();
    if clean.len() != 9 || !clean.is_ascii() {
        return false;
    }
    let prefix = match clean.as_bytes()[0] {
        b'X' => '0',
        b'Y' => '1',
        b'Z' => '2',
        _ => return false,
    };
    let number = format!("{}{}", prefix, &clean[1..8]);
    dni_letter_matches(&number, &clean[8..])
}

fn dni_letter_matches(number: &str, letter: &str) -> bool {
    if number.len() != 8 || !number.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let Ok(n) = number.parse::<u32>() else {
        return false;
    };
    let expected = DNI_LETTERS[(n % 23) as usize];
    letter.as_bytes() == [expected]
}

/// Spanish CIF: organisation letter, seven digits and a control character.
pub fn is_valid_cif(value: &str) -> bool {
    let clean = strip_separators(value).to_ascii_uppercase();
    if clean.len() != 9 || !clean.is_ascii() {
        return false;
    }
    let bytes = clean.as_bytes();
    let org = bytes[0];
    if !b"ABCDEFGHJNPQRSUVW".contains(&org) {
        return false;
    }
    let body = &bytes[1..8];
    if !body.iter().all(u8::is_ascii_digit) {
        return false;
    }

    let mut sum = 0u32;
    for (i, b) in body.iter().enumerate() {
        let d = u32::from(b - b'0');
        if i % 2 == 0 {
            let doubled = d * 2;
            sum += doubled / 10 + doubled % 10;
        } else {
            sum += d;
        }
    }
    let control_digit = (10 - sum % 10) % 10;
    let control_letter = CIF_CONTROL_LETTERS[control_digit as usize];

    let control = bytes[8];
    match org {
        // These organisation types always carry a letter
        b'K' | b'P' | b'Q' | b'R' | b'S' | b'N' | b'W' => control == control_letter,
        // These always carry a digit
        b'A' | b'B' | b'E' | b'H' => u32::from(control.wrapping_sub(b'0')) == control_digit,
        _ => control == control_letter || u32::from(control.wrapping_sub(b'0')) == control_digit,
    }
}

/// US social security number or Spanish social security number (NSS).
pub fn is_valid_ssn(value: &str) -> bool {
    let digits: String = value.chars().filter(char::is_ascii_digit).collect();
    match digits.len() {
        9 => is_valid_us_ssn(&digits),
        12 => is_valid_nss(&digits),
        _ => false,
    }
}

fn is_valid_us_ssn(digits: &str) -> bool {
    let area = &digits[0..3];
    let group = &digits[3..5];
    let serial = &digits[5..9];
    !(area == "000"
        || area == "666"
        || area.starts_with('9')
        || group == "00"
        || serial == "0000")
}

fn is_valid_nss(digits: &str) -> bool {
    let (Ok(province), Ok(number), Ok(control)) = (
        digits[0..2].parse::<u64>(),
        digits[2..10].parse::<u64>(),
        digits[10..12].parse::<u64>(),
    ) else {
        return false;
    };
    let body = if number < 10_000_000 {
        number + province * 10_000_000
    } else {
        province * 100_000_000 + number
    };
    body % 97 == control
}

/// Anchored e-mail grammar check.
pub fn is_valid_email(value: &str) -> bool {
    static EMAIL: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
        )
        .expect("Valid email regex")
    });
    EMAIL.is_match(value)
}

/// Phone numbers: 9 to 13 digits once separators are removed.
///
/// A bare nine-digit number is only accepted when it is a Spanish national
/// number (first digit 6-9).
pub fn is_valid_phone(value: &str) -> bool {
    let digits: String = value.chars().filter(char::is_ascii_digit).collect();
    match digits.len() {
        9 => digits.starts_with(['6', '7', '8', '9']),
        10..=13 => true,
        _ => false,
    }
}

/// IPv4 or IPv6 address that parses cleanly.
pub fn is_valid_ip(value: &str) -> bool {
    value.parse::<IpAddr>().is_ok()
}

/// Numeric dates must name a real calendar day; textual dates pass.
pub fn is_valid_date(value: &str) -> bool {
    let parts: Vec<&str> = value
        .split(|c: char| matches!(c, '/' | '-' | '.' | ' '))
        .filter(|p| !p.is_empty())
        .collect();

    if parts.len() != 3 || !parts.iter().all(|p| p.bytes().all(|b| b.is_ascii_digit())) {
        return true;
    }

    let nums: Vec<i32> = parts.iter().filter_map(|p| p.parse().ok()).collect();
    if nums.len() != 3 {
        return false;
    }

    let (year, month, day) = if parts[0].len() == 4 {
        (nums[0], nums[1], nums[2])
    } else {
        let year = if parts[2].len() == 2 {
            1900 + nums[2]
        } else {
            nums[2]
        };
        (year, nums[1], nums[0])
    };

    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return false;
    }
    NaiveDate::from_ymd_opt(year, month as u32, day as u32).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luhn() {
        assert!(is_valid_card("4111111111111111"));
        assert!(!is_valid_card("4111111111111112"));
        assert!(is_valid_card("4111 1111 1111 1111"));
        assert!(is_valid_card("4111-1111-1111-1111"));
        assert!(!is_valid_card("4111.1111.1111.1111"));
        assert!(!is_valid_card("4111a11111111111"));
    }

    #[test]
    fn test_iban() {
        assert!(is_valid_iban("ES9121000418450200051332"));
        assert!(is_valid_iban("ES91 2100 0418 4502 0005 1332"));
        assert!(is_valid_iban("GB82WEST12345698765432"));
        assert!(!is_valid_iban("ES9121000418450200051333"));
        assert!(!is_valid_iban("ES91"));
    }

    #[test]
    fn test_spanish_ids() {
        assert!(is_valid_dni("12345678Z"));
        assert!(is_valid_dni("12345678-z"));
        assert!(!is_valid_dni("12345678A"));
        assert!(is_valid_nie("X1234567L"));
        assert!(!is_valid_nie("X1234567A"));
        assert!(is_valid_cif("B12345674"));
        assert!(is_valid_cif("Q2826000H"));
        assert!(!is_valid_cif("B12345675"));
    }

    #[test]
    fn test_ssn() {
        assert!(is_valid_ssn("123-45-6789"));
        assert!(!is_valid_ssn("000-12-3456"));
        assert!(!is_valid_ssn("666-12-3456"));
        assert!(!is_valid_ssn("912-12-3456"));
        assert!(is_valid_ssn("28/12345678/40"));
        assert!(!is_valid_ssn("28/12345678/41"));
    }

    #[test]
    fn test_dates() {
        assert!(is_valid_date("15/03/1985"));
        assert!(is_valid_date("1985-03-15"));
        assert!(!is_valid_date("31/02/1985"));
        assert!(!is_valid_date("15/13/1985"));
        assert!(is_valid_date("15 de marzo de 1985"));
    }
}
