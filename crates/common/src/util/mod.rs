// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

mod bitenum;

pub use bitenum::BitEnum;

/// Parse the leading integer out of attribute text the way counters are stored: optional
/// leading whitespace, an optional sign, then digits. Anything after the digits is ignored and
/// text with no digits reads as zero.
#[must_use]
pub fn parse_counter(text: &str) -> i64 {
    let text = text.trim_start();
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let mut value: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        value = value.saturating_mul(10).saturating_add(i64::from(b - b'0'));
    }
    if negative { -value } else { value }
}

/// True if `text` is a plain decimal number: optional sign, digits, optional fraction.
/// At least one digit must be present.
#[must_use]
pub fn is_rational(text: &str) -> bool {
    let text = text.trim();
    let text = text.strip_prefix(['-', '+']).unwrap_or(text);
    let (whole, fraction) = match text.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (text, ""),
    };
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    (!whole.is_empty() || !fraction.is_empty()) && all_digits(whole) && all_digits(fraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("", 0; "empty")]
    #[test_case("12", 12; "plain")]
    #[test_case("  -3", -3; "negative with leading space")]
    #[test_case("+7", 7; "explicit plus")]
    #[test_case("42abc", 42; "trailing garbage")]
    #[test_case("abc", 0; "no digits")]
    fn test_parse_counter(text: &str, expected: i64) {
        assert_eq!(parse_counter(text), expected);
    }

    #[test_case("10", true; "integer")]
    #[test_case("2.5", true; "fraction")]
    #[test_case("-1", true; "negative")]
    #[test_case(".5", true; "leading dot")]
    #[test_case("5.", true; "trailing dot")]
    #[test_case(".", false; "lone dot")]
    #[test_case("", false; "empty")]
    #[test_case("#12", false; "object literal")]
    #[test_case("me/SEM", false; "semaphore target")]
    fn test_is_rational(text: &str, expected: bool) {
        assert_eq!(is_rational(text), expected);
    }
}
