use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::error::AnalysisError;

/// Resolves an optional caller-supplied timestamp to a timezone-aware
/// instant. No value means "now, UTC". A value that cannot be repaired into
/// a valid instant is rejected, never silently defaulted.
pub fn normalize_timestamp(raw: Option<&str>) -> Result<OffsetDateTime, AnalysisError> {
    match raw {
        None => Ok(OffsetDateTime::now_utc()),
        Some(raw) => parse_flexible(raw),
    }
}

/// Parses a tolerant ISO-8601 dialect into an `OffsetDateTime`.
///
/// Repairs applied before the strict RFC 3339 parse:
/// - a trailing `Z` becomes the `+00:00` offset;
/// - a space separator between date and time becomes `T`;
/// - fractional seconds are normalized to exactly six digits;
/// - a missing offset on the time portion means UTC;
/// - truncated clocks (`10:00`) and compact offsets (`+02`, `+0200`) are
///   completed.
pub fn parse_flexible(raw: &str) -> Result<OffsetDateTime, AnalysisError> {
    let repaired = repair(raw).ok_or_else(|| invalid(raw))?;
    OffsetDateTime::parse(&repaired, &Rfc3339).map_err(|_| invalid(raw))
}

fn invalid(raw: &str) -> AnalysisError {
    AnalysisError::InvalidTimestamp(format!("cannot parse '{}' as an instant", raw.trim()))
}

fn repair(raw: &str) -> Option<String> {
    let mut s = raw.trim().to_string();
    if s.is_empty() {
        return None;
    }

    if s.ends_with('Z') || s.ends_with('z') {
        s.truncate(s.len() - 1);
        s.push_str("+00:00");
    }

    // split into date and time at the first separator; dates always carry
    // dashes, so the offset search below must only see the time portion
    let sep = s.find(['T', 't', ' '])?;
    let date = &s[..sep];
    let time_part = &s[sep + 1..];
    if time_part.is_empty() {
        return None;
    }

    let (clock_and_frac, offset) = match time_part.rfind(['+', '-']) {
        Some(i) => (&time_part[..i], normalize_offset(&time_part[i..])?),
        None => (time_part, "+00:00".to_string()),
    };

    let (clock, frac) = match clock_and_frac.find(['.', ',']) {
        Some(i) => (&clock_and_frac[..i], Some(&clock_and_frac[i + 1..])),
        None => (clock_and_frac, None),
    };

    let clock = match clock.matches(':').count() {
        1 => format!("{clock}:00"),
        2 => clock.to_string(),
        _ => return None,
    };

    let mut out = format!("{date}T{clock}");
    if let Some(frac) = frac {
        if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        // exactly six digits: right-pad shorter fractions, truncate longer
        let mut digits = frac.to_string();
        digits.truncate(6);
        while digits.len() < 6 {
            digits.push('0');
        }
        out.push('.');
        out.push_str(&digits);
    }
    out.push_str(&offset);
    Some(out)
}

/// Accepts `+HH:MM`, `+HHMM` and `+HH`, emitting the colon form.
fn normalize_offset(raw: &str) -> Option<String> {
    let (sign, digits) = raw.split_at(1);
    if sign != "+" && sign != "-" {
        return None;
    }
    match digits.len() {
        5 if digits.as_bytes()[2] == b':' => Some(raw.to_string()),
        4 if digits.bytes().all(|b| b.is_ascii_digit()) => {
            Some(format!("{sign}{}:{}", &digits[..2], &digits[2..]))
        }
        2 if digits.bytes().all(|b| b.is_ascii_digit()) => Some(format!("{sign}{digits}:00")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn trailing_z_equals_explicit_utc_offset() {
        let a = parse_flexible("2024-01-05T10:00:00Z").unwrap();
        let b = parse_flexible("2024-01-05T10:00:00+00:00").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, datetime!(2024-01-05 10:00:00 UTC));
    }

    #[test]
    fn short_fraction_is_right_padded_to_six_digits() {
        let t = parse_flexible("2024-01-05T10:00:00.5+02:00").unwrap();
        assert_eq!(t.microsecond(), 500_000);
        assert_eq!(t.offset().whole_hours(), 2);
    }

    #[test]
    fn long_fraction_is_truncated_to_six_digits() {
        let t = parse_flexible("2024-01-05T10:00:00.123456789Z").unwrap();
        assert_eq!(t.microsecond(), 123_456);
    }

    #[test]
    fn missing_offset_means_utc() {
        let t = parse_flexible("2024-01-05T10:00:00").unwrap();
        assert_eq!(t, datetime!(2024-01-05 10:00:00 UTC));
    }

    #[test]
    fn space_separator_and_short_clock_are_tolerated() {
        let t = parse_flexible("2024-01-05 10:00").unwrap();
        assert_eq!(t, datetime!(2024-01-05 10:00:00 UTC));
    }

    #[test]
    fn compact_offsets_are_completed() {
        let a = parse_flexible("2024-01-05T10:00:00+02").unwrap();
        let b = parse_flexible("2024-01-05T10:00:00+0200").unwrap();
        let c = parse_flexible("2024-01-05T10:00:00+02:00").unwrap();
        assert_eq!(a, c);
        assert_eq!(b, c);
    }

    #[test]
    fn negative_offset_survives_the_repair() {
        let t = parse_flexible("2024-06-01T08:30:00-05:00").unwrap();
        assert_eq!(t.offset().whole_hours(), -5);
    }

    #[test]
    fn garbage_is_rejected_not_defaulted() {
        for raw in [
            "",
            "   ",
            "yesterday",
            "2024-13-45T99:99:99Z",
            "2024-01-05",
            "2024-01-05T",
            "2024-01-05T10:00:00.abcZ",
            "2024-01-05T10:00:00+2",
        ] {
            let err = parse_flexible(raw);
            assert!(
                matches!(err, Err(AnalysisError::InvalidTimestamp(_))),
                "expected rejection for {raw:?}"
            );
        }
    }

    #[test]
    fn absent_timestamp_resolves_to_now_utc() {
        let before = OffsetDateTime::now_utc();
        let t = normalize_timestamp(None).unwrap();
        let after = OffsetDateTime::now_utc();
        assert!(t >= before && t <= after);
        assert!(t.offset().is_utc());
    }
}
