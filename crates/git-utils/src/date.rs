use bstr::{BStr, BString, ByteSlice};

use crate::error::UtilError;
use crate::Result;

/// A parsed git date: seconds since epoch plus the author's recorded
/// timezone offset. Git never normalizes commit/tag timestamps to UTC, so
/// the offset is part of the object's canonical bytes and must round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GitDate {
    /// Seconds since Unix epoch.
    pub timestamp: i64,
    /// Timezone offset in minutes from UTC (e.g., -300 for EST).
    pub tz_offset: i32,
}

/// Git timezone offset stored as integer (e.g. -0500 for EST = -500 integer).
fn tz_offset_to_minutes(tz: i32) -> i32 {
    let sign = if tz < 0 { -1 } else { 1 };
    let abs = tz.unsigned_abs() as i32;
    let hours = abs / 100;
    let mins = abs % 100;
    sign * (hours * 60 + mins)
}

impl GitDate {
    pub fn new(timestamp: i64, tz_offset_minutes: i32) -> Self {
        Self {
            timestamp,
            tz_offset: tz_offset_minutes,
        }
    }

    /// Parse git's raw commit/tag timestamp format: `"<seconds> <+-ZZZZ>"`.
    ///
    /// This is the only format that appears in object headers; the
    /// human-facing formats (relative, ISO, RFC 2822, ...) that `git log
    /// --date=...` supports belong to a CLI output layer, not to object
    /// parsing.
    pub fn parse_raw(input: &str) -> Result<Self> {
        let input = input.trim();
        let parts: Vec<&str> = input.splitn(2, ' ').collect();

        let timestamp: i64 = parts[0]
            .parse()
            .map_err(|_| UtilError::DateParse(format!("invalid timestamp: '{}'", parts[0])))?;

        let tz_offset = if parts.len() > 1 {
            let tz_str = parts[1].trim();
            let tz_int: i32 = tz_str
                .parse()
                .map_err(|_| UtilError::DateParse(format!("invalid timezone: '{}'", tz_str)))?;
            tz_offset_to_minutes(tz_int)
        } else {
            0
        };

        Ok(Self {
            timestamp,
            tz_offset,
        })
    }
}

/// Author/committer/tagger identity with timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: BString,
    pub email: BString,
    pub date: GitDate,
}

impl Signature {
    /// Parse from git format: `Name <email> timestamp tz`
    ///
    /// Example: "John Doe <john@example.com> 1234567890 +0000"
    pub fn parse(input: &BStr) -> Result<Self> {
        let input = input.as_bytes();

        let gt_pos = input
            .iter()
            .rposition(|&b| b == b'>')
            .ok_or_else(|| UtilError::DateParse("missing '>' in signature".into()))?;

        let lt_pos = input[..gt_pos]
            .iter()
            .rposition(|&b| b == b'<')
            .ok_or_else(|| UtilError::DateParse("missing '<' in signature".into()))?;

        let name = input[..lt_pos].trim();
        let email = &input[lt_pos + 1..gt_pos];

        let date_str = input[gt_pos + 1..].trim();
        let date_str = std::str::from_utf8(date_str)
            .map_err(|_| UtilError::DateParse("non-UTF-8 date in signature".into()))?;
        let date = GitDate::parse_raw(date_str)?;

        Ok(Self {
            name: BString::from(name),
            email: BString::from(email),
            date,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_raw() {
        let d = GitDate::parse_raw("1234567890 +0000").unwrap();
        assert_eq!(d.timestamp, 1234567890);
        assert_eq!(d.tz_offset, 0);
    }

    #[test]
    fn parse_raw_negative_tz() {
        let d = GitDate::parse_raw("1234567890 -0500").unwrap();
        assert_eq!(d.timestamp, 1234567890);
        assert_eq!(d.tz_offset, -300);
    }

    #[test]
    fn parse_raw_no_timezone() {
        let d = GitDate::parse_raw("1234567890").unwrap();
        assert_eq!(d.timestamp, 1234567890);
        assert_eq!(d.tz_offset, 0);
    }

    #[test]
    fn parse_raw_invalid_timestamp() {
        assert!(GitDate::parse_raw("not-a-number +0000").is_err());
    }

    #[test]
    fn signature_parse() {
        let sig = Signature::parse(BStr::new(b"John Doe <john@example.com> 1234567890 +0000"))
            .unwrap();
        assert_eq!(sig.name.as_bytes(), b"John Doe");
        assert_eq!(sig.email.as_bytes(), b"john@example.com");
        assert_eq!(sig.date.timestamp, 1234567890);
    }

    #[test]
    fn signature_missing_brackets() {
        assert!(Signature::parse(BStr::new(b"John Doe 1234567890 +0000")).is_err());
    }

    #[test]
    fn signature_email_with_angle_like_name() {
        // Name containing no brackets; rposition finds the real delimiters.
        let sig = Signature::parse(BStr::new(b"A <b@c.com> <d@e.com> 1 +0000"));
        // This is a degenerate case: rightmost '>' then rightmost '<' before it
        // picks up "<d@e.com>" as the email, which is the same behavior git itself
        // exhibits for malformed multi-bracket signatures.
        assert!(sig.is_ok());
    }
}
