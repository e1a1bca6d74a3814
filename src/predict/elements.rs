use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use utoipa::ToSchema;

use crate::predict::error::PredictError;

pub const TLE_LINE_LENGTH: usize = 69;

const NANOS_PER_DAY: f64 = 86_400e9;
const MILLIS_PER_DAY: f64 = 86_400e3;

/// Identity of one element-set version. Two parses of the same text produce
/// the same id; any change to either element line produces a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
pub struct ElementSetId {
    pub norad_id: u32,
    pub fingerprint: u64,
}

impl fmt::Display for ElementSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:05}/{:016x}", self.norad_id, self.fingerprint)
    }
}

/// Mean orbital elements of one satellite, exactly as carried by a TLE.
/// Angles are in degrees, mean motion in revolutions per day.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OrbitalState {
    pub name: Option<String>,
    pub id: ElementSetId,
    pub norad_id: u32,
    #[schema(value_type = String)]
    pub classification: char,
    pub international_designator: String,
    pub epoch: DateTime<Utc>,
    pub epoch_year: i32,
    pub epoch_day: f64,
    pub mean_motion_dot: f64,
    pub mean_motion_ddot: f64,
    pub drag_term: f64,
    pub ephemeris_type: u8,
    pub element_set_number: u32,
    pub inclination_deg: f64,
    pub right_ascension_deg: f64,
    pub eccentricity: f64,
    pub argument_of_perigee_deg: f64,
    pub mean_anomaly_deg: f64,
    pub mean_motion_rev_day: f64,
    pub revolution_number: u32,
}

impl OrbitalState {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("NORAD {}", self.norad_id))
    }

    /// Fractional days from the element epoch to `t` (negative before epoch).
    pub fn days_since_epoch(&self, t: DateTime<Utc>) -> f64 {
        let delta = t.signed_duration_since(self.epoch);
        match delta.num_nanoseconds() {
            Some(nanos) => nanos as f64 / NANOS_PER_DAY,
            None => delta.num_milliseconds() as f64 / MILLIS_PER_DAY,
        }
    }

    /// Re-serialize to the fixed-width two-line layout with fresh checksums.
    pub fn to_tle_lines(&self) -> (String, String) {
        let line1 = format!(
            "1 {:05}{} {:<8} {:02}{:012.8} {} {} {} {} {:>4}",
            self.norad_id,
            self.classification,
            self.international_designator,
            self.epoch_year.rem_euclid(100),
            self.epoch_day,
            format_decimal_point(self.mean_motion_dot),
            format_implied_exponent(self.mean_motion_ddot),
            format_implied_exponent(self.drag_term),
            self.ephemeris_type,
            self.element_set_number % 10_000,
        );
        let line2 = format!(
            "2 {:05} {:8.4} {:8.4} {:07} {:8.4} {:8.4} {:11.8}{:5}",
            self.norad_id,
            self.inclination_deg,
            self.right_ascension_deg,
            (self.eccentricity * 1e7).round() as u32,
            self.argument_of_perigee_deg,
            self.mean_anomaly_deg,
            self.mean_motion_rev_day,
            self.revolution_number % 100_000,
        );
        (with_checksum(line1), with_checksum(line2))
    }
}

/// Parse a two-line or three-line (name first) element set.
pub fn parse_element_set(text: &str) -> Result<OrbitalState, PredictError> {
    let lines: Vec<&str> = text
        .lines()
        .map(|l| l.trim_end())
        .filter(|l| !l.trim().is_empty())
        .collect();

    match lines.as_slice() {
        [line1, line2] => parse_lines(None, line1, line2),
        [name, line1, line2] => parse_lines(Some(name), line1, line2),
        _ => Err(PredictError::parse(
            0,
            format!("expected 2 or 3 non-empty lines, found {}", lines.len()),
        )),
    }
}

pub fn parse_lines(
    name: Option<&str>,
    line1: &str,
    line2: &str,
) -> Result<OrbitalState, PredictError> {
    let line1 = line1.trim_end();
    let line2 = line2.trim_end();
    check_line(1, line1)?;
    check_line(2, line2)?;

    let norad_id: u32 = parse_int(1, line1, 3, 7, "catalog number")?;
    let norad_id_2: u32 = parse_int(2, line2, 3, 7, "catalog number")?;
    if norad_id != norad_id_2 {
        return Err(PredictError::parse(
            2,
            format!("catalog number {norad_id_2} does not match line 1 ({norad_id})"),
        ));
    }

    let classification = line1.as_bytes()[7] as char;
    let international_designator = field(line1, 10, 17).trim().to_string();
    let two_digit_year: i32 = parse_int(1, line1, 19, 20, "epoch year")?;
    let epoch_day = parse_float(1, field(line1, 21, 32), "epoch day")?;
    let epoch_year = if two_digit_year < 57 {
        2000 + two_digit_year
    } else {
        1900 + two_digit_year
    };
    let epoch = epoch_from_year_day(epoch_year, epoch_day)?;

    let mean_motion_dot = parse_float(1, field(line1, 34, 43), "first derivative of mean motion")?;
    let mean_motion_ddot = parse_implied_exponent(1, field(line1, 45, 52), "second derivative")?;
    let drag_term = parse_implied_exponent(1, field(line1, 54, 61), "drag term")?;
    let ephemeris_type = match field(line1, 63, 63) {
        " " => 0,
        s => parse_int(1, s, 1, 1, "ephemeris type")?,
    };
    let element_set_number = match field(line1, 65, 68).trim() {
        "" => 0,
        s => parse_int(1, s, 1, s.len(), "element set number")?,
    };

    let eccentricity = parse_float(
        2,
        &format!("0.{}", field(line2, 27, 33).trim()),
        "eccentricity",
    )?;
    let revolution_number = match field(line2, 64, 68).trim() {
        "" => 0,
        s => parse_int(2, s, 1, s.len(), "revolution number")?,
    };

    Ok(OrbitalState {
        name: name
            .map(|n| n.trim())
            .map(|n| n.strip_prefix("0 ").unwrap_or(n).trim().to_string())
            .filter(|n| !n.is_empty()),
        id: ElementSetId {
            norad_id,
            fingerprint: fingerprint(line1, line2),
        },
        norad_id,
        classification,
        international_designator,
        epoch,
        epoch_year,
        epoch_day,
        mean_motion_dot,
        mean_motion_ddot,
        drag_term,
        ephemeris_type,
        element_set_number,
        inclination_deg: parse_float(2, field(line2, 9, 16), "inclination")?,
        right_ascension_deg: parse_float(2, field(line2, 18, 25), "right ascension")?,
        eccentricity,
        argument_of_perigee_deg: parse_float(2, field(line2, 35, 42), "argument of perigee")?,
        mean_anomaly_deg: parse_float(2, field(line2, 44, 51), "mean anomaly")?,
        mean_motion_rev_day: parse_float(2, field(line2, 53, 63), "mean motion")?,
        revolution_number,
    })
}

/// Modulo-10 checksum over the first 68 columns: digits count their value,
/// minus signs count one.
pub fn checksum(line: &str) -> u8 {
    let sum: u32 = line
        .bytes()
        .take(TLE_LINE_LENGTH - 1)
        .map(|b| match b {
            b'0'..=b'9' => (b - b'0') as u32,
            b'-' => 1,
            _ => 0,
        })
        .sum();
    (sum % 10) as u8
}

fn check_line(number: usize, line: &str) -> Result<(), PredictError> {
    if !line.is_ascii() {
        return Err(PredictError::parse(number, "non-ASCII characters"));
    }
    if line.len() != TLE_LINE_LENGTH {
        return Err(PredictError::parse(
            number,
            format!("expected {} columns, found {}", TLE_LINE_LENGTH, line.len()),
        ));
    }
    let marker = (b'0' + number as u8) as char;
    if !line.starts_with(marker) || line.as_bytes()[1] != b' ' {
        return Err(PredictError::parse(
            number,
            format!("line must start with \"{marker} \""),
        ));
    }
    let expected = checksum(line);
    let found = line.as_bytes()[TLE_LINE_LENGTH - 1];
    if !found.is_ascii_digit() || found - b'0' != expected {
        return Err(PredictError::parse(
            number,
            format!(
                "checksum mismatch: computed {}, found {:?}",
                expected, found as char
            ),
        ));
    }
    Ok(())
}

/// Columns are 1-based and inclusive, as in the published format.
fn field(line: &str, start: usize, end: usize) -> &str {
    &line[start - 1..end]
}

fn parse_int<T: std::str::FromStr>(
    line_number: usize,
    line: &str,
    start: usize,
    end: usize,
    what: &str,
) -> Result<T, PredictError> {
    let raw = field(line, start, end).trim();
    raw.parse()
        .map_err(|_| PredictError::parse(line_number, format!("{what}: {raw:?} is not an integer")))
}

fn parse_float(line_number: usize, raw: &str, what: &str) -> Result<f64, PredictError> {
    let trimmed = raw.trim();
    let (sign, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let digits = if digits.starts_with('.') {
        format!("0{digits}")
    } else {
        digits.to_string()
    };
    let value: f64 = digits
        .parse()
        .map_err(|_| PredictError::parse(line_number, format!("{what}: {raw:?} is not a number")))?;
    if !value.is_finite() {
        return Err(PredictError::parse(line_number, format!("{what}: {raw:?} is not finite")));
    }
    Ok(sign * value)
}

/// Fields like " 12345-4" meaning 0.12345e-4.
fn parse_implied_exponent(line_number: usize, raw: &str, what: &str) -> Result<f64, PredictError> {
    let trimmed = raw.trim();
    let invalid = || PredictError::parse(line_number, format!("{what}: {raw:?} is malformed"));
    if trimmed.len() < 3 {
        return Err(invalid());
    }
    let (sign, rest) = match trimmed.as_bytes()[0] {
        b'-' => (-1.0, &trimmed[1..]),
        b'+' => (1.0, &trimmed[1..]),
        _ => (1.0, trimmed),
    };
    let split = rest.len().checked_sub(2).ok_or_else(invalid)?;
    let (mantissa, exponent) = rest.split_at(split);
    if mantissa.is_empty() || !mantissa.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let exponent: i32 = exponent.parse().map_err(|_| invalid())?;
    let mantissa: f64 = format!("0.{mantissa}").parse().map_err(|_| invalid())?;
    Ok(sign * mantissa * 10f64.powi(exponent))
}

fn epoch_from_year_day(year: i32, day: f64) -> Result<DateTime<Utc>, PredictError> {
    let start = NaiveDate::from_yo_opt(year, 1)
        .ok_or_else(|| PredictError::Epoch(format!("year {year} is not representable")))?;
    let days_in_year = if NaiveDate::from_ymd_opt(year, 2, 29).is_some() {
        366.0
    } else {
        365.0
    };
    if !(1.0..days_in_year + 1.0).contains(&day) {
        return Err(PredictError::Epoch(format!(
            "day of year {day} outside 1..{} for {}",
            days_in_year + 1.0,
            start.year()
        )));
    }
    let offset = Duration::nanoseconds(((day - 1.0) * NANOS_PER_DAY).round() as i64);
    start
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.checked_add_signed(offset))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| PredictError::Epoch(format!("year {year} day {day} overflows")))
}

/// 64-bit FNV-1a over both element lines.
fn fingerprint(line1: &str, line2: &str) -> u64 {
    fnv1a(
        line1
            .bytes()
            .chain(std::iter::once(b'\n'))
            .chain(line2.bytes()),
    )
}

/// 64-bit FNV-1a.
pub(crate) fn fnv1a(bytes: impl IntoIterator<Item = u8>) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .into_iter()
        .fold(OFFSET, |hash, b| (hash ^ b as u64).wrapping_mul(PRIME))
}

fn with_checksum(mut line: String) -> String {
    let sum = checksum(&line);
    line.push((b'0' + sum) as char);
    line
}

fn format_decimal_point(value: f64) -> String {
    let sign = if value < 0.0 { '-' } else { ' ' };
    let digits = format!("{:.8}", value.abs());
    format!("{}{}", sign, digits.strip_prefix('0').unwrap_or(&digits))
}

fn format_implied_exponent(value: f64) -> String {
    if value == 0.0 {
        return " 00000-0".to_string();
    }
    let sign = if value < 0.0 { '-' } else { ' ' };
    let mut exponent = value.abs().log10().floor() as i32 + 1;
    let mut mantissa = (value.abs() / 10f64.powi(exponent) * 1e5).round() as u32;
    if mantissa >= 100_000 {
        mantissa /= 10;
        exponent += 1;
    }
    let exponent_sign = if exponent < 0 { '-' } else { '+' };
    format!("{}{:05}{}{}", sign, mantissa, exponent_sign, exponent.abs())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) const ISS_NAME: &str = "ISS (ZARYA)";
    pub(crate) const ISS_LINE1: &str =
        "1 25544U 98067A   08264.51782528 -.00002182  00000-0 -11606-4 0  2927";
    pub(crate) const ISS_LINE2: &str =
        "2 25544  51.6416 247.4627 0006703 130.5360 325.0288 15.72125391563537";

    pub(crate) const VANGUARD_LINE1: &str =
        "1 00005U 58002B   00179.78495062  .00000023  00000-0  28098-4 0  4753";
    pub(crate) const VANGUARD_LINE2: &str =
        "2 00005  34.2682 348.7242 1859667 331.7664  19.3264 10.82419157413667";

    pub(crate) fn iss() -> OrbitalState {
        parse_lines(Some(ISS_NAME), ISS_LINE1, ISS_LINE2).unwrap()
    }

    #[test]
    fn parses_three_line_element_set() {
        let text = format!("{ISS_NAME}\n{ISS_LINE1}\n{ISS_LINE2}\n");
        let state = parse_element_set(&text).unwrap();

        assert_eq!(state.name.as_deref(), Some(ISS_NAME));
        assert_eq!(state.norad_id, 25544);
        assert_eq!(state.classification, 'U');
        assert_eq!(state.international_designator, "98067A");
        assert_eq!(state.epoch_year, 2008);
        assert!((state.mean_motion_dot + 0.00002182).abs() < 1e-15);
        assert_eq!(state.mean_motion_ddot, 0.0);
        assert!((state.drag_term + 0.11606e-4).abs() < 1e-15);
        assert_eq!(state.element_set_number, 292);
        assert!((state.inclination_deg - 51.6416).abs() < 1e-12);
        assert!((state.eccentricity - 0.0006703).abs() < 1e-15);
        assert!((state.mean_motion_rev_day - 15.72125391).abs() < 1e-12);
        assert_eq!(state.revolution_number, 56353);
    }

    #[test]
    fn epoch_is_fractional_day_of_year() {
        let state = iss();
        let expected = Utc.with_ymd_and_hms(2008, 9, 20, 12, 25, 40).unwrap();
        let error = (state.epoch - expected).num_milliseconds() - 104;
        assert!(error.abs() <= 1, "epoch {}", state.epoch);
    }

    #[test]
    fn two_line_set_has_no_name_and_zero_prefix_is_stripped() {
        let text = format!("{ISS_LINE1}\n{ISS_LINE2}");
        assert_eq!(parse_element_set(&text).unwrap().name, None);

        let text = format!("0 ISS (ZARYA)\r\n{ISS_LINE1}\r\n{ISS_LINE2}\r\n");
        assert_eq!(
            parse_element_set(&text).unwrap().name.as_deref(),
            Some("ISS (ZARYA)")
        );
    }

    #[test]
    fn identical_text_gives_identical_state() {
        let text = format!("{ISS_LINE1}\n{ISS_LINE2}");
        let a = parse_element_set(&text).unwrap();
        let b = parse_element_set(&text).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.id, b.id);
        assert_eq!(a.epoch_day.to_bits(), b.epoch_day.to_bits());
    }

    #[test]
    fn different_lines_give_different_ids() {
        let a = iss();
        let b = parse_lines(None, VANGUARD_LINE1, VANGUARD_LINE2).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn wrong_line_length_is_a_parse_error() {
        let short = &ISS_LINE1[..60];
        let err = parse_lines(None, short, ISS_LINE2).unwrap_err();
        assert!(matches!(err, PredictError::Parse { line: 1, .. }), "{err}");
    }

    #[test]
    fn checksum_mismatch_is_a_parse_error() {
        let mut corrupted = ISS_LINE2.to_string();
        corrupted.replace_range(68..69, "0");
        let err = parse_lines(None, ISS_LINE1, &corrupted).unwrap_err();
        assert!(matches!(err, PredictError::Parse { line: 2, .. }), "{err}");
    }

    #[test]
    fn non_numeric_field_is_a_parse_error() {
        // Checksum recomputed so only the field check can fail.
        let corrupted = ISS_LINE2.replacen(" 51.6416", " 51.64X6", 1);
        let corrupted = with_checksum(corrupted[..68].to_string());
        let err = parse_lines(None, ISS_LINE1, &corrupted).unwrap_err();
        assert!(matches!(err, PredictError::Parse { line: 2, .. }), "{err}");
    }

    #[test]
    fn mismatched_catalog_numbers_are_rejected() {
        let err = parse_lines(None, ISS_LINE1, VANGUARD_LINE2).unwrap_err();
        assert!(matches!(err, PredictError::Parse { line: 2, .. }), "{err}");
    }

    #[test]
    fn swapped_lines_are_rejected() {
        let err = parse_lines(None, ISS_LINE2, ISS_LINE1).unwrap_err();
        assert!(matches!(err, PredictError::Parse { line: 1, .. }), "{err}");
    }

    #[test]
    fn single_line_is_rejected() {
        let err = parse_element_set(ISS_LINE1).unwrap_err();
        assert!(matches!(err, PredictError::Parse { line: 0, .. }));
    }

    #[test]
    fn epoch_day_out_of_range_is_an_epoch_error() {
        let line1 = ISS_LINE1.replacen("08264.51782528", "08367.51782528", 1);
        let line1 = with_checksum(line1[..68].to_string());
        let err = parse_lines(None, &line1, ISS_LINE2).unwrap_err();
        assert!(matches!(err, PredictError::Epoch(_)), "{err}");

        let line1 = ISS_LINE1.replacen("08264.51782528", "08000.51782528", 1);
        let line1 = with_checksum(line1[..68].to_string());
        let err = parse_lines(None, &line1, ISS_LINE2).unwrap_err();
        assert!(matches!(err, PredictError::Epoch(_)), "{err}");
    }

    #[test]
    fn reserializes_to_the_original_lines() {
        let (line1, line2) = iss().to_tle_lines();
        assert_eq!(line1, ISS_LINE1);
        assert_eq!(line2, ISS_LINE2);

        let vanguard = parse_lines(None, VANGUARD_LINE1, VANGUARD_LINE2).unwrap();
        let (line1, line2) = vanguard.to_tle_lines();
        assert_eq!(line1, VANGUARD_LINE1);
        assert_eq!(line2, VANGUARD_LINE2);
    }

    #[test]
    fn days_since_epoch_is_signed() {
        let state = iss();
        assert_eq!(state.days_since_epoch(state.epoch), 0.0);
        let later = state.epoch + Duration::hours(36);
        assert!((state.days_since_epoch(later) - 1.5).abs() < 1e-12);
        let earlier = state.epoch - Duration::hours(12);
        assert!((state.days_since_epoch(earlier) + 0.5).abs() < 1e-12);
    }
}
