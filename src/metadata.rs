//! Capture metadata extraction from image bytes.
//!
//! A pure function over the raw bytes: missing, truncated, or malformed
//! metadata yields an empty result, never an error. Capture-time candidates
//! are tried in priority order (original capture, digitized, generic modify
//! time) and each candidate may be a native EXIF datetime string, a
//! colon-delimited date, an ISO string, or an epoch number. Geolocation is
//! accepted only when both coordinates are in range.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use exif::{In, Reader, Tag, Value};
use std::io::Cursor;

/// Metadata pulled out of a single image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageMetadata {
    pub capture_date: Option<NaiveDate>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl ImageMetadata {
    /// Both coordinates, when the image carried a usable GPS fix.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

/// Capture-time fields in priority order.
const DATE_TAGS: [Tag; 3] = [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime];

/// Extract capture date and geolocation from image bytes.
pub fn extract(bytes: &[u8], now: DateTime<Utc>) -> ImageMetadata {
    let exif = match Reader::new().read_from_container(&mut Cursor::new(bytes)) {
        Ok(exif) => exif,
        Err(_) => return ImageMetadata::default(),
    };

    let mut meta = ImageMetadata::default();

    for tag in DATE_TAGS {
        let Some(field) = exif.get_field(tag, In::PRIMARY) else {
            continue;
        };
        if let Some(parsed) = parse_date_value(&field.value) {
            if is_plausible(parsed, now) {
                meta.capture_date = Some(parsed.date());
                break;
            }
        }
    }

    let lat = gps_coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef);
    let lon = gps_coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef);
    if let (Some(lat), Some(lon)) = (lat, lon) {
        if valid_coordinates(lat, lon) {
            meta.latitude = Some(lat);
            meta.longitude = Some(lon);
        }
    }

    meta
}

/// A capture time is plausible when it is not more than one day in the
/// future and not before 1990.
fn is_plausible(dt: NaiveDateTime, now: DateTime<Utc>) -> bool {
    let ceiling = (now + Duration::days(1)).naive_utc();
    let floor = NaiveDate::from_ymd_opt(1990, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    dt <= ceiling && dt >= floor
}

fn parse_date_value(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::Ascii(components) => {
            let raw = components.first()?;
            let text = std::str::from_utf8(raw).ok()?.trim();
            parse_date_str(text)
        }
        Value::Long(values) => epoch_to_datetime(*values.first()? as i64),
        Value::Short(values) => epoch_to_datetime(*values.first()? as i64),
        _ => None,
    }
}

/// Try the textual date forms in order: colon-delimited EXIF datetime,
/// colon-delimited date, ISO datetime, ISO date, epoch number.
fn parse_date_str(text: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y:%m:%d %H:%M:%S") {
        return Some(dt);
    }
    if let Ok(d) = NaiveDate::parse_from_str(text, "%Y:%m:%d") {
        return d.and_hms_opt(0, 0, 0);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt);
    }
    if let Ok(d) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0);
    }
    if let Ok(epoch) = text.parse::<i64>() {
        return epoch_to_datetime(epoch);
    }
    None
}

fn epoch_to_datetime(epoch: i64) -> Option<NaiveDateTime> {
    // Values past year 2100 in seconds are treated as milliseconds.
    let secs = if epoch > 4_102_444_800 { epoch / 1000 } else { epoch };
    DateTime::<Utc>::from_timestamp(secs, 0).map(|dt| dt.naive_utc())
}

fn gps_coordinate(exif: &exif::Exif, value_tag: Tag, ref_tag: Tag) -> Option<f64> {
    let field = exif.get_field(value_tag, In::PRIMARY)?;
    let degrees = match &field.value {
        Value::Rational(parts) if !parts.is_empty() => dms_to_degrees(
            parts.first().map(|r| r.to_f64()).unwrap_or(0.0),
            parts.get(1).map(|r| r.to_f64()).unwrap_or(0.0),
            parts.get(2).map(|r| r.to_f64()).unwrap_or(0.0),
        ),
        _ => return None,
    };
    if !degrees.is_finite() {
        return None;
    }

    let reference = exif
        .get_field(ref_tag, In::PRIMARY)
        .and_then(|f| match &f.value {
            Value::Ascii(components) => components
                .first()
                .and_then(|c| std::str::from_utf8(c).ok())
                .map(|s| s.trim().to_string()),
            _ => None,
        });

    match reference.as_deref() {
        Some("S") | Some("W") => Some(-degrees),
        _ => Some(degrees),
    }
}

fn dms_to_degrees(degrees: f64, minutes: f64, seconds: f64) -> f64 {
    degrees + minutes / 60.0 + seconds / 3600.0
}

fn valid_coordinates(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}
