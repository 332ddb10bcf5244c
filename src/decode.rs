//! Telemetry line decoding.
//!
//! Devices print sensor values in one of three shapes, often interleaved with
//! free-form log output:
//!
//! ```text
//! {"temp":28.42,"hum":61.1}     structured object
//! TEMP:28.42,HUM:61.1           labelled fields, any order
//! 28.42,61.1                    bare comma-separated values
//! ```
//!
//! Shapes are tried in that order and the first one whose outer form matches
//! decides the outcome, even if it then fails to produce both values.

use serde_json::Value;
use thiserror::Error;

use crate::samples::Reading;

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("empty line")]
    Empty,
    #[error("malformed object: {0}")]
    BadObject(String),
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("invalid number for {0}: {1}")]
    BadNumber(&'static str, String),
    #[error("fewer than two fields")]
    TooFewFields,
}

/// The outer form a line was recognised as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineShape {
    Object,
    Labelled,
    Csv,
}

pub fn classify(line: &str) -> LineShape {
    let s = line.trim();
    if s.starts_with('{') && s.ends_with('}') {
        return LineShape::Object;
    }
    let upper = s.to_ascii_uppercase();
    if upper.contains("TEMP:") || upper.contains("HUM") {
        LineShape::Labelled
    } else {
        LineShape::Csv
    }
}

/// Decode one line into a reading. Never panics; anything that is not a
/// complete temperature/humidity pair is `None`.
pub fn decode(line: &str) -> Option<Reading> {
    try_decode(line).ok()
}

pub fn try_decode(line: &str) -> Result<Reading, DecodeError> {
    let s = line.trim();
    if s.is_empty() {
        return Err(DecodeError::Empty);
    }
    match classify(s) {
        LineShape::Object => decode_object(s),
        LineShape::Labelled => decode_labelled(s),
        LineShape::Csv => decode_csv(s),
    }
}

fn decode_object(s: &str) -> Result<Reading, DecodeError> {
    let value: Value =
        serde_json::from_str(s).map_err(|e| DecodeError::BadObject(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(DecodeError::BadObject("not an object".into()));
    };

    let field = |names: &[&str]| {
        names.iter().find_map(|want| {
            map.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(want))
                .map(|(_, v)| v)
        })
    };

    let temp = field(&["temp"]).ok_or(DecodeError::MissingField("temp"))?;
    let hum = field(&["hum", "humidity"]).ok_or(DecodeError::MissingField("hum"))?;
    Ok(Reading {
        temperature: json_number("temp", temp)?,
        humidity: json_number("hum", hum)?,
    })
}

fn json_number(name: &'static str, v: &Value) -> Result<f64, DecodeError> {
    match v {
        Value::Number(n) => n
            .as_f64()
            .filter(|x| x.is_finite())
            .ok_or_else(|| DecodeError::BadNumber(name, n.to_string())),
        Value::String(s) => parse_number(name, s),
        other => Err(DecodeError::BadNumber(name, other.to_string())),
    }
}

fn decode_labelled(s: &str) -> Result<Reading, DecodeError> {
    let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    let mut temperature = None;
    let mut humidity = None;

    for tok in compact.split(',') {
        let Some((k, v)) = tok.split_once(':') else {
            continue;
        };
        let k = k.to_ascii_lowercase();
        if k.starts_with("temp") {
            temperature = Some(parse_number("temp", v)?);
        } else if k.starts_with("hum") {
            humidity = Some(parse_number("hum", v)?);
        }
    }

    Ok(Reading {
        temperature: temperature.ok_or(DecodeError::MissingField("temp"))?,
        humidity: humidity.ok_or(DecodeError::MissingField("hum"))?,
    })
}

fn decode_csv(s: &str) -> Result<Reading, DecodeError> {
    let mut fields = s.split(',');
    match (fields.next(), fields.next()) {
        (Some(t), Some(h)) => Ok(Reading {
            temperature: parse_number("temp", t)?,
            humidity: parse_number("hum", h)?,
        }),
        _ => Err(DecodeError::TooFewFields),
    }
}

fn parse_number(name: &'static str, raw: &str) -> Result<f64, DecodeError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|x| x.is_finite())
        .ok_or_else(|| DecodeError::BadNumber(name, raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pair(line: &str) -> Option<(f64, f64)> {
        decode(line).map(|r| (r.temperature, r.humidity))
    }

    #[test]
    fn object_lines() {
        assert_eq!(pair(r#"{"temp":30,"hum":55}"#), Some((30.0, 55.0)));
        assert_eq!(pair(r#"{"TEMP": 21.5, "Humidity": 40}"#), Some((21.5, 40.0)));
        assert_eq!(pair(r#"  {"temp":"19.25","hum":"70"}  "#), Some((19.25, 70.0)));
        assert_eq!(pair(r#"{"temp":30}"#), None);
        assert_eq!(pair(r#"{"hum":30}"#), None);
        assert_eq!(pair(r#"{"temp":null,"hum":1}"#), None);
        assert_eq!(pair(r#"{"temp":"warm","hum":1}"#), None);
    }

    #[test]
    fn broken_object_does_not_fall_through() {
        // Would be valid CSV if the object shape did not take priority.
        assert_eq!(classify("{1,2}"), LineShape::Object);
        assert_eq!(pair("{1,2}"), None);
        // Truncated objects are not object-shaped and fall to CSV.
        assert_eq!(try_decode(r#"{"temp":1"#), Err(DecodeError::TooFewFields));
    }

    #[test]
    fn object_takes_priority_over_labels() {
        let line = r#"{"temp":1,"hum":2,"note":"TEMP:9,HUM:9"}"#;
        assert_eq!(classify(line), LineShape::Object);
        assert_eq!(pair(line), Some((1.0, 2.0)));
    }

    #[test]
    fn labelled_lines() {
        assert_eq!(pair("TEMP:22.1, HUM:40.0"), Some((22.1, 40.0)));
        assert_eq!(pair("hum:40,temp:22"), Some((22.0, 40.0)));
        assert_eq!(pair("Temperature: 18.5 , Humidity : 33"), Some((18.5, 33.0)));
        assert_eq!(pair("ID:7,TEMP:1,HUM:2,RSSI:-60"), Some((1.0, 2.0)));
        assert_eq!(pair("TEMP:22.1"), None);
        assert_eq!(pair("TEMP:abc,HUM:40"), None);
        assert_eq!(pair("HUMIDITY SENSOR READY"), None);
    }

    #[test]
    fn csv_lines() {
        assert_eq!(pair("28.42,61.1"), Some((28.42, 61.1)));
        assert_eq!(pair(" 1 , 2 ,3,4"), Some((1.0, 2.0)));
        assert_eq!(pair("28.42"), None);
        assert_eq!(pair("a,b"), None);
        assert_eq!(pair("1,"), None);
        assert_eq!(pair("nan,50"), None);
        assert_eq!(try_decode(""), Err(DecodeError::Empty));
        assert_eq!(try_decode("garbage"), Err(DecodeError::TooFewFields));
    }

    #[test]
    fn non_finite_values_are_rejected_in_every_shape() {
        assert_eq!(pair("inf,50"), None);
        assert_eq!(pair("21,-Infinity"), None);
        assert_eq!(pair("TEMP:NaN,HUM:40"), None);
        assert_eq!(pair(r#"{"temp":"nan","hum":40}"#), None);
        assert_eq!(
            try_decode("TEMP:21,HUM:inf"),
            Err(DecodeError::BadNumber("hum", "inf".into()))
        );
    }

    #[test]
    fn device_log_lines_are_ignored() {
        for line in [
            "ets Jun  8 2016 00:22:57",
            "rst:0x1 (POWERON_RESET),boot:0x13 (SPI_FAST_FLASH_BOOT)",
            "I (312) wifi: connected",
            "ready",
        ] {
            assert_eq!(pair(line), None, "{line}");
        }
    }

    proptest! {
        #[test]
        fn never_panics(s in "\\PC*") {
            let _ = decode(&s);
        }

        #[test]
        fn never_panics_on_near_misses(s in "[{}\",:a-zA-Z0-9. -]{0,40}") {
            let _ = decode(&s);
        }

        #[test]
        fn labelled_any_order_and_case(
            t in -100.0f64..100.0,
            h in 0.0f64..100.0,
            swap in any::<bool>(),
            upper in any::<bool>(),
            pad in " {0,3}",
        ) {
            let (tk, hk) = if upper { ("TEMP", "HUM") } else { ("temp", "hum") };
            let a = format!("{tk}:{pad}{t}");
            let b = format!("{hk}:{pad}{h}");
            let line = if swap { format!("{b},{pad}{a}") } else { format!("{a},{pad}{b}") };
            prop_assert_eq!(pair(&line), Some((t, h)));
        }

        #[test]
        fn csv_pairs(t in -100.0f64..100.0, h in 0.0f64..100.0) {
            prop_assert_eq!(pair(&format!("{t},{h}")), Some((t, h)));
        }

        #[test]
        fn object_pairs(ct in -10_000i32..10_000, ch in 0i32..10_000) {
            let (t, h) = (f64::from(ct) / 100.0, f64::from(ch) / 100.0);
            let line = serde_json::json!({ "temp": t, "hum": h }).to_string();
            prop_assert_eq!(pair(&line), Some((t, h)));
        }
    }
}
