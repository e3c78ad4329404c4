use crate::domain::{FieldValue, UpdateRecord};
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::error::Error;

/// Column holding the observation timestamp. The archive CSVs leave this
/// column unnamed, so it surfaces under an empty header.
pub const TIME_COLUMN: &str = "";

/// Timestamp layout used by the archive: second resolution, no timezone.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Coerce one named CSV row into a typed update record.
///
/// Numeric-looking values are promoted to floats, everything else stays
/// text. The timestamp column is extracted and removed from the field map;
/// a row without a parseable timestamp is an error (callers decide whether
/// to skip it or abort).
pub fn parse_row(
    instrument_id: &str,
    row: &HashMap<String, String>,
) -> Result<UpdateRecord, Box<dyn Error>> {
    let raw_time = row
        .get(TIME_COLUMN)
        .ok_or_else(|| format!("{}: row has no timestamp column", instrument_id))?;
    let time_of_update = NaiveDateTime::parse_from_str(raw_time, TIME_FORMAT)
        .map_err(|e| format!("{}: bad timestamp {:?}: {}", instrument_id, raw_time, e))?;

    let mut fields = HashMap::with_capacity(row.len().saturating_sub(1));
    for (key, value) in row {
        if key == TIME_COLUMN {
            continue;
        }
        fields.insert(key.clone(), FieldValue::coerce(value));
    }

    Ok(UpdateRecord {
        instrument_id: instrument_id.to_string(),
        time_of_update,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_row_ibm_scenario() {
        let row = row(&[
            ("", "2017-05-10 09:30:00"),
            ("close", "150.0"),
            ("exchange", "NYSE"),
        ]);
        let record = parse_row("IBM", &row).unwrap();
        assert_eq!(record.instrument_id, "IBM");
        assert_eq!(
            record.time_of_update,
            NaiveDateTime::parse_from_str("2017-05-10 09:30:00", TIME_FORMAT).unwrap()
        );
        assert_eq!(record.number("close"), Some(150.0));
        assert_eq!(record.text("exchange"), Some("NYSE"));
    }

    #[test]
    fn test_timestamp_never_kept_as_field() {
        let row = row(&[("", "2017-05-10 09:30:00"), ("close", "150.0")]);
        let record = parse_row("IBM", &row).unwrap();
        assert!(!record.fields.contains_key(TIME_COLUMN));
        assert_eq!(record.fields.len(), 1);
    }

    #[test]
    fn test_missing_timestamp_column_is_error() {
        let row = row(&[("close", "150.0")]);
        assert!(parse_row("IBM", &row).is_err());
    }

    #[test]
    fn test_unparseable_timestamp_is_error() {
        let row = row(&[("", "2017/05/10 09:30"), ("close", "150.0")]);
        assert!(parse_row("IBM", &row).is_err());
    }

    #[test]
    fn test_mixed_field_coercion() {
        let row = row(&[
            ("", "2017-05-10 09:30:00"),
            ("open", "151.25"),
            ("volume", "1200000"),
            ("rating", "AAA"),
        ]);
        let record = parse_row("IBM", &row).unwrap();
        assert_eq!(record.number("open"), Some(151.25));
        assert_eq!(record.number("volume"), Some(1_200_000.0));
        assert_eq!(record.text("rating"), Some("AAA"));
    }
}
