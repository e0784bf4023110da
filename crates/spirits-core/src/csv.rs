//! Decoder for the catalog CSV.
//!
//! Values are typed on the way in so the decoded rows hash the same way on
//! every import.

use serde_json::{Map, Number, Value};
use tracing::error;

/// One decoded row: header name to typed value, empty fields omitted.
pub type RawRecord = Map<String, Value>;

/// Decode `text` into one [`RawRecord`] per data row.
///
/// The first non-blank line is the header. Rows whose field count differs
/// from the header, and rows the reader rejects, are logged and skipped.
pub fn parse(text: &str) -> Vec<RawRecord> {
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(::csv::Trim::All)
        .from_reader(text.trim().as_bytes());

    let headers = match reader.headers() {
        Ok(headers) => headers.clone(),
        Err(e) => {
            error!(error = %e, "CSV header could not be read");
            return Vec::new();
        }
    };

    let mut records = Vec::new();
    for result in reader.records() {
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                error!(error = %e, "CSV row could not be read");
                continue;
            }
        };
        if row.iter().all(str::is_empty) {
            continue;
        }
        if row.len() != headers.len() {
            error!(
                expected = headers.len(),
                given = row.len(),
                line = row.position().map(|p| p.line()),
                "CSV row has the wrong number of fields"
            );
            continue;
        }

        let record = headers
            .iter()
            .zip(row.iter())
            .filter_map(|(name, field)| parse_field(field).map(|value| (name.to_string(), value)))
            .collect();
        records.push(record);
    }
    records
}

/// Type a single field. Empty fields have no value.
fn parse_field(field: &str) -> Option<Value> {
    match field {
        "" => None,
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        _ => Some(parse_number(field).unwrap_or_else(|| Value::String(field.to_string()))),
    }
}

fn parse_number(field: &str) -> Option<Value> {
    if let Ok(int) = field.parse::<i64>() {
        return Some(Value::Number(int.into()));
    }
    // `inf` and `NaN` stay strings
    let float = field.parse::<f64>().ok().filter(|f| f.is_finite())?;
    if float.fract() == 0.0 && float.abs() < i64::MAX as f64 {
        return Some(Value::Number((float as i64).into()));
    }
    Number::from_f64(float).map(Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_types_fields() {
        let rows = parse(
            "firstname,height,spoiler,codename,ratio\n\
             Tohka,155,false,Princess,0.5\n",
        );

        assert_eq!(rows.len(), 1);
        assert_eq!(
            Value::Object(rows[0].clone()),
            json!({
                "firstname": "Tohka",
                "height": 155,
                "spoiler": false,
                "codename": "Princess",
                "ratio": 0.5,
            })
        );
    }

    #[test]
    fn test_parse_omits_empty_fields_and_trims() {
        let rows = parse("firstname, lastname ,height\n  Origami , ,  \n");

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("firstname"), Some(&json!("Origami")));
        assert!(!rows[0].contains_key("lastname"));
        assert!(!rows[0].contains_key("height"));
    }

    #[test]
    fn test_parse_skips_blank_lines_and_bad_rows() {
        let rows = parse(
            "\n\nfirstname,series\n\
             Neptune,Neptunia\n\
             \n\
             Broken,Neptunia,extra\n\
             Noire,Neptunia\r\n",
        );

        let names: Vec<_> = rows.iter().map(|r| r["firstname"].clone()).collect();
        assert_eq!(names, [json!("Neptune"), json!("Noire")]);
        assert_eq!(rows[1]["series"], json!("Neptunia"));
    }

    #[test]
    fn test_parse_quoted_fields() {
        let rows = parse(
            "firstname,subtitle,series\n\
             Kotori,\"Camael, Flame\",DAL\n",
        );

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["subtitle"], json!("Camael, Flame"));
        assert_eq!(rows[0]["series"], json!("DAL"));
    }

    #[test]
    fn test_parse_empty_input() {
        assert!(parse("").is_empty());
        assert!(parse("   \n  ").is_empty());
        assert!(parse("firstname,series").is_empty());
    }

    #[test]
    fn test_number_edge_cases() {
        assert_eq!(parse_field("1e3"), Some(json!(1000)));
        assert_eq!(parse_field("-12"), Some(json!(-12)));
        assert_eq!(parse_field("inf"), Some(json!("inf")));
        assert_eq!(parse_field("NaN"), Some(json!("NaN")));
        assert_eq!(parse_field("40214_b1"), Some(json!("40214_b1")));
        assert_eq!(parse_field("True"), Some(json!("True")));
    }
}
