//! Face template storage codec.
//!
//! The store keeps a template's encoding as JSON text. Decoding happens
//! exactly once, at the storage boundary; comparison logic only ever sees
//! a numeric vector.

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum CodecError {
    #[error("corrupted face template: {0}")]
    CorruptedTemplate(String),
}

/// Storage representation of a face template encoding.
///
/// `Raw` is the JSON text as read from the store; `Parsed` is an already
/// materialized vector (e.g. fresh extractor output).
#[derive(Debug, Clone)]
pub enum StoredEncoding {
    Raw(String),
    Parsed(Vec<f32>),
}

/// Decode a stored template into a numeric vector.
///
/// Fails with [`CodecError::CorruptedTemplate`] when the raw text is not
/// JSON, the JSON is not an array, or any component is not a finite
/// number. Dimensionality is not validated here; the matcher rejects
/// mismatches.
pub fn decode(stored: &StoredEncoding) -> Result<Vec<f32>, CodecError> {
    match stored {
        StoredEncoding::Parsed(values) => {
            validate(values)?;
            Ok(values.clone())
        }
        StoredEncoding::Raw(text) => {
            let value: Value = serde_json::from_str(text)
                .map_err(|e| CodecError::CorruptedTemplate(format!("not valid JSON: {e}")))?;
            let Value::Array(items) = value else {
                return Err(CodecError::CorruptedTemplate("not a JSON array".into()));
            };

            let mut values = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let Some(n) = item.as_f64() else {
                    return Err(CodecError::CorruptedTemplate(format!(
                        "component {i} is not a number"
                    )));
                };
                values.push(n as f32);
            }
            validate(&values)?;
            Ok(values)
        }
    }
}

/// Encode a vector into the JSON text stored in the template row.
pub fn encode(values: &[f32]) -> Result<String, CodecError> {
    validate(values)?;
    serde_json::to_string(values)
        .map_err(|e| CodecError::CorruptedTemplate(format!("cannot serialize encoding: {e}")))
}

fn validate(values: &[f32]) -> Result<(), CodecError> {
    if values.is_empty() {
        return Err(CodecError::CorruptedTemplate("empty encoding".into()));
    }
    if let Some(i) = values.iter().position(|v| !v.is_finite()) {
        return Err(CodecError::CorruptedTemplate(format!(
            "component {i} is not finite"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_raw_json_array() {
        let stored = StoredEncoding::Raw("[0.1, 0.2, 0.3]".into());
        let values = decode(&stored).unwrap();
        assert_eq!(values.len(), 3);
        assert!((values[0] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_decode_parsed_passthrough() {
        let stored = StoredEncoding::Parsed(vec![1.0, 2.0]);
        assert_eq!(decode(&stored).unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_decode_rejects_non_json() {
        let stored = StoredEncoding::Raw("definitely-not-json".into());
        assert!(matches!(
            decode(&stored),
            Err(CodecError::CorruptedTemplate(_))
        ));
    }

    #[test]
    fn test_decode_rejects_non_array() {
        let stored = StoredEncoding::Raw(r#"{"face": true}"#.into());
        assert!(matches!(
            decode(&stored),
            Err(CodecError::CorruptedTemplate(_))
        ));
    }

    #[test]
    fn test_decode_rejects_non_numeric_component() {
        let stored = StoredEncoding::Raw(r#"[0.1, "x", 0.3]"#.into());
        assert!(matches!(
            decode(&stored),
            Err(CodecError::CorruptedTemplate(_))
        ));
    }

    #[test]
    fn test_decode_rejects_empty_array() {
        let stored = StoredEncoding::Raw("[]".into());
        assert!(matches!(
            decode(&stored),
            Err(CodecError::CorruptedTemplate(_))
        ));
    }

    #[test]
    fn test_encode_then_decode_full_template() {
        let original: Vec<f32> = (0..128).map(|i| (i as f32) / 128.0).collect();
        let text = encode(&original).unwrap();
        let decoded = decode(&StoredEncoding::Raw(text)).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_encode_rejects_non_finite() {
        assert!(matches!(
            encode(&[0.1, f32::NAN]),
            Err(CodecError::CorruptedTemplate(_))
        ));
    }
}
