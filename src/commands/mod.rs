//! Controller entry points. Every controller takes the shared
//! [`crate::AppState`] plus an optional JSON argument and answers with a
//! JSON value or a user-facing error message.

use serde::de::DeserializeOwned;
use serde_json::Value;

pub mod cart;
pub mod reception;
pub mod restock;
pub mod settings;
pub mod tables;

/// Deserialize a controller argument; a missing argument reads as `{}`.
pub(crate) fn parse_payload<T: DeserializeOwned>(
    arg0: Option<Value>,
    what: &str,
) -> Result<T, String> {
    let payload = match arg0 {
        Some(Value::Null) | None => serde_json::json!({}),
        Some(v) => v,
    };
    serde_json::from_value(payload).map_err(|e| format!("Invalid {what} payload: {e}"))
}

/// Today in the terminal's local time zone.
pub(crate) fn today() -> chrono::NaiveDate {
    chrono::Local::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Sample {
        #[serde(default, alias = "producto_id")]
        producto_id: Option<i64>,
    }

    #[test]
    fn test_parse_payload_defaults_and_aliases() {
        let p: Sample = parse_payload(None, "sample").expect("empty");
        assert_eq!(p.producto_id, None);
        let p: Sample = parse_payload(Some(serde_json::json!({"producto_id": 4})), "sample").expect("alias");
        assert_eq!(p.producto_id, Some(4));
        let p: Sample = parse_payload(Some(serde_json::json!({"productoId": 5})), "sample").expect("camel");
        assert_eq!(p.producto_id, Some(5));
        let err = parse_payload::<Sample>(Some(serde_json::json!({"productoId": "x"})), "sample").unwrap_err();
        assert!(err.starts_with("Invalid sample payload"));
    }
}
