use reqwest::Url;

use crate::{db, EXTERNAL_URL_MAX_LEN};

/// Settings category that mirrors browser `localStorage`.
pub(crate) const LOCAL_CATEGORY: &str = "local";

pub(crate) fn read_local_json(db: &db::DbState, key: &str) -> Result<serde_json::Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let raw = db::get_setting(&conn, LOCAL_CATEGORY, key);
    if let Some(raw) = raw {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&raw) {
            return Ok(parsed);
        }
        tracing::warn!(key, "discarding unparseable local value");
    }
    Ok(serde_json::Value::Null)
}

/// Read a local value into a typed structure. Missing or malformed values
/// come back as `None`.
pub(crate) fn read_local_as<T: serde::de::DeserializeOwned>(
    db: &db::DbState,
    key: &str,
) -> Result<Option<T>, String> {
    let value = read_local_json(db, key)?;
    if value.is_null() {
        return Ok(None);
    }
    match serde_json::from_value::<T>(value) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(e) => {
            tracing::warn!(key, error = %e, "local value has unexpected shape");
            Ok(None)
        }
    }
}

pub(crate) fn write_local_json(
    db: &db::DbState,
    key: &str,
    value: &serde_json::Value,
) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::set_setting(&conn, LOCAL_CATEGORY, key, &value.to_string())
}

pub(crate) fn write_local_as<T: serde::Serialize>(
    db: &db::DbState,
    key: &str,
    value: &T,
) -> Result<(), String> {
    let json = serde_json::to_value(value).map_err(|e| format!("serialize {key}: {e}"))?;
    write_local_json(db, key, &json)
}

pub(crate) fn remove_local(db: &db::DbState, key: &str) -> Result<bool, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::delete_setting(&conn, LOCAL_CATEGORY, key)
}

/// Validate a link before handing it to the system browser. Only http(s)
/// URLs on the backend host are accepted.
pub(crate) fn validate_external_url(url_raw: &str, backend_base: &str) -> Result<Url, String> {
    let trimmed = url_raw.trim();
    if trimmed.is_empty() {
        return Err("External URL cannot be empty".into());
    }
    if trimmed.len() > EXTERNAL_URL_MAX_LEN {
        return Err("External URL is too long".into());
    }

    let parsed = Url::parse(trimmed).map_err(|e| format!("Invalid external URL: {e}"))?;
    let scheme = parsed.scheme().to_ascii_lowercase();
    if scheme != "https" && scheme != "http" {
        return Err("Only http/https URLs are allowed".into());
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err("Credentialed URLs are not allowed".into());
    }

    let host = parsed
        .host_str()
        .ok_or("External URL is missing a host")?
        .to_ascii_lowercase();
    let backend_host = Url::parse(backend_base)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .ok_or("Backend URL is not configured")?;

    if host != backend_host {
        return Err(format!("Host {host} is not the configured backend"));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Stored {
        id: i64,
    }

    #[test]
    fn test_local_json_roundtrip_and_remove() {
        let db = db::open_in_memory().expect("db");
        assert!(read_local_json(&db, "mesa_activa").expect("read").is_null());

        write_local_as(&db, "mesa_activa", &Stored { id: 4 }).expect("write");
        let back: Option<Stored> = read_local_as(&db, "mesa_activa").expect("read");
        assert_eq!(back, Some(Stored { id: 4 }));

        assert!(remove_local(&db, "mesa_activa").expect("remove"));
        assert!(read_local_json(&db, "mesa_activa").expect("read").is_null());
    }

    #[test]
    fn test_malformed_local_value_reads_as_none() {
        let db = db::open_in_memory().expect("db");
        {
            let conn = db.conn.lock().expect("lock");
            db::set_setting(&conn, LOCAL_CATEGORY, "carrito_pos", "not json").expect("set");
        }
        let parsed: Option<Vec<Stored>> = read_local_as(&db, "carrito_pos").expect("read");
        assert!(parsed.is_none());
    }

    #[test]
    fn test_external_url_must_match_backend_host() {
        let base = "https://pos.laplayita.co";
        assert!(validate_external_url("https://pos.laplayita.co/pos/venta/3/descargar/", base).is_ok());
        assert!(validate_external_url("https://evil.example/pos/", base).is_err());
        assert!(validate_external_url("file:///etc/passwd", base).is_err());
        assert!(validate_external_url("https://user:pw@pos.laplayita.co/", base).is_err());
        assert!(validate_external_url("  ", base).is_err());
    }
}
