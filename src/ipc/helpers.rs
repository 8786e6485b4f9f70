use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{NaiveDate, NaiveTime};
use rusqlite::Connection;
use serde_json::Value as JsonValue;

use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::store;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn now_ts() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

pub fn parse_bool(v: Option<&JsonValue>, default: bool) -> Result<bool, &'static str> {
    match v {
        None => Ok(default),
        Some(v) if v.is_null() => Ok(default),
        Some(v) => v.as_bool().ok_or("must be boolean"),
    }
}

pub fn parse_opt_string(v: Option<&JsonValue>) -> Result<Option<String>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v.as_str().ok_or("must be string or null")?.trim().to_string();
            if s.is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
    }
}

pub fn parse_opt_i64(v: Option<&JsonValue>) -> Result<Option<i64>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or("must be integer or null"),
    }
}

pub fn parse_string_array(v: Option<&JsonValue>) -> Result<Vec<String>, &'static str> {
    match v {
        None => Ok(Vec::new()),
        Some(v) if v.is_null() => Ok(Vec::new()),
        Some(v) => {
            let arr = v.as_array().ok_or("must be array of strings")?;
            let mut out = Vec::with_capacity(arr.len());
            for item in arr {
                let s = item
                    .as_str()
                    .ok_or("must be array of strings")?
                    .trim()
                    .to_string();
                if !s.is_empty() {
                    out.push(s);
                }
            }
            Ok(out)
        }
    }
}

pub fn required_date(req: &Request, key: &str) -> Result<NaiveDate, serde_json::Value> {
    let raw = required_str(req, key)?;
    store::parse_date(&raw).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            format!("{} must be a YYYY-MM-DD date", key),
            None,
        )
    })
}

pub fn required_time(req: &Request, key: &str) -> Result<NaiveTime, serde_json::Value> {
    let raw = required_str(req, key)?;
    store::parse_time(&raw).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            format!("{} must be an HH:MM time", key),
            None,
        )
    })
}

pub fn opt_date(req: &Request, key: &str) -> Result<Option<NaiveDate>, serde_json::Value> {
    let raw = match parse_opt_string(req.params.get(key)) {
        Ok(v) => v,
        Err(msg) => return Err(err(&req.id, "bad_params", format!("{} {}", key, msg), None)),
    };
    match raw {
        None => Ok(None),
        Some(s) => store::parse_date(&s).map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be a YYYY-MM-DD date", key),
                None,
            )
        }),
    }
}

pub fn opt_time(req: &Request, key: &str) -> Result<Option<NaiveTime>, serde_json::Value> {
    let raw = match parse_opt_string(req.params.get(key)) {
        Ok(v) => v,
        Err(msg) => return Err(err(&req.id, "bad_params", format!("{} {}", key, msg), None)),
    };
    match raw {
        None => Ok(None),
        Some(s) => store::parse_time(&s).map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be an HH:MM time", key),
                None,
            )
        }),
    }
}
