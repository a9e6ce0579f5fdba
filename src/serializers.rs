//! Serializers that reduce raw request, response and error objects to compact
//! log records.
//!
//! The instrumentor hands the [`Logger`](crate::logger::Logger) *raw* objects
//! under the payload keys `req`, `res` and `err`. Before a record reaches a
//! sink, the logger runs each of those values through the matching function of
//! its [`Serializers`] bundle. The request and response serializers are
//! allow-lists: they copy a fixed set of fields and drop everything else. The
//! error serializer is the opposite: it keeps every property it is given.

use serde_json::{Map, Value};

/// A serializer hook: maps a raw object to the value that is logged.
pub type Serializer = fn(&Value) -> Value;

/// The `req` / `res` / `err` hooks applied by a [`Logger`](crate::logger::Logger).
#[derive(Clone, Copy)]
pub struct Serializers {
    pub req: Serializer,
    pub res: Serializer,
    pub err: Serializer,
}

impl std::fmt::Debug for Serializers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Serializers").finish_non_exhaustive()
    }
}

impl Default for Serializers {
    fn default() -> Self {
        Self {
            req: req_serializer,
            res: res_serializer,
            err: err_serializer,
        }
    }
}

impl Serializers {
    /// Standard set with the body-inclusive request and response serializers.
    pub fn with_bodies() -> Self {
        Self {
            req: req_body_serializer,
            res: res_body_serializer,
            err: err_serializer,
        }
    }

    /// Apply the hook registered for `key`, if any.
    pub(crate) fn apply(&self, key: &str, value: &Value) -> Option<Value> {
        match key {
            "req" => Some((self.req)(value)),
            "res" => Some((self.res)(value)),
            "err" => Some((self.err)(value)),
            _ => None,
        }
    }
}

const REQ_FIELDS: [&str; 5] = ["headers", "id", "ip", "method", "url"];

/// Copy the allow-listed `fields` out of `raw`. Missing fields stay absent.
fn pick(raw: &Value, fields: &[&str]) -> Map<String, Value> {
    let mut out = Map::new();
    for field in fields {
        if let Some(v) = raw.get(*field) {
            out.insert((*field).to_owned(), v.clone());
        }
    }
    out
}

/// `{headers, id, ip, method, url}` and nothing else.
pub fn req_serializer(raw: &Value) -> Value {
    Value::Object(pick(raw, &REQ_FIELDS))
}

/// [`req_serializer`] plus the raw request `body`.
pub fn req_body_serializer(raw: &Value) -> Value {
    let mut out = pick(raw, &REQ_FIELDS);
    if let Some(body) = raw.get("body") {
        out.insert("body".into(), body.clone());
    }
    Value::Object(out)
}

fn res_fields(raw: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    if let Some(status) = raw.get("statusCode") {
        out.insert("status".into(), status.clone());
    }
    if let Some(headers) = raw.get("headers") {
        out.insert("headers".into(), headers.clone());
    }
    out
}

/// `{status, headers}` from a raw `{statusCode, headers, ..}` object.
/// Any `body` is ignored.
pub fn res_serializer(raw: &Value) -> Value {
    Value::Object(res_fields(raw))
}

/// [`res_serializer`] plus the captured response `body`.
pub fn res_body_serializer(raw: &Value) -> Value {
    let mut out = res_fields(raw);
    if let Some(body) = raw.get("body") {
        out.insert("body".into(), body.clone());
    }
    Value::Object(out)
}

/// `{message, stack, type}` followed by every other property of `raw`.
///
/// A raw error that is not an object is logged as its string form.
pub fn err_serializer(raw: &Value) -> Value {
    let Value::Object(fields) = raw else {
        let message = raw.as_str().map_or_else(|| raw.to_string(), str::to_owned);
        return serde_json::json!({ "message": message, "type": "Value" });
    };

    let mut out = Map::new();
    for key in ["message", "stack", "type"] {
        out.insert(key.to_owned(), fields.get(key).cloned().unwrap_or(Value::Null));
    }
    for (key, value) in fields {
        if !out.contains_key(key) {
            out.insert(key.clone(), value.clone());
        }
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // -----------------------------------------------------------------------
    // req
    // -----------------------------------------------------------------------

    #[test]
    fn req_serializer_keeps_standard_object_unchanged() {
        let req = json!({
            "headers": ["header", "array"],
            "id": "id",
            "ip": "127.0.0.1",
            "method": "method",
            "url": "/url",
        });
        assert_eq!(req_serializer(&req), req);
    }

    #[test]
    fn req_serializer_drops_non_standard_members() {
        let req = json!({
            "headers": {},
            "id": "id",
            "ip": "127.0.0.1",
            "method": "GET",
            "nonStandard": "method",
            "url": "/url",
        });
        let out = req_serializer(&req);
        assert!(out.get("nonStandard").is_none());
        assert_eq!(out["ip"], "127.0.0.1");
    }

    #[test]
    fn req_serializer_is_idempotent() {
        let req = json!({ "id": "a", "method": "POST", "extra": 1, "body": "x" });
        let once = req_serializer(&req);
        assert_eq!(req_serializer(&once), once);
    }

    #[test]
    fn req_serializer_leaves_missing_fields_absent() {
        let out = req_serializer(&json!({ "method": "GET" }));
        assert_eq!(out, json!({ "method": "GET" }));
    }

    #[test]
    fn req_body_serializer_includes_body() {
        let out = req_body_serializer(&json!({ "id": "a", "body": "raw", "other": true }));
        assert_eq!(out, json!({ "id": "a", "body": "raw" }));
    }

    // -----------------------------------------------------------------------
    // res
    // -----------------------------------------------------------------------

    #[test]
    fn res_serializer_maps_status_code_and_headers() {
        let res = json!({ "statusCode": 200, "headers": ["header", "array"] });
        assert_eq!(
            res_serializer(&res),
            json!({ "headers": ["header", "array"], "status": 200 })
        );
    }

    #[test]
    fn res_serializer_ignores_body() {
        let res = json!({ "statusCode": 200, "headers": {}, "body": "blah" });
        assert!(res_serializer(&res).get("body").is_none());
    }

    #[test]
    fn res_body_serializer_keeps_body() {
        let res = json!({ "statusCode": 201, "headers": {}, "body": { "data": 1 } });
        assert_eq!(res_body_serializer(&res)["body"], json!({ "data": 1 }));
    }

    // -----------------------------------------------------------------------
    // err
    // -----------------------------------------------------------------------

    #[test]
    fn err_serializer_emits_standard_fields() {
        let err = json!({ "message": "boom", "stack": "at main", "type": "HttpError" });
        let out = err_serializer(&err);
        assert_eq!(out["message"], "boom");
        assert_eq!(out["stack"], "at main");
        assert_eq!(out["type"], "HttpError");
    }

    #[test]
    fn err_serializer_retains_non_standard_fields() {
        let err = json!({
            "message": "nope",
            "stack": "",
            "type": "HttpError",
            "status": 400,
            "nonStandard": { "nested": [1, 2] },
        });
        let out = err_serializer(&err);
        assert_eq!(out["status"], 400);
        assert_eq!(out["nonStandard"], json!({ "nested": [1, 2] }));
    }

    #[test]
    fn err_serializer_handles_non_object_input() {
        let out = err_serializer(&json!("plain"));
        assert_eq!(out["message"], "plain");
        assert_eq!(out["type"], "Value");

        let out = err_serializer(&json!(42));
        assert_eq!(out["message"], "42");
    }

    #[test]
    fn body_bundle_swaps_req_and_res_only() {
        let s = Serializers::with_bodies();
        let raw = json!({ "statusCode": 200, "body": "b" });
        assert_eq!(s.apply("res", &raw).unwrap()["body"], "b");
        assert!(s.apply("other", &raw).is_none());
    }
}
