use super::*;
use serde_json::json;

// =============================================================================
// ApiRequest
// =============================================================================

#[test]
fn builders_set_method_and_auth() {
    let login = ApiRequest::post("/auth/login/").anonymous();
    assert_eq!(login.method, Method::POST);
    assert_eq!(login.auth, RequestAuth::Anonymous);
    assert!(!login.retried());

    let profile = ApiRequest::get("/auth/profile/");
    assert_eq!(profile.auth, RequestAuth::Bearer);
    assert!(profile.body.is_none());
}

#[test]
fn with_json_serializes_body() {
    #[derive(Serialize)]
    struct Body<'a> {
        refresh: &'a str,
    }
    let request = ApiRequest::post("/auth/logout/").with_json(&Body { refresh: "r1" }).unwrap();
    assert_eq!(request.body, Some(json!({ "refresh": "r1" })));
}

#[test]
fn debug_redacts_bearer() {
    let mut request = ApiRequest::get("/auth/profile/");
    request.set_bearer(Some("very-secret".into()));
    let debug = format!("{request:?}");
    assert!(!debug.contains("very-secret"));
    assert!(debug.contains("redacted"));
    assert_eq!(request.bearer(), Some("very-secret"));
}

// =============================================================================
// ApiResponse
// =============================================================================

#[test]
fn error_for_status_passes_success() {
    let response = ApiResponse::new(204, Value::Null);
    assert!(response.clone().error_for_status().is_ok());
    assert!(response.is_success());
}

#[test]
fn error_for_status_classifies_failure() {
    let err = ApiResponse::new(403, json!({ "detail": "nope" })).error_for_status().unwrap_err();
    assert_eq!(err.error_code(), "E_FORBIDDEN");
}

#[test]
fn json_reports_shape_mismatch_as_decode() {
    #[derive(Debug, serde::Deserialize)]
    struct Needs {
        #[allow(dead_code)]
        id: i64,
    }
    let err = ApiResponse::new(200, json!({ "name": "x" })).json::<Needs>().unwrap_err();
    assert_eq!(err.error_code(), "E_DECODE");
}

// =============================================================================
// parse_body
// =============================================================================

#[test]
fn parse_body_empty_is_null() {
    assert_eq!(parse_body(""), Value::Null);
    assert_eq!(parse_body("  \n"), Value::Null);
}

#[test]
fn parse_body_keeps_non_json_text() {
    assert_eq!(parse_body("<h1>Bad Gateway</h1>"), Value::String("<h1>Bad Gateway</h1>".into()));
}

#[test]
fn parse_body_decodes_json() {
    assert_eq!(parse_body(r#"{"detail":"x"}"#), json!({ "detail": "x" }));
}

// =============================================================================
// ReqwestTransport
// =============================================================================

#[test]
fn url_joins_root_and_path() {
    let config = ClientConfig::default();
    let transport = ReqwestTransport::new(&config).unwrap();
    assert_eq!(transport.url("/auth/login/"), "http://localhost:8000/api/v1/auth/login/");
    assert_eq!(transport.url("subscribe/status/"), "http://localhost:8000/api/v1/subscribe/status/");
}
