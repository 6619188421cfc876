//! Request routing for the health server.
//!
//! Exactly one route is served:
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | `GET`, `HEAD` | `/` | `200 OK` or `418 I'm a teapot`, plus `Last-Success` |
//! | other | `/` | `405 Method Not Allowed` |
//! | any | other | `404 Not Found` |

use std::convert::Infallible;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, ALLOW, CONTENT_TYPE};
use http_body_util::Full;
use hyper::body::Incoming as IncomingBody;
use hyper::{Method, Request, Response, StatusCode};
use tracing::debug;

use crate::health::StalenessChecker;
use crate::heartbeat::iso8601;

/// Header carrying the ISO-8601 time of the last recorded heartbeat.
pub const LAST_SUCCESS_HEADER: HeaderName = HeaderName::from_static("last-success");

const TEXT_PLAIN: HeaderValue = HeaderValue::from_static("text/plain; charset=utf-8");

/// Handle a health server request.
pub async fn handle_request(
    req: Request<IncomingBody>,
    checker: &StalenessChecker,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(route(req.method(), req.uri().path(), checker))
}

/// Build the response for `method` and `path`.
pub fn route(method: &Method, path: &str, checker: &StalenessChecker) -> Response<Full<Bytes>> {
    if path != "/" {
        return text_response(StatusCode::NOT_FOUND, "Not Found");
    }

    if *method != Method::GET && *method != Method::HEAD {
        let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("GET, HEAD"));
        return response;
    }

    let verdict = checker.check();
    debug!(
        status = %verdict.status,
        delay_secs = verdict.delay_secs,
        "Health check"
    );

    let mut response = text_response(verdict.status.status_code(), verdict.status.body());
    if let Ok(value) = HeaderValue::from_str(&iso8601(verdict.last_success)) {
        response.headers_mut().insert(LAST_SUCCESS_HEADER, value);
    }
    response
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, TEXT_PLAIN);
    response
}
