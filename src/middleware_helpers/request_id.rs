use crate::tracing::RequestId;
use axum::{
    extract::Request,
    http::{header::HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;

/// Header name for the request ID
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 128;

/// Reuse a caller supplied id when it is a sane header value, otherwise mint one.
fn incoming_request_id(request: &Request) -> Option<(RequestId, HeaderValue)> {
    let raw = request.headers().get(REQUEST_ID_HEADER)?;
    let value = raw.to_str().ok()?.trim();
    if value.is_empty() || value.len() > MAX_REQUEST_ID_LEN {
        return None;
    }
    Some((RequestId::new(value), raw.clone()))
}

/// Middleware to add request ID to every request
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let (request_id, header_value) = match incoming_request_id(&request) {
        Some(found) => found,
        None => {
            let generated = RequestId::default();
            // uuid strings are always valid header values
            match HeaderValue::from_str(generated.as_str()) {
                Ok(value) => (generated, value),
                Err(_) => (generated, HeaderValue::from_static("unknown")),
            }
        }
    };

    request.headers_mut().insert(
        HeaderName::from_static(REQUEST_ID_HEADER),
        header_value.clone(),
    );
    request.extensions_mut().insert(request_id.clone());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id.as_str(),
        method = %request.method(),
        uri = %request.uri(),
    );

    let mut response = crate::tracing::scope_request_id(request_id, next.run(request))
        .instrument(span)
        .await;

    response
        .headers_mut()
        .insert(HeaderName::from_static(REQUEST_ID_HEADER), header_value);

    response
}
