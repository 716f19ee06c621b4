//! [`http::HeaderMap`] adapter for the `xray` crate's
//! [tracing header](https://docs.aws.amazon.com/xray/latest/devguide/xray-concepts.html?shortFooter=true#xray-concepts-tracingheader).
//!
//! The encode/decode logic itself lives in `xray::TraceContext`; this crate
//! is just the glue to an `http::HeaderMap`, kept separate so depending on
//! `xray` doesn't pull in an HTTP types crate.

use http::{HeaderMap, HeaderValue};
use xray::{TraceContext, HTTP_HEADER_NAME};

/// Recovers a [`TraceContext`] from an inbound request's headers. Returns
/// [`TraceContext::none`] if the header is absent or not valid UTF-8.
pub fn extract(headers: &HeaderMap) -> TraceContext {
    match headers.get(HTTP_HEADER_NAME).and_then(|v| v.to_str().ok()) {
        Some(raw) => TraceContext::decode_http_header(raw),
        None => TraceContext::none(),
    }
}

/// Encodes `context` and inserts it into `headers` as the `X-Amzn-Trace-Id`
/// header, overwriting any existing value.
///
/// Returns an error if the encoded value is not a legal header value (it
/// always is, in practice, since the context's fields are id strings and a
/// single digit, but the conversion is fallible in the `http` crate's own
/// type).
pub fn apply(
    headers: &mut HeaderMap,
    context: &TraceContext,
) -> Result<(), http::header::InvalidHeaderValue> {
    let value = HeaderValue::from_str(&context.encode_http_header())?;
    headers.insert(HTTP_HEADER_NAME, value);
    Ok(())
}
