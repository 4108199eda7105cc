//! Span builder helpers for redirect-helper instrumentation.

/// Create a tracing span for one API request.
///
/// Usage: `let span = api_request_span!(request_id, "/api/update");`
///
/// Fields recorded later by the handler:
/// - `status`: HTTP status code of the response
/// - `result`: short outcome label (`success`, `unauthorized`, ...)
#[macro_export]
macro_rules! api_request_span {
    ($request_id:expr, $endpoint:expr) => {
        tracing::info_span!(
            "api_request",
            request_id = %$request_id,
            endpoint = %$endpoint,
            status = tracing::field::Empty,
            result = tracing::field::Empty,
        )
    };
}

/// Create a tracing span for a redirect answer (path or domain).
#[macro_export]
macro_rules! redirect_span {
    ($kind:expr, $key:expr) => {
        tracing::debug_span!(
            "redirect",
            kind = %$kind,
            key = %$key,
            location = tracing::field::Empty,
        )
    };
}
