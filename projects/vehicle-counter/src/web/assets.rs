use axum::{
    body::Body,
    http::{header, HeaderValue, Response, StatusCode, Uri},
    response::IntoResponse,
};
use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "assets/"]
pub struct Assets;

pub async fn static_handler(uri: Uri) -> impl IntoResponse {
    let path = uri.path().trim_start_matches('/');

    if path.is_empty() || path == "index.html" {
        return index_response();
    }

    serve_asset(path).unwrap_or_else(not_found)
}

pub async fn index_handler() -> impl IntoResponse {
    index_response()
}

fn index_response() -> Response<Body> {
    serve_asset("index.html").unwrap_or_else(not_found)
}

fn not_found(status: StatusCode) -> Response<Body> {
    (status, "404 Not Found").into_response()
}

fn serve_asset(path: &str) -> Result<Response<Body>, StatusCode> {
    let asset = Assets::get(path).ok_or(StatusCode::NOT_FOUND)?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let content_type = HeaderValue::from_str(mime.as_ref())
        .unwrap_or(HeaderValue::from_static("application/octet-stream"));

    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(asset.data.into_owned()))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_is_embedded() {
        let response = serve_asset("index.html").unwrap();
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/html"
        );
    }

    #[test]
    fn test_unknown_asset() {
        assert_eq!(serve_asset("missing.js").unwrap_err(), StatusCode::NOT_FOUND);
    }
}
