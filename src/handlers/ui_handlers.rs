//! Serves the drag-and-drop upload page.

use axum::response::Html;

const INDEX_HTML: &str = include_str!("../../public/index.html");

/// `GET /`
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}
