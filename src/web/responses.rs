use std::borrow::Cow;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use serde::Serialize;

use crate::web::templates::{PageLayout, escape_html, render_page};

/// Canonical JSON payload for error responses.
#[derive(Debug, Serialize, Clone)]
pub struct ApiMessage {
    pub message: String,
}

impl ApiMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Helper for controllers that need to return `(StatusCode, Json<ApiMessage>)`.
pub fn json_error(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<ApiMessage>) {
    (status, Json(ApiMessage::new(message)))
}

/// Minimal HTML page carrying a status code and a single message.
pub fn html_error(status: StatusCode, heading: &str, message: &str) -> Response {
    let body_html = format!(
        r#"        <section class="panel">
            <p>{message}</p>
            <p><a href="/">返回首页</a></p>
        </section>"#,
        message = escape_html(message),
    );

    let html = render_page(PageLayout {
        meta_title: heading,
        page_heading: heading,
        nav_user: None,
        flash_html: Cow::Borrowed(""),
        body_html: Cow::Owned(body_html),
    });

    (status, Html(html)).into_response()
}

pub fn server_error() -> Response {
    html_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "服务器错误",
        "服务器内部错误，请稍后再试。",
    )
}

pub fn not_found(message: &str) -> Response {
    html_error(StatusCode::NOT_FOUND, "未找到", message)
}

pub fn forbidden(message: &str) -> Response {
    html_error(StatusCode::FORBIDDEN, "无权访问", message)
}
