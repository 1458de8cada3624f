use std::borrow::Cow;

use axum::{
    extract::{Form, Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use crate::web::{
    AppState, AuthUser, auth,
    data::{fetch_work, fetch_work_by_share_key},
    escape_html,
    models::WorkRow,
    responses::{self, server_error},
    storage,
    templates::{PageLayout, render_page},
    works::{
        WorkPasswordForm, WorkViewContext, can_manage, nav_for, password_matches,
        password_prompt, render_work_response, viewer_bypasses_password,
    },
};

const INVALID_LINK: &str = "分享链接无效";

pub async fn share_page(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Path(work_id): Path<i64>,
) -> Response {
    let user = match auth::require_user_redirect(&state, &jar).await {
        Ok(user) => user,
        Err(redirect) => return redirect.into_response(),
    };

    let work = match fetch_work(state.pool_ref(), work_id).await {
        Ok(Some(work)) => work,
        Ok(None) => return responses::not_found("作品不存在。"),
        Err(err) => {
            error!(?err, work_id, "failed to load work for sharing");
            return server_error();
        }
    };

    if !can_manage(&work, &user) {
        return responses::forbidden("只有作品的上传者或管理员可以分享该作品。");
    }

    let share_key = Uuid::new_v4().to_string();
    if let Err(err) =
        sqlx::query("INSERT INTO share_links (work_id, share_key, created_at) VALUES (?, ?, ?)")
            .bind(work.id)
            .bind(&share_key)
            .bind(Utc::now())
            .execute(state.pool_ref())
            .await
    {
        error!(?err, work_id, "failed to create share link");
        return server_error();
    }

    info!(work_id, user_id = user.id, "created share link");

    let base = share_base_url(state.config().public_base_url.as_deref(), &headers);
    let url = format!("{base}/shared/{share_key}");

    Html(render_share_created(&user, &work, &url)).into_response()
}

pub async fn shared_work(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(share_key): Path<String>,
) -> Response {
    let (viewer, work) = match load_shared(&state, &jar, &share_key).await {
        Ok(found) => found,
        Err(response) => return response,
    };

    if !viewer_bypasses_password(&work, viewer.as_ref()) {
        let action = format!("/shared/{share_key}");
        return password_prompt(viewer.as_ref(), &work, &action, None);
    }

    let context = shared_context(&share_key, None);
    render_work_response(&state, viewer.as_ref(), &work, context).await
}

pub async fn unlock_shared_work(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(share_key): Path<String>,
    Form(form): Form<WorkPasswordForm>,
) -> Response {
    let (viewer, work) = match load_shared(&state, &jar, &share_key).await {
        Ok(found) => found,
        Err(response) => return response,
    };

    if viewer_bypasses_password(&work, viewer.as_ref()) {
        let context = shared_context(&share_key, None);
        return render_work_response(&state, viewer.as_ref(), &work, context).await;
    }

    if !password_matches(&work, &form.password) {
        let action = format!("/shared/{share_key}");
        return password_prompt(viewer.as_ref(), &work, &action, Some("密码错误"));
    }

    let context = shared_context(&share_key, Some(&form.password));
    render_work_response(&state, viewer.as_ref(), &work, context).await
}

pub async fn download_shared(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(share_key): Path<String>,
) -> Response {
    let (viewer, work) = match load_shared(&state, &jar, &share_key).await {
        Ok(found) => found,
        Err(response) => return response,
    };

    if !viewer_bypasses_password(&work, viewer.as_ref()) {
        let action = format!("/shared/{share_key}");
        return password_prompt(viewer.as_ref(), &work, &action, None);
    }

    storage::stream_work(state.upload_dir(), &work).await
}

pub async fn download_shared_with_password(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(share_key): Path<String>,
    Form(form): Form<WorkPasswordForm>,
) -> Response {
    let (viewer, work) = match load_shared(&state, &jar, &share_key).await {
        Ok(found) => found,
        Err(response) => return response,
    };

    if !viewer_bypasses_password(&work, viewer.as_ref())
        && !password_matches(&work, &form.password)
    {
        let action = format!("/shared/{share_key}");
        return password_prompt(viewer.as_ref(), &work, &action, Some("密码错误"));
    }

    storage::stream_work(state.upload_dir(), &work).await
}

async fn load_shared(
    state: &AppState,
    jar: &CookieJar,
    share_key: &str,
) -> Result<(Option<AuthUser>, WorkRow), Response> {
    let work = match fetch_work_by_share_key(state.pool_ref(), share_key).await {
        Ok(Some(work)) => work,
        Ok(None) => {
            return Err(responses::html_error(
                StatusCode::NOT_FOUND,
                INVALID_LINK,
                "该分享链接不存在或对应的作品已被删除。",
            ));
        }
        Err(err) => {
            error!(?err, "failed to resolve share link");
            return Err(server_error());
        }
    };

    let viewer = auth::current_user(state, jar).await;
    Ok((viewer, work))
}

fn shared_context<'a>(share_key: &str, unlock_password: Option<&'a str>) -> WorkViewContext<'a> {
    WorkViewContext {
        download_action: format!("/shared/{share_key}/file"),
        unlock_password,
        show_manage_actions: false,
    }
}

/// Base URL for share links: the configured public URL, else `http://<Host>`.
fn share_base_url(public_base_url: Option<&str>, headers: &HeaderMap) -> String {
    if let Some(base) = public_base_url {
        return base.trim_end_matches('/').to_string();
    }

    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(|host| format!("http://{host}"))
        .unwrap_or_default()
}

fn render_share_created(user: &AuthUser, work: &WorkRow, url: &str) -> String {
    let body_html = format!(
        r#"        <section class="panel">
            <h2>{title}</h2>
            <p class="note">任何持有以下链接的人都可以访问该作品{protection}。</p>
            <p class="share-url">{url}</p>
            <p><a href="{url}">打开分享链接</a> · <a href="/work/{id}">返回作品</a></p>
        </section>"#,
        title = escape_html(&work.title),
        protection = if work.is_protected() {
            "（仍需输入访问密码）"
        } else {
            ""
        },
        url = escape_html(url),
        id = work.id,
    );

    render_page(PageLayout {
        meta_title: "分享链接",
        page_heading: "分享链接已生成",
        nav_user: Some(nav_for(user)),
        flash_html: Cow::Borrowed(""),
        body_html: Cow::Owned(body_html),
    })
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn configured_base_url_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("internal:8080"));
        assert_eq!(
            share_base_url(Some("https://share.example.org/"), &headers),
            "https://share.example.org"
        );
    }

    #[test]
    fn host_header_is_used_without_configuration() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("localhost:8080"));
        assert_eq!(share_base_url(None, &headers), "http://localhost:8080");
        assert_eq!(share_base_url(None, &HeaderMap::new()), "");
    }
}
