use std::borrow::Cow;

use axum::{
    extract::{Query, State},
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::error;

use crate::web::{
    AppState, AuthUser, auth,
    data::fetch_works_owned_by,
    escape_html,
    flash::FlashQuery,
    models::WorkRow,
    responses::server_error,
    templates::{NavUser, PageLayout, render_page},
};

pub async fn landing_page(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<FlashQuery>,
) -> Response {
    let Some(user) = auth::current_user(&state, &jar).await else {
        return Redirect::to("/login").into_response();
    };

    let own_works = match fetch_works_owned_by(state.pool_ref(), user.id).await {
        Ok(works) => works,
        Err(err) => {
            error!(?err, user_id = user.id, "failed to load works for landing page");
            return server_error();
        }
    };

    Html(render_main_page(&user, &params, &own_works)).into_response()
}

fn render_main_page(user: &AuthUser, params: &FlashQuery, own_works: &[WorkRow]) -> String {
    let mut cards = vec![
        ("上传作品", "上传文件，可选设置访问密码。", "/upload"),
        ("作品列表", "浏览平台上的全部作品。", "/works"),
        ("归档管理", "用层级归档整理作品。", "/archives"),
        ("用户设置", "修改昵称、密码，查看邀请码。", "/user_settings"),
    ];
    if user.is_admin {
        cards.push(("用户管理", "创建、重置或删除用户账号。", "/user_management"));
    }

    let module_cards = cards
        .iter()
        .map(|(title, description, href)| {
            format!(
                r#"<a class="panel module-card" href="{href}"><h2>{title}</h2><p class="note">{description}</p></a>"#,
                title = escape_html(title),
                description = escape_html(description),
                href = href,
            )
        })
        .collect::<String>();

    let works_html = if own_works.is_empty() {
        r#"<p class="note">你还没有上传作品。</p>"#.to_string()
    } else {
        let rows = own_works
            .iter()
            .map(|work| {
                let lock = if work.is_protected() {
                    r#" <span class="lock">已加密</span>"#
                } else {
                    ""
                };
                format!(
                    r#"<li><a href="/work/{id}">{title}</a>{lock}</li>"#,
                    id = work.id,
                    title = escape_html(&work.title),
                    lock = lock,
                )
            })
            .collect::<String>();
        format!("<ul>{rows}</ul>")
    };

    let body_html = format!(
        r#"        <style>
            .modules-grid {{ display: grid; gap: 1.25rem; grid-template-columns: repeat(auto-fit, minmax(200px, 1fr)); margin-bottom: 2rem; }}
            .module-card {{ display: block; text-decoration: none; color: inherit; }}
            .module-card h2 {{ margin: 0 0 0.5rem; font-size: 1.15rem; color: #1d4ed8; }}
        </style>
        <p class="note">欢迎，<strong>{username}</strong>。</p>
        <div class="modules-grid">{module_cards}</div>
        <section class="panel">
            <h2>我的作品</h2>
            {works_html}
        </section>"#,
        username = escape_html(&user.username),
        module_cards = module_cards,
        works_html = works_html,
    );

    render_page(PageLayout {
        meta_title: "首页",
        page_heading: "作品共享平台",
        nav_user: Some(NavUser {
            username: &user.username,
            is_admin: user.is_admin,
        }),
        flash_html: Cow::Owned(params.render()),
        body_html: Cow::Owned(body_html),
    })
}
