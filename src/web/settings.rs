use std::borrow::Cow;

use axum::{
    extract::{Form, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use tracing::{error, info};

use crate::web::{
    AppState, AuthUser,
    auth::{self, clear_session_cookie, hash_password, verify_password},
    data::fetch_user,
    escape_html,
    flash::FlashQuery,
    models::UserRow,
    responses::server_error,
    templates::{PageLayout, render_page},
    works::nav_for,
};

#[derive(Deserialize)]
pub struct SettingsForm {
    #[serde(default)]
    action: String,
    #[serde(default)]
    nickname: Option<String>,
    #[serde(default)]
    old_password: Option<String>,
    #[serde(default)]
    new_password: Option<String>,
}

pub async fn settings_page(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<FlashQuery>,
) -> Response {
    let user = match auth::require_user_redirect(&state, &jar).await {
        Ok(user) => user,
        Err(redirect) => return redirect.into_response(),
    };

    match load_profile(&state, &user).await {
        Ok(profile) => Html(render_settings_page(&user, &profile, &params.render())).into_response(),
        Err(response) => response,
    }
}

pub async fn process_settings(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<SettingsForm>,
) -> Response {
    let user = match auth::require_user_redirect(&state, &jar).await {
        Ok(user) => user,
        Err(redirect) => return redirect.into_response(),
    };

    match form.action.as_str() {
        "set_nickname" => set_nickname(&state, &user, form.nickname.as_deref()).await,
        "change_password" => change_password(&state, &user, &form).await,
        "delete_account" => delete_account(&state, &user, jar).await,
        _ => Redirect::to("/user_settings?error=unknown_action").into_response(),
    }
}

async fn set_nickname(state: &AppState, user: &AuthUser, nickname: Option<&str>) -> Response {
    let nickname = nickname.map(str::trim).filter(|value| !value.is_empty());

    if let Err(err) = sqlx::query("UPDATE users SET nickname = ? WHERE id = ?")
        .bind(nickname)
        .bind(user.id)
        .execute(state.pool_ref())
        .await
    {
        error!(?err, user_id = user.id, "failed to update nickname");
        return server_error();
    }

    Redirect::to("/user_settings?status=nickname_saved").into_response()
}

async fn change_password(state: &AppState, user: &AuthUser, form: &SettingsForm) -> Response {
    let stored = match auth::fetch_user_by_username(state.pool_ref(), &user.username).await {
        Ok(Some(stored)) => stored,
        Ok(None) => return Redirect::to("/login").into_response(),
        Err(err) => {
            error!(?err, user_id = user.id, "failed to load password hash");
            return server_error();
        }
    };

    let old_password = form.old_password.as_deref().unwrap_or_default();
    if !verify_password(old_password, &stored.password_hash) {
        return settings_rejected(state, user, "旧密码错误").await;
    }

    let new_password = form.new_password.as_deref().unwrap_or_default();
    if new_password.trim().is_empty() {
        return settings_rejected(state, user, "新密码不能为空").await;
    }

    let password_hash = match hash_password(new_password) {
        Ok(hash) => hash,
        Err(err) => {
            error!(?err, user_id = user.id, "failed to hash new password");
            return server_error();
        }
    };

    if let Err(err) = sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
        .bind(password_hash)
        .bind(user.id)
        .execute(state.pool_ref())
        .await
    {
        error!(?err, user_id = user.id, "failed to change password");
        return server_error();
    }

    info!(user_id = user.id, "user changed password");
    Redirect::to("/user_settings?status=password_changed").into_response()
}

async fn delete_account(state: &AppState, user: &AuthUser, jar: CookieJar) -> Response {
    if user.is_admin {
        let admins: Result<i64, sqlx::Error> =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_admin = 1")
                .fetch_one(state.pool_ref())
                .await;
        match admins {
            Ok(count) if count <= 1 => {
                info!(user_id = user.id, "refused to delete the last admin account");
                return Redirect::to("/user_settings?error=last_admin").into_response();
            }
            Ok(_) => {}
            Err(err) => {
                error!(?err, user_id = user.id, "failed to count admins");
                return server_error();
            }
        }
    }

    if let Err(err) = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(user.id)
        .execute(state.pool_ref())
        .await
    {
        error!(?err, user_id = user.id, "failed to delete account");
        return server_error();
    }

    info!(user_id = user.id, "user deleted own account");
    (
        clear_session_cookie(jar),
        Redirect::to("/login?status=account_deleted"),
    )
        .into_response()
}

async fn load_profile(state: &AppState, user: &AuthUser) -> Result<UserRow, Response> {
    match fetch_user(state.pool_ref(), user.id).await {
        Ok(Some(profile)) => Ok(profile),
        Ok(None) => Err(Redirect::to("/login").into_response()),
        Err(err) => {
            error!(?err, user_id = user.id, "failed to load user profile");
            Err(server_error())
        }
    }
}

async fn settings_rejected(state: &AppState, user: &AuthUser, message: &str) -> Response {
    let profile = match load_profile(state, user).await {
        Ok(profile) => profile,
        Err(response) => return response,
    };
    let flash_html = format!(r#"<div class="flash error">{}</div>"#, escape_html(message));

    (
        StatusCode::BAD_REQUEST,
        Html(render_settings_page(user, &profile, &flash_html)),
    )
        .into_response()
}

fn render_settings_page(user: &AuthUser, profile: &UserRow, flash_html: &str) -> String {
    let body_html = format!(
        r#"        <section class="panel">
            <h2>账号信息</h2>
            <table>
                <tbody>
                    <tr><th>用户名</th><td>{username}</td></tr>
                    <tr><th>昵称</th><td>{nickname}</td></tr>
                    <tr><th>角色</th><td>{role}</td></tr>
                    <tr><th>邀请码</th><td><code>{invite}</code></td></tr>
                </tbody>
            </table>
            <p class="note">把邀请码发给朋友，他们即可注册账号。</p>
        </section>
        <section class="panel">
            <h2>修改昵称</h2>
            <form method="post" action="/user_settings">
                <input type="hidden" name="action" value="set_nickname">
                <label for="nickname">昵称（留空则显示用户名）</label>
                <input id="nickname" type="text" name="nickname" value="{nickname}">
                <button type="submit">保存</button>
            </form>
        </section>
        <section class="panel">
            <h2>修改密码</h2>
            <form method="post" action="/user_settings">
                <input type="hidden" name="action" value="change_password">
                <label for="old_password">旧密码</label>
                <input id="old_password" type="password" name="old_password" required>
                <label for="new_password">新密码</label>
                <input id="new_password" type="password" name="new_password" required>
                <button type="submit">修改密码</button>
            </form>
        </section>
        <section class="panel">
            <h2>删除账号</h2>
            <p class="note">删除后无法恢复，已上传的作品会保留。</p>
            <form method="post" action="/user_settings" onsubmit="return confirm('确认删除账号？');">
                <input type="hidden" name="action" value="delete_account">
                <button type="submit" class="danger">删除账号</button>
            </form>
        </section>"#,
        username = escape_html(&profile.username),
        nickname = escape_html(profile.nickname.as_deref().unwrap_or("")),
        role = if profile.is_admin {
            "管理员"
        } else {
            "普通用户"
        },
        invite = escape_html(profile.invite_code.as_deref().unwrap_or("")),
    );

    render_page(PageLayout {
        meta_title: "用户设置",
        page_heading: "用户设置",
        nav_user: Some(nav_for(user)),
        flash_html: Cow::Borrowed(flash_html),
        body_html: Cow::Owned(body_html),
    })
}
