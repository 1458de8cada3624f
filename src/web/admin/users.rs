use std::borrow::Cow;

use axum::{
    extract::{Form, Query, State},
    response::{Html, Redirect},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::web::{
    AppState, AuthUser,
    auth::{self},
    data::fetch_users,
    escape_html,
    flash::FlashQuery,
    models::UserRow,
    templates::{PageLayout, render_page},
    works::nav_for,
};

use super::auth::require_admin_user;

#[derive(Deserialize)]
pub struct UserManagementForm {
    #[serde(default)]
    action: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

pub async fn user_management_page(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<FlashQuery>,
) -> Result<Html<String>, Redirect> {
    let admin = require_admin_user(&state, &jar).await?;

    let users = fetch_users(state.pool_ref()).await.map_err(|err| {
        error!(?err, "failed to load users");
        Redirect::to("/?error=unknown")
    })?;

    Ok(Html(render_user_management(&admin, &users, &params)))
}

pub async fn process_user_management(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<UserManagementForm>,
) -> Result<Redirect, Redirect> {
    let admin = require_admin_user(&state, &jar).await?;

    let code = match form.action.as_str() {
        "create" => create_user(&state, &form).await,
        "delete" => delete_user(&state, &admin, &form).await,
        "reset_password" => reset_password(&state, &form).await,
        other => {
            info!(action = other, "unknown user management action");
            "error=unknown_action"
        }
    };

    Ok(Redirect::to(&format!("/user_management?{code}")))
}

async fn create_user(state: &AppState, form: &UserManagementForm) -> &'static str {
    let username = form.username.as_deref().unwrap_or_default().trim();
    if username.is_empty() {
        return "error=missing_username";
    }

    let password = form.password.as_deref().unwrap_or_default();
    if password.trim().is_empty() {
        return "error=missing_password";
    }

    let password_hash = match auth::hash_password(password) {
        Ok(hash) => hash,
        Err(err) => {
            error!(?err, "failed to hash password while creating user");
            return "error=unknown";
        }
    };

    let invite_code = Uuid::new_v4().to_string();
    match auth::insert_user(
        state.pool_ref(),
        username,
        &password_hash,
        false,
        Some(&invite_code),
    )
    .await
    {
        Ok(user_id) => {
            info!(user_id, "admin created user");
            "status=user_created"
        }
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => "error=duplicate",
        Err(err) => {
            error!(?err, "failed to create user");
            "error=unknown"
        }
    }
}

async fn delete_user(
    state: &AppState,
    admin: &AuthUser,
    form: &UserManagementForm,
) -> &'static str {
    let Some(user_id) = parse_user_id(form) else {
        return "error=user_missing";
    };

    if user_id == admin.id {
        return "error=self_delete";
    }

    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(user_id)
        .execute(state.pool_ref())
        .await;

    match result {
        Ok(res) if res.rows_affected() > 0 => {
            info!(user_id, admin_id = admin.id, "admin deleted user");
            "status=user_deleted"
        }
        Ok(_) => "error=user_missing",
        Err(err) => {
            error!(?err, user_id, "failed to delete user");
            "error=unknown"
        }
    }
}

async fn reset_password(state: &AppState, form: &UserManagementForm) -> &'static str {
    let Some(user_id) = parse_user_id(form) else {
        return "error=user_missing";
    };

    let password = form.password.as_deref().unwrap_or_default();
    if password.trim().is_empty() {
        return "error=missing_password";
    }

    let password_hash = match auth::hash_password(password) {
        Ok(hash) => hash,
        Err(err) => {
            error!(?err, "failed to hash password while resetting user password");
            return "error=unknown";
        }
    };

    let result = sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
        .bind(password_hash)
        .bind(user_id)
        .execute(state.pool_ref())
        .await;

    match result {
        Ok(res) if res.rows_affected() > 0 => "status=password_reset",
        Ok(_) => "error=user_missing",
        Err(err) => {
            error!(?err, user_id, "failed to reset user password");
            "error=unknown"
        }
    }
}

fn parse_user_id(form: &UserManagementForm) -> Option<i64> {
    form.user_id
        .as_deref()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
}

fn render_user_management(admin: &AuthUser, users: &[UserRow], params: &FlashQuery) -> String {
    let mut table_rows = String::new();

    if users.is_empty() {
        table_rows.push_str("<tr><td colspan=\"6\">当前还没有用户。</td></tr>");
    } else {
        for user in users {
            let role = if user.is_admin {
                "管理员"
            } else {
                "普通用户"
            };
            let delete_form = if user.id == admin.id {
                "<span class=\"note\">当前账号</span>".to_string()
            } else {
                format!(
                    r#"<form method="post" action="/user_management" class="inline-form" onsubmit="return confirm('确认删除该用户？其作品将保留。');">
                        <input type="hidden" name="action" value="delete">
                        <input type="hidden" name="user_id" value="{id}">
                        <button type="submit" class="danger">删除</button>
                    </form>"#,
                    id = user.id,
                )
            };
            table_rows.push_str(&format!(
                "<tr><td>{id}</td><td>{username}</td><td>{nickname}</td><td>{role}</td><td><code>{invite}</code></td><td>{delete_form}</td></tr>",
                id = user.id,
                username = escape_html(&user.username),
                nickname = escape_html(user.display_name()),
                role = role,
                invite = escape_html(user.invite_code.as_deref().unwrap_or("")),
                delete_form = delete_form,
            ));
        }
    }

    let user_options = users
        .iter()
        .map(|user| {
            format!(
                "<option value=\"{id}\">{name}</option>",
                id = user.id,
                name = escape_html(&user.username),
            )
        })
        .collect::<String>();

    let body_html = format!(
        r#"        <section class="panel">
            <h2>用户列表</h2>
            <table>
                <thead><tr><th>编号</th><th>用户名</th><th>显示名称</th><th>角色</th><th>邀请码</th><th>操作</th></tr></thead>
                <tbody>{table_rows}</tbody>
            </table>
        </section>
        <section class="panel">
            <h2>创建用户</h2>
            <form method="post" action="/user_management">
                <input type="hidden" name="action" value="create">
                <label for="new-username">用户名</label>
                <input id="new-username" name="username" required>
                <label for="new-password">初始密码</label>
                <input id="new-password" type="password" name="password" required>
                <button type="submit">创建</button>
            </form>
        </section>
        <section class="panel">
            <h2>重置密码</h2>
            <form method="post" action="/user_management">
                <input type="hidden" name="action" value="reset_password">
                <label for="reset-user">用户</label>
                <select id="reset-user" name="user_id">{user_options}</select>
                <label for="reset-password">新密码</label>
                <input id="reset-password" type="password" name="password" required>
                <button type="submit">重置</button>
            </form>
        </section>"#,
        table_rows = table_rows,
        user_options = user_options,
    );

    render_page(PageLayout {
        meta_title: "用户管理",
        page_heading: "用户管理",
        nav_user: Some(nav_for(admin)),
        flash_html: Cow::Owned(params.render()),
        body_html: Cow::Owned(body_html),
    })
}
