use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use axum::{
    extract::{Form, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{Duration as ChronoDuration, Utc};
use cookie::time::Duration as CookieDuration;
use rand_core::OsRng;
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::{error, info};
use uuid::Uuid;

use crate::web::{
    AppState, render_login_page, render_register_page,
    responses::server_error,
};

#[derive(Clone, sqlx::FromRow)]
pub struct DbUserAuth {
    pub id: i64,
    pub password_hash: String,
}

#[derive(Clone, sqlx::FromRow)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
    pub is_admin: bool,
}

pub const SESSION_COOKIE: &str = "auth_token";
pub const SESSION_TTL_DAYS: i64 = 7;

#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RegisterForm {
    pub username: String,
    pub password: String,
    pub invite_code: String,
}

#[derive(Default, Deserialize)]
pub struct LoginQuery {
    pub status: Option<String>,
}

pub async fn login_page(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<LoginQuery>,
) -> Result<Html<String>, Redirect> {
    if let Some(redirect) = redirect_if_authenticated(&state, &jar).await {
        return Err(redirect);
    }

    let notice = match params.status.as_deref() {
        Some("registered") => Some("注册成功，请登录。"),
        Some("logged_out") => Some("已退出登录。"),
        Some("account_deleted") => Some("账号已删除。"),
        _ => None,
    };

    Ok(Html(render_login_page(None, notice)))
}

pub async fn process_login(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Result<(CookieJar, Redirect), Response> {
    let username = form.username.trim();

    let user = match fetch_user_by_username(state.pool_ref(), username).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err(invalid_credentials()),
        Err(err) => {
            error!(?err, "failed to fetch user during login");
            return Err(server_error());
        }
    };

    if !verify_password(&form.password, &user.password_hash) {
        return Err(invalid_credentials());
    }

    let session_token = Uuid::new_v4();
    let expires_at = Utc::now() + ChronoDuration::days(SESSION_TTL_DAYS);

    if let Err(err) = sqlx::query("INSERT INTO sessions (id, user_id, expires_at) VALUES (?, ?, ?)")
        .bind(session_token.to_string())
        .bind(user.id)
        .bind(expires_at.timestamp())
        .execute(state.pool_ref())
        .await
    {
        error!(?err, "failed to create session");
        return Err(server_error());
    }

    let mut cookie = Cookie::new(SESSION_COOKIE, session_token.to_string());
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_max_age(CookieDuration::days(SESSION_TTL_DAYS));

    let jar = jar.add(cookie);
    Ok((jar, Redirect::to("/")))
}

pub async fn register_page(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Html<String>, Redirect> {
    if let Some(redirect) = redirect_if_authenticated(&state, &jar).await {
        return Err(redirect);
    }

    Ok(Html(render_register_page(None, "", "")))
}

pub async fn process_register(
    State(state): State<AppState>,
    Form(form): Form<RegisterForm>,
) -> Response {
    let username = form.username.trim();
    let invite_code = form.invite_code.trim();

    let reject = |message: &str| {
        (
            StatusCode::BAD_REQUEST,
            Html(render_register_page(Some(message), username, invite_code)),
        )
            .into_response()
    };

    if username.is_empty() || form.password.is_empty() {
        return reject("请输入用户名和密码。");
    }

    match invite_code_is_valid(state.pool_ref(), invite_code).await {
        Ok(true) => {}
        Ok(false) => return reject("邀请码无效"),
        Err(err) => {
            error!(?err, "failed to validate invite code");
            return server_error();
        }
    }

    let password_hash = match hash_password(&form.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!(?err, "failed to hash password during registration");
            return server_error();
        }
    };

    match insert_user(
        state.pool_ref(),
        username,
        &password_hash,
        false,
        Some(invite_code),
    )
    .await
    {
        Ok(user_id) => {
            info!(user_id, %username, "registered new user");
            Redirect::to("/login?status=registered").into_response()
        }
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            reject("用户名已存在")
        }
        Err(err) => {
            error!(?err, "failed to register user");
            server_error()
        }
    }
}

pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Redirect) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Ok(token) = Uuid::parse_str(cookie.value()) {
            if let Err(err) = sqlx::query("DELETE FROM sessions WHERE id = ?")
                .bind(token.to_string())
                .execute(state.pool_ref())
                .await
            {
                error!(?err, "failed to remove session during logout");
            }
        }
    }

    (clear_session_cookie(jar), Redirect::to("/login?status=logged_out"))
}

pub fn clear_session_cookie(jar: CookieJar) -> CookieJar {
    let mut removal = Cookie::new(SESSION_COOKIE, "");
    removal.set_path("/");
    removal.set_http_only(true);
    removal.set_same_site(SameSite::Lax);
    removal.set_max_age(CookieDuration::seconds(0));
    jar.remove(removal)
}

/// Resolves the signed-in user, if any. Lookup failures are logged and treated as anonymous.
pub async fn current_user(state: &AppState, jar: &CookieJar) -> Option<AuthUser> {
    let token_cookie = jar.get(SESSION_COOKIE)?;
    let token = Uuid::parse_str(token_cookie.value()).ok()?;

    match fetch_user_by_session(state.pool_ref(), token).await {
        Ok(user) => user,
        Err(err) => {
            error!(?err, "failed to resolve session");
            None
        }
    }
}

pub async fn require_user_redirect(state: &AppState, jar: &CookieJar) -> Result<AuthUser, Redirect> {
    current_user(state, jar)
        .await
        .ok_or_else(|| Redirect::to("/login"))
}

pub async fn redirect_if_authenticated(state: &AppState, jar: &CookieJar) -> Option<Redirect> {
    current_user(state, jar).await.map(|_| Redirect::to("/"))
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let parsed = PasswordHash::new(password_hash);
    match parsed {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

pub async fn fetch_user_by_username(
    pool: &SqlitePool,
    username: &str,
) -> sqlx::Result<Option<DbUserAuth>> {
    sqlx::query_as::<_, DbUserAuth>("SELECT id, password_hash FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await
}

pub async fn fetch_user_by_session(pool: &SqlitePool, token: Uuid) -> sqlx::Result<Option<AuthUser>> {
    sqlx::query_as::<_, AuthUser>(
        "SELECT users.id, users.username, users.is_admin FROM sessions JOIN users ON users.id = sessions.user_id WHERE sessions.id = ? AND sessions.expires_at > ?",
    )
    .bind(token.to_string())
    .bind(Utc::now().timestamp())
    .fetch_optional(pool)
    .await
}

pub async fn invite_code_is_valid(pool: &SqlitePool, invite_code: &str) -> sqlx::Result<bool> {
    if invite_code.is_empty() {
        return Ok(false);
    }

    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE invite_code = ?)")
        .bind(invite_code)
        .fetch_one(pool)
        .await
}

/// Inserts a user row and returns its id.
pub async fn insert_user(
    pool: &SqlitePool,
    username: &str,
    password_hash: &str,
    is_admin: bool,
    invite_code: Option<&str>,
) -> sqlx::Result<i64> {
    let result = sqlx::query(
        "INSERT INTO users (username, password_hash, is_admin, invite_code, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(username)
    .bind(password_hash)
    .bind(is_admin)
    .bind(invite_code)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

fn invalid_credentials() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Html(render_login_page(Some("用户名或密码错误"), None)),
    )
        .into_response()
}
