use axum::response::Redirect;
use axum_extra::extract::cookie::CookieJar;

use crate::web::{AppState, AuthUser, auth};

/// Guard for admin-only pages: anonymous visitors go to `/login`, signed-in
/// non-admins back home with `not_authorized`.
pub async fn require_admin_user(state: &AppState, jar: &CookieJar) -> Result<AuthUser, Redirect> {
    let user = auth::require_user_redirect(state, jar).await?;

    if !user.is_admin {
        return Err(Redirect::to("/?error=not_authorized"));
    }

    Ok(user)
}
