use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use crate::web::{AppState, admin, archives, auth, landing, settings, share, works};

/// Multipart framing on top of the file itself.
const BODY_LIMIT_SLACK: usize = 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config().max_upload_bytes + BODY_LIMIT_SLACK;

    Router::new()
        .route("/", get(landing::landing_page))
        .route("/healthz", get(healthz))
        .route("/login", get(auth::login_page).post(auth::process_login))
        .route(
            "/register",
            get(auth::register_page).post(auth::process_register),
        )
        .route("/logout", get(auth::logout).post(auth::logout))
        .route("/upload", get(works::upload_page).post(works::process_upload))
        .route("/works", get(works::works_list))
        .route("/work/:id", get(works::work_page).post(works::unlock_work))
        .route(
            "/work/:id/file",
            get(works::download_work).post(works::download_work_with_password),
        )
        .route("/work/:id/edit", post(works::edit_work))
        .route("/work/:id/delete", post(works::delete_work))
        .route("/share/:id", get(share::share_page))
        .route(
            "/shared/:key",
            get(share::shared_work).post(share::unlock_shared_work),
        )
        .route(
            "/shared/:key/file",
            get(share::download_shared).post(share::download_shared_with_password),
        )
        .route(
            "/archives",
            get(archives::archives_page).post(archives::create_archive),
        )
        .route("/archives/tree", get(archives::archive_tree_json))
        .route("/archives/:id", get(archives::archive_detail))
        .route("/archives/:id/works", post(archives::file_work))
        .route("/archives/:id/works/remove", post(archives::unfile_work))
        .route("/archives/:id/rename", post(archives::rename_archive))
        .route("/archives/:id/delete", post(archives::delete_archive))
        .route(
            "/user_management",
            get(admin::user_management_page).post(admin::process_user_management),
        )
        .route(
            "/user_settings",
            get(settings::settings_page).post(settings::process_settings),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}
