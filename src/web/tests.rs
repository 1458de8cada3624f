use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use crate::{
    config::AppConfig,
    maintenance,
    web::{
        AppState,
        auth::{self, SESSION_COOKIE},
        router::build_router,
    },
};

const ADMIN_USERNAME: &str = "admin";
const ADMIN_PASSWORD: &str = "admin-secret";
const BOUNDARY: &str = "work-share-test-boundary";

struct TestApp {
    dir: TempDir,
    state: AppState,
    router: Router,
}

impl TestApp {
    async fn spawn() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            database_url: format!("sqlite://{}", dir.path().join("test.db").display()),
            upload_dir: dir.path().join("uploads"),
            public_base_url: Some("http://share.test".to_string()),
            max_upload_bytes: 1024 * 1024,
            seed_admin_username: ADMIN_USERNAME.to_string(),
            seed_admin_password: ADMIN_PASSWORD.to_string(),
        };

        let state = AppState::new(config).await.unwrap();
        state.ensure_seed_admin().await.unwrap();
        let router = build_router(state.clone());

        Self { dir, state, router }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> Response {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::COOKIE, format!("{SESSION_COOKIE}={token}"));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn post_form(&self, uri: &str, token: Option<&str>, body: &str) -> Response {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(token) = token {
            builder = builder.header(header::COOKIE, format!("{SESSION_COOKIE}={token}"));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn upload(
        &self,
        token: &str,
        fields: &[(&str, &str)],
        file_name: &str,
        contents: &str,
    ) -> Response {
        let mut body = String::new();
        for (name, value) in fields {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n{contents}\r\n--{BOUNDARY}--\r\n"
        ));

        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .header(header::COOKIE, format!("{SESSION_COOKIE}={token}"))
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    async fn login(&self, username: &str, password: &str) -> String {
        let response = self
            .post_form(
                "/login",
                None,
                &format!("username={username}&password={password}"),
            )
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(|value| {
                value
                    .split(';')
                    .next()
                    .and_then(|pair| pair.strip_prefix(&format!("{SESSION_COOKIE}=")))
                    .map(str::to_string)
            })
            .expect("login sets the session cookie")
    }

    async fn create_member(&self, username: &str, password: &str) -> i64 {
        let hash = auth::hash_password(password).unwrap();
        auth::insert_user(self.state.pool_ref(), username, &hash, false, Some("member-invite"))
            .await
            .unwrap()
    }

    async fn admin_token(&self) -> String {
        self.login(ADMIN_USERNAME, ADMIN_PASSWORD).await
    }

    async fn user_id(&self, username: &str) -> Option<i64> {
        sqlx::query_scalar("SELECT id FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(self.state.pool_ref())
            .await
            .unwrap()
    }

    async fn work_id(&self, title: &str) -> i64 {
        sqlx::query_scalar("SELECT id FROM works WHERE title = ?")
            .bind(title)
            .fetch_one(self.state.pool_ref())
            .await
            .unwrap()
    }

    async fn archive_id(&self, name: &str) -> i64 {
        sqlx::query_scalar("SELECT id FROM archives WHERE name = ?")
            .bind(name)
            .fetch_one(self.state.pool_ref())
            .await
            .unwrap()
    }

    async fn count(&self, sql: &str) -> i64 {
        sqlx::query_scalar(sql)
            .fetch_one(self.state.pool_ref())
            .await
            .unwrap()
    }
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn location(response: &Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

#[tokio::test]
async fn anonymous_root_redirects_to_login_and_healthz_answers() {
    let app = TestApp::spawn().await;

    let response = app.get("/", None).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");

    let response = app.get("/healthz", None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn login_with_wrong_password_is_rejected() {
    let app = TestApp::spawn().await;

    let response = app
        .post_form("/login", None, "username=admin&password=wrong")
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(body_text(response).await.contains("用户名或密码错误"));
}

#[tokio::test]
async fn registration_with_unknown_invite_creates_no_user() {
    let app = TestApp::spawn().await;

    let response = app
        .post_form(
            "/register",
            None,
            "username=bob&password=pw&invite_code=not-a-code",
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("邀请码无效"));
    assert_eq!(app.user_id("bob").await, None);
}

#[tokio::test]
async fn registration_with_valid_invite_creates_member_who_can_log_in() {
    let app = TestApp::spawn().await;
    let invite: String =
        sqlx::query_scalar("SELECT invite_code FROM users WHERE username = 'admin'")
            .fetch_one(app.state.pool_ref())
            .await
            .unwrap();

    let form = format!("username=bob&password=pw&invite_code={invite}");
    let response = app.post_form("/register", None, &form).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login?status=registered");

    let (is_admin, code): (bool, Option<String>) =
        sqlx::query_as("SELECT is_admin, invite_code FROM users WHERE username = 'bob'")
            .fetch_one(app.state.pool_ref())
            .await
            .unwrap();
    assert!(!is_admin);
    assert_eq!(code.as_deref(), Some(invite.as_str()));

    let token = app.login("bob", "pw").await;
    let home = body_text(app.get("/", Some(&token)).await).await;
    assert!(home.contains("bob"));
    assert!(!home.contains("/user_management"));

    let response = app.post_form("/register", None, &form).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("用户名已存在"));
}

#[tokio::test]
async fn protected_work_prompts_and_validates_password() {
    let app = TestApp::spawn().await;
    app.create_member("bob", "pw").await;
    app.create_member("carol", "pw").await;
    let bob = app.login("bob", "pw").await;
    let carol = app.login("carol", "pw").await;

    let response = app
        .upload(
            &bob,
            &[("title", "Secret Poster"), ("password", "open-sesame")],
            "poster.txt",
            "hidden contents",
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/works?status=uploaded");
    let work_id = app.work_id("Secret Poster").await;

    let page = body_text(app.get(&format!("/work/{work_id}"), Some(&carol)).await).await;
    assert!(page.contains("请输入作品访问密码"));
    assert!(!page.contains("下载作品"));

    // Owners get the prompt too.
    let page = body_text(app.get(&format!("/work/{work_id}"), Some(&bob)).await).await;
    assert!(page.contains("请输入作品访问密码"));

    let response = app
        .post_form(&format!("/work/{work_id}"), Some(&carol), "password=wrong")
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(body_text(response).await.contains("密码错误"));

    let response = app
        .post_form(&format!("/work/{work_id}"), Some(&carol), "password=open-sesame")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_text(response).await;
    assert!(page.contains("Secret Poster"));
    assert!(page.contains("下载作品"));

    let page = body_text(app.get(&format!("/work/{work_id}/file"), Some(&carol)).await).await;
    assert!(page.contains("请输入作品访问密码"));

    let response = app
        .post_form(
            &format!("/work/{work_id}/file"),
            Some(&carol),
            "password=open-sesame",
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(disposition.starts_with("attachment; filename=\"poster.txt\""));
    assert_eq!(body_text(response).await, "hidden contents");
}

#[tokio::test]
async fn admin_bypasses_work_password() {
    let app = TestApp::spawn().await;
    app.create_member("bob", "pw").await;
    let bob = app.login("bob", "pw").await;
    let admin = app.admin_token().await;

    app.upload(
        &bob,
        &[("title", "Locked"), ("password", "pw2")],
        "locked.txt",
        "admin can read",
    )
    .await;
    let work_id = app.work_id("Locked").await;

    let page = body_text(app.get(&format!("/work/{work_id}"), Some(&admin)).await).await;
    assert!(page.contains("下载作品"));
    assert!(!page.contains("请输入作品访问密码"));

    let response = app.get(&format!("/work/{work_id}/file"), Some(&admin)).await;
    assert_eq!(body_text(response).await, "admin can read");
}

#[tokio::test]
async fn upload_rejects_bad_extension_and_unknown_archive() {
    let app = TestApp::spawn().await;
    app.create_member("bob", "pw").await;
    let bob = app.login("bob", "pw").await;

    let response = app
        .upload(&bob, &[("title", "Binary")], "tool.exe", "MZ")
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("不支持的文件类型"));

    let response = app
        .upload(
            &bob,
            &[("title", "Lost"), ("archive_id", "999")],
            "lost.txt",
            "x",
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("所选归档不存在"));

    assert_eq!(app.count("SELECT COUNT(*) FROM works").await, 0);
    let leftovers = std::fs::read_dir(app.dir.path().join("uploads"))
        .unwrap()
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn share_links_resolve_and_validate_password() {
    let app = TestApp::spawn().await;
    app.create_member("bob", "pw").await;
    app.create_member("carol", "pw").await;
    let bob = app.login("bob", "pw").await;
    let carol = app.login("carol", "pw").await;

    let response = app.get("/shared/not-a-key", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(body_text(response).await.contains("分享链接无效"));

    app.upload(
        &bob,
        &[("title", "Shared Secret"), ("password", "letmein")],
        "shared.txt",
        "shared contents",
    )
    .await;
    let work_id = app.work_id("Shared Secret").await;

    let response = app.get(&format!("/share/{work_id}"), Some(&carol)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let page = body_text(app.get(&format!("/share/{work_id}"), Some(&bob)).await).await;
    let key: String = sqlx::query_scalar("SELECT share_key FROM share_links WHERE work_id = ?")
        .bind(work_id)
        .fetch_one(app.state.pool_ref())
        .await
        .unwrap();
    assert!(page.contains(&format!("http://share.test/shared/{key}")));

    let page = body_text(app.get(&format!("/shared/{key}"), None).await).await;
    assert!(page.contains("请输入作品访问密码"));
    assert!(page.contains(&format!("action=\"/shared/{key}\"")));

    let response = app
        .post_form(&format!("/shared/{key}"), None, "password=nope")
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let page = body_text(
        app.post_form(&format!("/shared/{key}"), None, "password=letmein")
            .await,
    )
    .await;
    assert!(page.contains("下载作品"));
    assert!(page.contains(&format!("/shared/{key}/file")));

    let response = app
        .post_form(&format!("/shared/{key}/file"), None, "password=letmein")
        .await;
    assert_eq!(body_text(response).await, "shared contents");
}

#[tokio::test]
async fn admin_user_management_keeps_works_of_deleted_users() {
    let app = TestApp::spawn().await;
    let admin = app.admin_token().await;

    let response = app
        .post_form(
            "/user_management",
            Some(&admin),
            "action=create&username=bob&password=pw",
        )
        .await;
    assert_eq!(location(&response), "/user_management?status=user_created");

    let response = app
        .post_form(
            "/user_management",
            Some(&admin),
            "action=create&username=bob&password=pw",
        )
        .await;
    assert_eq!(location(&response), "/user_management?error=duplicate");

    let bob = app.login("bob", "pw").await;
    let response = app.get("/user_management", Some(&bob)).await;
    assert_eq!(location(&response), "/?error=not_authorized");

    app.upload(&bob, &[("title", "Orphaned")], "orphan.txt", "still here")
        .await;
    let bob_id = app.user_id("bob").await.unwrap();

    let response = app
        .post_form(
            "/user_management",
            Some(&admin),
            &format!("action=delete&user_id={bob_id}"),
        )
        .await;
    assert_eq!(location(&response), "/user_management?status=user_deleted");
    assert_eq!(app.user_id("bob").await, None);
    assert_eq!(app.count("SELECT COUNT(*) FROM works").await, 1);

    let listing = body_text(app.get("/works", Some(&admin)).await).await;
    assert!(listing.contains("Orphaned"));
    assert!(listing.contains("已删除用户"));

    let response = app.get("/", Some(&bob)).await;
    assert_eq!(location(&response), "/login");

    let admin_id = app.user_id(ADMIN_USERNAME).await.unwrap();
    let response = app
        .post_form(
            "/user_management",
            Some(&admin),
            &format!("action=delete&user_id={admin_id}"),
        )
        .await;
    assert_eq!(location(&response), "/user_management?error=self_delete");

    let response = app
        .post_form("/user_management", Some(&admin), "action=promote")
        .await;
    assert_eq!(location(&response), "/user_management?error=unknown_action");
}

#[tokio::test]
async fn admin_can_reset_a_password() {
    let app = TestApp::spawn().await;
    let admin = app.admin_token().await;
    let bob_id = app.create_member("bob", "old").await;

    let response = app
        .post_form(
            "/user_management",
            Some(&admin),
            &format!("action=reset_password&user_id={bob_id}&password=fresh"),
        )
        .await;
    assert_eq!(location(&response), "/user_management?status=password_reset");

    app.login("bob", "fresh").await;
}

#[tokio::test]
async fn archives_nest_file_works_and_refuse_non_empty_deletes() {
    let app = TestApp::spawn().await;
    let admin = app.admin_token().await;
    app.create_member("bob", "pw").await;
    let bob = app.login("bob", "pw").await;

    let response = app
        .post_form("/archives", Some(&bob), "archive_name=&parent_id=")
        .await;
    assert_eq!(location(&response), "/archives?error=archive_missing_name");

    let response = app
        .post_form("/archives", Some(&bob), "archive_name=Ghost&parent_id=999")
        .await;
    assert_eq!(location(&response), "/archives?error=archive_parent_missing");

    let response = app
        .post_form("/archives", Some(&bob), "archive_name=Ghost&parent_id=abc")
        .await;
    assert_eq!(location(&response), "/archives?error=archive_parent_missing");

    let response = app
        .post_form("/archives", Some(&bob), "archive_name=Design&parent_id=")
        .await;
    assert_eq!(location(&response), "/archives?status=archive_created");
    let design = app.archive_id("Design").await;

    app.post_form(
        "/archives",
        Some(&bob),
        &format!("archive_name=Posters&parent_id={design}"),
    )
    .await;
    let posters = app.archive_id("Posters").await;

    let posters_id = posters.to_string();
    app.upload(
        &bob,
        &[("title", "Filed At Upload"), ("archive_id", posters_id.as_str())],
        "a.txt",
        "a",
    )
    .await;
    app.upload(&bob, &[("title", "Filed Later")], "b.txt", "b")
        .await;
    let later = app.work_id("Filed Later").await;

    let response = app
        .post_form(
            &format!("/archives/{posters}/works"),
            Some(&bob),
            &format!("work_id={later}"),
        )
        .await;
    assert_eq!(
        location(&response),
        format!("/archives/{posters}?status=work_filed")
    );

    let response = app.get("/archives/tree", Some(&bob)).await;
    let tree: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(tree[0]["name"], "Design");
    assert_eq!(tree[0]["work_count"], 0);
    assert_eq!(tree[0]["children"][0]["name"], "Posters");
    assert_eq!(tree[0]["children"][0]["work_count"], 2);

    let detail = body_text(app.get(&format!("/archives/{posters}"), Some(&bob)).await).await;
    assert!(detail.contains("Filed At Upload"));
    assert!(detail.contains("Design"));

    let response = app
        .post_form(&format!("/archives/{posters}/delete"), Some(&bob), "")
        .await;
    assert_eq!(location(&response), "/?error=not_authorized");

    let response = app
        .post_form(&format!("/archives/{design}/delete"), Some(&admin), "")
        .await;
    assert_eq!(
        location(&response),
        format!("/archives/{design}?error=archive_has_children")
    );

    let response = app
        .post_form(&format!("/archives/{posters}/delete"), Some(&admin), "")
        .await;
    assert_eq!(
        location(&response),
        format!("/archives/{posters}?error=archive_has_works")
    );

    for title in ["Filed At Upload", "Filed Later"] {
        let work_id = app.work_id(title).await;
        let response = app
            .post_form(
                &format!("/archives/{posters}/works/remove"),
                Some(&bob),
                &format!("work_id={work_id}"),
            )
            .await;
        assert_eq!(
            location(&response),
            format!("/archives/{posters}?status=work_unfiled")
        );
    }

    let response = app
        .post_form(&format!("/archives/{posters}/delete"), Some(&admin), "")
        .await;
    assert_eq!(location(&response), "/archives?status=archive_deleted");
    assert_eq!(app.count("SELECT COUNT(*) FROM archives").await, 1);
}

#[tokio::test]
async fn settings_update_nickname_password_and_delete_account() {
    let app = TestApp::spawn().await;
    app.create_member("bob", "pw").await;
    let bob = app.login("bob", "pw").await;

    let response = app
        .post_form(
            "/user_settings",
            Some(&bob),
            "action=change_password&old_password=wrong&new_password=next",
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("旧密码错误"));

    let response = app
        .post_form("/user_settings", Some(&bob), "action=set_nickname&nickname=Bobby")
        .await;
    assert_eq!(location(&response), "/user_settings?status=nickname_saved");
    let nickname: Option<String> =
        sqlx::query_scalar("SELECT nickname FROM users WHERE username = 'bob'")
            .fetch_one(app.state.pool_ref())
            .await
            .unwrap();
    assert_eq!(nickname.as_deref(), Some("Bobby"));

    app.upload(&bob, &[("title", "By Bobby")], "c.txt", "c").await;
    let listing = body_text(app.get("/works", Some(&bob)).await).await;
    assert!(listing.contains("Bobby"));

    let response = app
        .post_form(
            "/user_settings",
            Some(&bob),
            "action=change_password&old_password=pw&new_password=next",
        )
        .await;
    assert_eq!(location(&response), "/user_settings?status=password_changed");
    let bob = app.login("bob", "next").await;

    let response = app
        .post_form("/user_settings", Some(&bob), "action=delete_account")
        .await;
    assert_eq!(location(&response), "/login?status=account_deleted");
    assert_eq!(app.user_id("bob").await, None);
    assert_eq!(app.count("SELECT COUNT(*) FROM works").await, 1);

    let response = app.get("/", Some(&bob)).await;
    assert_eq!(location(&response), "/login");
}

#[tokio::test]
async fn owner_deletes_work_and_stored_file() {
    let app = TestApp::spawn().await;
    app.create_member("bob", "pw").await;
    app.create_member("carol", "pw").await;
    let bob = app.login("bob", "pw").await;
    let carol = app.login("carol", "pw").await;

    app.upload(&bob, &[("title", "Temporary")], "t.txt", "t").await;
    let work_id = app.work_id("Temporary").await;

    let response = app
        .post_form(&format!("/work/{work_id}/delete"), Some(&carol), "")
        .await;
    assert_eq!(location(&response), "/works?error=forbidden");

    let response = app
        .post_form(&format!("/work/{work_id}/delete"), Some(&bob), "")
        .await;
    assert_eq!(location(&response), "/works?status=work_deleted");
    assert_eq!(app.count("SELECT COUNT(*) FROM works").await, 0);

    let leftovers = std::fs::read_dir(app.dir.path().join("uploads"))
        .unwrap()
        .count();
    assert_eq!(leftovers, 0);

    let response = app.get(&format!("/work/{work_id}"), Some(&bob)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn logout_ends_the_session() {
    let app = TestApp::spawn().await;
    let admin = app.admin_token().await;

    let response = app.get("/logout", Some(&admin)).await;
    assert_eq!(location(&response), "/login?status=logged_out");

    let response = app.get("/", Some(&admin)).await;
    assert_eq!(location(&response), "/login");
}

#[tokio::test]
async fn expired_sessions_are_purged() {
    let app = TestApp::spawn().await;
    let admin = app.admin_token().await;
    let admin_id = app.user_id(ADMIN_USERNAME).await.unwrap();

    sqlx::query("INSERT INTO sessions (id, user_id, expires_at) VALUES ('stale', ?, 0)")
        .bind(admin_id)
        .execute(app.state.pool_ref())
        .await
        .unwrap();

    let removed = maintenance::purge_expired_sessions(app.state.pool_ref())
        .await
        .unwrap();
    assert_eq!(removed, 1);

    let response = app.get("/", Some(&admin)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_created_passwords_keep_surrounding_spaces() {
    let app = TestApp::spawn().await;
    let admin = app.admin_token().await;

    let response = app
        .post_form(
            "/user_management",
            Some(&admin),
            "action=create&username=dave&password=+pw+",
        )
        .await;
    assert_eq!(location(&response), "/user_management?status=user_created");

    app.login("dave", "+pw+").await;
    let response = app
        .post_form("/login", None, "username=dave&password=pw")
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let dave_id = app.user_id("dave").await.unwrap();
    let response = app
        .post_form(
            "/user_management",
            Some(&admin),
            &format!("action=reset_password&user_id={dave_id}&password=+next+"),
        )
        .await;
    assert_eq!(location(&response), "/user_management?status=password_reset");
    app.login("dave", "+next+").await;

    let response = app
        .post_form(
            "/user_management",
            Some(&admin),
            &format!("action=reset_password&user_id={dave_id}&password=+++"),
        )
        .await;
    assert_eq!(location(&response), "/user_management?error=missing_password");
}

#[tokio::test]
async fn anonymous_work_page_requires_login() {
    let app = TestApp::spawn().await;
    app.create_member("bob", "pw").await;
    let bob = app.login("bob", "pw").await;

    app.upload(
        &bob,
        &[("title", "Members Only"), ("password", "pw2")],
        "m.txt",
        "m",
    )
    .await;
    let work_id = app.work_id("Members Only").await;

    for uri in [format!("/work/{work_id}"), format!("/work/{work_id}/file")] {
        let response = app.get(&uri, None).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/login");
    }
}

#[tokio::test]
async fn owner_edits_title_and_password_of_a_work() {
    let app = TestApp::spawn().await;
    app.create_member("bob", "pw").await;
    app.create_member("carol", "pw").await;
    let bob = app.login("bob", "pw").await;
    let carol = app.login("carol", "pw").await;

    app.upload(&bob, &[("title", "Draft")], "d.txt", "d").await;
    let work_id = app.work_id("Draft").await;
    let edit = format!("/work/{work_id}/edit");

    let page = body_text(app.get(&format!("/work/{work_id}"), Some(&bob)).await).await;
    assert!(page.contains(&format!(r#"action="/work/{work_id}/edit""#)));

    let response = app
        .post_form(&edit, Some(&carol), "title=Hijacked&password_action=clear")
        .await;
    assert_eq!(location(&response), "/works?error=forbidden");

    let response = app.post_form(&edit, Some(&bob), "title=+++").await;
    assert_eq!(location(&response), "/works?error=work_title_missing");

    let response = app
        .post_form(&edit, Some(&bob), "title=Final&password_action=set&password=")
        .await;
    assert_eq!(location(&response), "/works?error=work_password_missing");

    let response = app
        .post_form(&edit, Some(&bob), "title=Final&password_action=set&password=lock")
        .await;
    assert_eq!(location(&response), "/works?status=work_updated");
    assert_eq!(app.work_id("Final").await, work_id);

    let page = body_text(app.get(&format!("/work/{work_id}"), Some(&carol)).await).await;
    assert!(page.contains("请输入作品访问密码"));
    let response = app
        .post_form(&format!("/work/{work_id}"), Some(&carol), "password=lock")
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post_form(&edit, Some(&bob), "title=Final+Cut&password_action=keep")
        .await;
    assert_eq!(location(&response), "/works?status=work_updated");
    let page = body_text(app.get(&format!("/work/{work_id}"), Some(&carol)).await).await;
    assert!(page.contains("请输入作品访问密码"));

    let admin = app.admin_token().await;
    let response = app
        .post_form(&edit, Some(&admin), "title=Final+Cut&password_action=clear")
        .await;
    assert_eq!(location(&response), "/works?status=work_updated");
    let page = body_text(app.get(&format!("/work/{work_id}"), Some(&carol)).await).await;
    assert!(page.contains("Final Cut"));
    assert!(page.contains("下载作品"));

    let response = app
        .post_form("/work/9999/edit", Some(&bob), "title=Nothing")
        .await;
    assert_eq!(location(&response), "/works?error=work_missing");
}

#[tokio::test]
async fn archives_are_renamed_by_their_creator_or_an_admin() {
    let app = TestApp::spawn().await;
    app.create_member("bob", "pw").await;
    app.create_member("carol", "pw").await;
    let bob = app.login("bob", "pw").await;
    let carol = app.login("carol", "pw").await;
    let admin = app.admin_token().await;

    app.post_form("/archives", Some(&bob), "archive_name=Sketches&parent_id=")
        .await;
    let sketches = app.archive_id("Sketches").await;
    let rename = format!("/archives/{sketches}/rename");

    let page = body_text(app.get(&format!("/archives/{sketches}"), Some(&bob)).await).await;
    assert!(page.contains(&format!(r#"action="{rename}""#)));
    let page = body_text(app.get(&format!("/archives/{sketches}"), Some(&carol)).await).await;
    assert!(!page.contains(&format!(r#"action="{rename}""#)));

    let response = app
        .post_form(&rename, Some(&carol), "archive_name=Mine")
        .await;
    assert_eq!(
        location(&response),
        format!("/archives/{sketches}?error=archive_forbidden")
    );

    let response = app.post_form(&rename, Some(&bob), "archive_name=+").await;
    assert_eq!(
        location(&response),
        format!("/archives/{sketches}?error=archive_missing_name")
    );

    let response = app
        .post_form(&rename, Some(&bob), "archive_name=Drawings")
        .await;
    assert_eq!(
        location(&response),
        format!("/archives/{sketches}?status=archive_renamed")
    );
    assert_eq!(app.archive_id("Drawings").await, sketches);

    let response = app
        .post_form(&rename, Some(&admin), "archive_name=Studies")
        .await;
    assert_eq!(
        location(&response),
        format!("/archives/{sketches}?status=archive_renamed")
    );
    assert_eq!(app.archive_id("Studies").await, sketches);

    let response = app
        .post_form("/archives/9999/rename", Some(&admin), "archive_name=Gone")
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn the_only_admin_cannot_delete_their_own_account() {
    let app = TestApp::spawn().await;
    let admin = app.admin_token().await;

    let response = app
        .post_form("/user_settings", Some(&admin), "action=delete_account")
        .await;
    assert_eq!(location(&response), "/user_settings?error=last_admin");
    assert!(app.user_id(ADMIN_USERNAME).await.is_some());

    let page = body_text(app.get("/user_settings?error=last_admin", Some(&admin)).await).await;
    assert!(page.contains("唯一的管理员"));

    let hash = auth::hash_password("pw").unwrap();
    auth::insert_user(app.state.pool_ref(), "second", &hash, true, None)
        .await
        .unwrap();

    let response = app
        .post_form("/user_settings", Some(&admin), "action=delete_account")
        .await;
    assert_eq!(location(&response), "/login?status=account_deleted");
    assert_eq!(app.user_id(ADMIN_USERNAME).await, None);
}

#[tokio::test]
async fn upload_without_a_selected_file_is_rejected() {
    let app = TestApp::spawn().await;
    app.create_member("bob", "pw").await;
    let bob = app.login("bob", "pw").await;

    let response = app.upload(&bob, &[("title", "Nothing")], "", "").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("请选择要上传的文件"));
    assert_eq!(app.count("SELECT COUNT(*) FROM works").await, 0);
}

#[tokio::test]
async fn user_management_lists_nicknames_with_username_fallback() {
    let app = TestApp::spawn().await;
    let admin = app.admin_token().await;
    app.create_member("bob", "pw").await;
    app.create_member("carol", "pw").await;
    sqlx::query("UPDATE users SET nickname = 'Bobby' WHERE username = 'bob'")
        .execute(app.state.pool_ref())
        .await
        .unwrap();

    let page = body_text(app.get("/user_management", Some(&admin)).await).await;
    assert!(page.contains("<td>bob</td><td>Bobby</td>"));
    assert!(page.contains("<td>carol</td><td>carol</td>"));
}
