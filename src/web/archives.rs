use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use axum::{
    Json,
    extract::{Form, Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info};

use crate::web::{
    AppState, AuthUser,
    admin::require_admin_user,
    auth,
    data::{
        archive_exists, fetch_archive, fetch_archives, fetch_work, fetch_works,
        fetch_works_in_archive, fetch_works_owned_by,
    },
    escape_html,
    flash::FlashQuery,
    models::{ArchiveNode, ArchiveRow, WorkRow},
    responses::{self, json_error, server_error},
    templates::{PageLayout, render_page},
    works::{can_manage, nav_for},
};

#[derive(Deserialize)]
pub struct CreateArchiveForm {
    #[serde(default)]
    pub archive_name: String,
    pub parent_id: Option<String>,
}

#[derive(Deserialize)]
pub struct RenameArchiveForm {
    #[serde(default)]
    pub archive_name: String,
}

#[derive(Deserialize)]
pub struct ArchiveWorkForm {
    pub work_id: Option<String>,
}

/// Nests archive rows under their parents. Rows whose parent is missing are
/// promoted to roots; rows caught in a parent cycle are listed once as roots.
pub fn build_archive_tree(rows: &[ArchiveRow]) -> Vec<ArchiveNode> {
    let known: HashSet<i64> = rows.iter().map(|row| row.id).collect();
    let mut children: HashMap<i64, Vec<&ArchiveRow>> = HashMap::new();
    let mut roots = Vec::new();

    for row in rows {
        match row.parent_id {
            Some(parent) if parent != row.id && known.contains(&parent) => {
                children.entry(parent).or_default().push(row);
            }
            _ => roots.push(row),
        }
    }

    let mut visited = HashSet::new();
    let mut tree: Vec<ArchiveNode> = roots
        .into_iter()
        .filter_map(|row| build_node(row, &children, &mut visited))
        .collect();

    for row in rows {
        if let Some(node) = build_node(row, &children, &mut visited) {
            tree.push(node);
        }
    }

    tree
}

/// A node under construction plus the child rows not yet descended into.
struct BuildFrame<'a> {
    node: ArchiveNode,
    pending: std::slice::Iter<'a, &'a ArchiveRow>,
}

impl<'a> BuildFrame<'a> {
    fn new(row: &'a ArchiveRow, children: &'a HashMap<i64, Vec<&'a ArchiveRow>>) -> Self {
        let kids = children.get(&row.id).map(Vec::as_slice).unwrap_or(&[]);
        Self {
            node: ArchiveNode {
                id: row.id,
                name: row.name.clone(),
                work_count: row.work_count,
                children: Vec::new(),
            },
            pending: kids.iter(),
        }
    }
}

/// Builds the subtree under `row` with an explicit stack, so nesting depth
/// is bounded by the heap rather than the call stack.
fn build_node<'a>(
    row: &'a ArchiveRow,
    children: &'a HashMap<i64, Vec<&'a ArchiveRow>>,
    visited: &mut HashSet<i64>,
) -> Option<ArchiveNode> {
    if !visited.insert(row.id) {
        return None;
    }

    let mut stack = vec![BuildFrame::new(row, children)];
    while let Some(frame) = stack.last_mut() {
        if let Some(kid) = frame.pending.next().copied() {
            if visited.insert(kid.id) {
                stack.push(BuildFrame::new(kid, children));
            }
            continue;
        }

        let finished = stack.pop()?.node;
        match stack.last_mut() {
            Some(parent) => parent.node.children.push(finished),
            None => return Some(finished),
        }
    }

    None
}

/// Archives from the root down to `id`, inclusive. Empty when `id` is unknown.
pub fn archive_path(rows: &[ArchiveRow], id: i64) -> Vec<&ArchiveRow> {
    let by_id: HashMap<i64, &ArchiveRow> = rows.iter().map(|row| (row.id, row)).collect();
    let mut path = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = by_id.get(&id).copied();

    while let Some(row) = cursor {
        if !seen.insert(row.id) {
            break;
        }
        path.push(row);
        cursor = row.parent_id.and_then(|parent| by_id.get(&parent).copied());
    }

    path.reverse();
    path
}

/// `(id, "root / child / leaf")` pairs sorted by label, for select inputs.
pub fn archive_path_labels(rows: &[ArchiveRow]) -> Vec<(i64, String)> {
    let mut labels: Vec<(i64, String)> = rows
        .iter()
        .map(|row| {
            let label = archive_path(rows, row.id)
                .iter()
                .map(|segment| segment.name.as_str())
                .collect::<Vec<_>>()
                .join(" / ");
            (row.id, label)
        })
        .collect();
    labels.sort_by(|a, b| a.1.cmp(&b.1));
    labels
}

pub async fn archives_page(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<FlashQuery>,
) -> Result<Html<String>, Response> {
    let user = auth::require_user_redirect(&state, &jar)
        .await
        .map_err(IntoResponse::into_response)?;

    let archives = fetch_archives(state.pool_ref()).await.map_err(|err| {
        error!(?err, "failed to load archives");
        server_error()
    })?;

    Ok(Html(render_archives_page(&user, &archives, &params)))
}

pub async fn create_archive(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<CreateArchiveForm>,
) -> Redirect {
    let user = match auth::require_user_redirect(&state, &jar).await {
        Ok(user) => user,
        Err(redirect) => return redirect,
    };

    let name = form.archive_name.trim();
    if name.is_empty() {
        return Redirect::to("/archives?error=archive_missing_name");
    }

    let parent_id = match form.parent_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => {
            let Ok(parent_id) = raw.parse::<i64>() else {
                return Redirect::to("/archives?error=archive_parent_missing");
            };
            match archive_exists(state.pool_ref(), parent_id).await {
                Ok(true) => Some(parent_id),
                Ok(false) => return Redirect::to("/archives?error=archive_parent_missing"),
                Err(err) => {
                    error!(?err, parent_id, "failed to check parent archive");
                    return Redirect::to("/archives?error=unknown");
                }
            }
        }
    };

    let inserted = sqlx::query(
        "INSERT INTO archives (name, parent_id, owner_id, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(name)
    .bind(parent_id)
    .bind(user.id)
    .bind(Utc::now())
    .execute(state.pool_ref())
    .await;

    match inserted {
        Ok(result) => {
            info!(
                archive_id = result.last_insert_rowid(),
                user_id = user.id,
                "created archive"
            );
            Redirect::to("/archives?status=archive_created")
        }
        Err(err) => {
            error!(?err, "failed to create archive");
            Redirect::to("/archives?error=unknown")
        }
    }
}

/// Owner or admin. Archives created before ownership was recorded have no
/// owner and can only be renamed by admins.
pub fn can_rename(archive: &ArchiveRow, user: &AuthUser) -> bool {
    user.is_admin || archive.owner_id == Some(user.id)
}

pub async fn rename_archive(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(archive_id): Path<i64>,
    Form(form): Form<RenameArchiveForm>,
) -> Response {
    let user = match auth::require_user_redirect(&state, &jar).await {
        Ok(user) => user,
        Err(redirect) => return redirect.into_response(),
    };

    let pool = state.pool_ref();
    let archive = match fetch_archive(pool, archive_id).await {
        Ok(Some(archive)) => archive,
        Ok(None) => return responses::not_found("归档不存在。"),
        Err(err) => {
            error!(?err, archive_id, "failed to load archive");
            return server_error();
        }
    };

    if !can_rename(&archive, &user) {
        return Redirect::to(&format!("/archives/{archive_id}?error=archive_forbidden"))
            .into_response();
    }

    let name = form.archive_name.trim();
    if name.is_empty() {
        return Redirect::to(&format!("/archives/{archive_id}?error=archive_missing_name"))
            .into_response();
    }

    if let Err(err) = sqlx::query("UPDATE archives SET name = ? WHERE id = ?")
        .bind(name)
        .bind(archive_id)
        .execute(pool)
        .await
    {
        error!(?err, archive_id, "failed to rename archive");
        return server_error();
    }

    info!(archive_id, user_id = user.id, "renamed archive");
    Redirect::to(&format!("/archives/{archive_id}?status=archive_renamed")).into_response()
}

pub async fn archive_tree_json(State(state): State<AppState>, jar: CookieJar) -> Response {
    if auth::current_user(&state, &jar).await.is_none() {
        return json_error(StatusCode::UNAUTHORIZED, "请先登录。").into_response();
    }

    match fetch_archives(state.pool_ref()).await {
        Ok(rows) => Json(build_archive_tree(&rows)).into_response(),
        Err(err) => {
            error!(?err, "failed to load archive tree");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "无法加载归档。").into_response()
        }
    }
}

pub async fn archive_detail(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(archive_id): Path<i64>,
    Query(params): Query<FlashQuery>,
) -> Response {
    let user = match auth::require_user_redirect(&state, &jar).await {
        Ok(user) => user,
        Err(redirect) => return redirect.into_response(),
    };

    let pool = state.pool_ref();
    let archives = match fetch_archives(pool).await {
        Ok(archives) => archives,
        Err(err) => {
            error!(?err, "failed to load archives");
            return server_error();
        }
    };

    let Some(archive) = archives.iter().find(|row| row.id == archive_id) else {
        return responses::not_found("归档不存在。");
    };

    let filed = match fetch_works_in_archive(pool, archive_id).await {
        Ok(works) => works,
        Err(err) => {
            error!(?err, archive_id, "failed to load archive works");
            return server_error();
        }
    };

    let candidates = if user.is_admin {
        fetch_works(pool).await
    } else {
        fetch_works_owned_by(pool, user.id).await
    };
    let candidates = match candidates {
        Ok(works) => works,
        Err(err) => {
            error!(?err, user_id = user.id, "failed to load fileable works");
            return server_error();
        }
    };

    let view = ArchiveDetailView {
        user: &user,
        archive,
        archives: &archives,
        filed: &filed,
        candidates: &candidates,
    };

    Html(render_archive_detail(&view, &params)).into_response()
}

pub async fn file_work(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(archive_id): Path<i64>,
    Form(form): Form<ArchiveWorkForm>,
) -> Response {
    let (user, work) = match load_archive_work(&state, &jar, archive_id, &form).await {
        Ok(found) => found,
        Err(response) => return response,
    };

    if let Err(err) =
        sqlx::query("INSERT OR IGNORE INTO work_archives (work_id, archive_id) VALUES (?, ?)")
            .bind(work.id)
            .bind(archive_id)
            .execute(state.pool_ref())
            .await
    {
        error!(?err, archive_id, work_id = work.id, "failed to file work");
        return server_error();
    }

    info!(archive_id, work_id = work.id, user_id = user.id, "filed work into archive");
    Redirect::to(&format!("/archives/{archive_id}?status=work_filed")).into_response()
}

pub async fn unfile_work(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(archive_id): Path<i64>,
    Form(form): Form<ArchiveWorkForm>,
) -> Response {
    let (user, work) = match load_archive_work(&state, &jar, archive_id, &form).await {
        Ok(found) => found,
        Err(response) => return response,
    };

    if let Err(err) = sqlx::query("DELETE FROM work_archives WHERE work_id = ? AND archive_id = ?")
        .bind(work.id)
        .bind(archive_id)
        .execute(state.pool_ref())
        .await
    {
        error!(?err, archive_id, work_id = work.id, "failed to remove work from archive");
        return server_error();
    }

    info!(archive_id, work_id = work.id, user_id = user.id, "removed work from archive");
    Redirect::to(&format!("/archives/{archive_id}?status=work_unfiled")).into_response()
}

pub async fn delete_archive(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(archive_id): Path<i64>,
) -> Response {
    let admin = match require_admin_user(&state, &jar).await {
        Ok(user) => user,
        Err(redirect) => return redirect.into_response(),
    };

    let pool = state.pool_ref();
    let archive = match fetch_archive(pool, archive_id).await {
        Ok(Some(archive)) => archive,
        Ok(None) => return responses::not_found("归档不存在。"),
        Err(err) => {
            error!(?err, archive_id, "failed to load archive");
            return server_error();
        }
    };

    let child_count: Result<i64, sqlx::Error> =
        sqlx::query_scalar("SELECT COUNT(*) FROM archives WHERE parent_id = ?")
            .bind(archive_id)
            .fetch_one(pool)
            .await;

    match child_count {
        Ok(0) => {}
        Ok(_) => {
            return Redirect::to(&format!("/archives/{archive_id}?error=archive_has_children"))
                .into_response();
        }
        Err(err) => {
            error!(?err, archive_id, "failed to count child archives");
            return server_error();
        }
    }

    if archive.work_count > 0 {
        return Redirect::to(&format!("/archives/{archive_id}?error=archive_has_works"))
            .into_response();
    }

    if let Err(err) = sqlx::query("DELETE FROM archives WHERE id = ?")
        .bind(archive_id)
        .execute(pool)
        .await
    {
        error!(?err, archive_id, "failed to delete archive");
        return server_error();
    }

    info!(archive_id, admin_id = admin.id, "deleted archive");
    Redirect::to("/archives?status=archive_deleted").into_response()
}

/// Resolves the user, archive and work for the file/unfile forms and checks
/// that the user may manage the work.
async fn load_archive_work(
    state: &AppState,
    jar: &CookieJar,
    archive_id: i64,
    form: &ArchiveWorkForm,
) -> Result<(AuthUser, WorkRow), Response> {
    let user = auth::require_user_redirect(state, jar)
        .await
        .map_err(IntoResponse::into_response)?;

    match archive_exists(state.pool_ref(), archive_id).await {
        Ok(true) => {}
        Ok(false) => return Err(responses::not_found("归档不存在。")),
        Err(err) => {
            error!(?err, archive_id, "failed to check archive");
            return Err(server_error());
        }
    }

    let back_with = |code: &str| {
        Redirect::to(&format!("/archives/{archive_id}?error={code}")).into_response()
    };

    let Some(work_id) = form
        .work_id
        .as_deref()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
    else {
        return Err(back_with("work_missing"));
    };

    let work = match fetch_work(state.pool_ref(), work_id).await {
        Ok(Some(work)) => work,
        Ok(None) => return Err(back_with("work_missing")),
        Err(err) => {
            error!(?err, work_id, "failed to load work");
            return Err(server_error());
        }
    };

    if !can_manage(&work, &user) {
        return Err(back_with("forbidden"));
    }

    Ok((user, work))
}

enum TreeStep<'a> {
    Open(&'a ArchiveNode),
    Close,
}

/// Nested `<ul>` markup for the tree, walked with an explicit stack.
fn render_tree_html(nodes: &[ArchiveNode]) -> String {
    if nodes.is_empty() {
        return String::new();
    }

    let mut html = String::from(r#"<ul class="archive-tree">"#);
    let mut steps: Vec<TreeStep<'_>> = nodes.iter().rev().map(TreeStep::Open).collect();

    while let Some(step) = steps.pop() {
        match step {
            TreeStep::Open(node) => {
                html.push_str(&format!(
                    r#"<li><a href="/archives/{id}">{name}</a> <span class="note">({count})</span>"#,
                    id = node.id,
                    name = escape_html(&node.name),
                    count = node.work_count,
                ));
                if node.children.is_empty() {
                    html.push_str("</li>");
                } else {
                    html.push_str(r#"<ul class="archive-tree">"#);
                    steps.push(TreeStep::Close);
                    steps.extend(node.children.iter().rev().map(TreeStep::Open));
                }
            }
            TreeStep::Close => html.push_str("</ul></li>"),
        }
    }

    html.push_str("</ul>");
    html
}

fn render_archives_page(user: &AuthUser, archives: &[ArchiveRow], params: &FlashQuery) -> String {
    let tree = build_archive_tree(archives);
    let tree_html = if tree.is_empty() {
        r#"<p class="note">还没有归档。</p>"#.to_string()
    } else {
        render_tree_html(&tree)
    };

    let names: HashMap<i64, &str> = archives
        .iter()
        .map(|row| (row.id, row.name.as_str()))
        .collect();

    let table_rows = archives
        .iter()
        .map(|row| {
            let parent = row
                .parent_id
                .and_then(|id| names.get(&id).copied())
                .map(escape_html)
                .unwrap_or_else(|| "—".to_string());
            format!(
                r#"<tr><td>{id}</td><td><a href="/archives/{id}">{name}</a></td><td>{parent}</td><td>{count}</td></tr>"#,
                id = row.id,
                name = escape_html(&row.name),
                parent = parent,
                count = row.work_count,
            )
        })
        .collect::<String>();

    let parent_options = archive_path_labels(archives)
        .into_iter()
        .map(|(id, label)| format!(r#"<option value="{id}">{}</option>"#, escape_html(&label)))
        .collect::<String>();

    let body_html = format!(
        r#"        <section class="panel">
            <h2>归档结构</h2>
            {tree_html}
        </section>
        <section class="panel">
            <h2>新建归档</h2>
            <form method="post" action="/archives">
                <label for="archive_name">归档名称</label>
                <input id="archive_name" type="text" name="archive_name" required>
                <label for="parent_id">上级归档</label>
                <select id="parent_id" name="parent_id">
                    <option value="">（顶级归档）</option>
                    {parent_options}
                </select>
                <button type="submit">创建</button>
            </form>
        </section>
        <section class="panel">
            <h2>全部归档</h2>
            <table>
                <thead><tr><th>编号</th><th>名称</th><th>上级</th><th>作品数</th></tr></thead>
                <tbody>{table_rows}</tbody>
            </table>
        </section>"#,
        tree_html = tree_html,
        parent_options = parent_options,
        table_rows = table_rows,
    );

    render_page(PageLayout {
        meta_title: "归档管理",
        page_heading: "归档管理",
        nav_user: Some(nav_for(user)),
        flash_html: Cow::Owned(params.render()),
        body_html: Cow::Owned(body_html),
    })
}

struct ArchiveDetailView<'a> {
    user: &'a AuthUser,
    archive: &'a ArchiveRow,
    archives: &'a [ArchiveRow],
    filed: &'a [WorkRow],
    candidates: &'a [WorkRow],
}

fn render_archive_detail(view: &ArchiveDetailView<'_>, params: &FlashQuery) -> String {
    let archive = view.archive;

    let breadcrumb = archive_path(view.archives, archive.id)
        .iter()
        .map(|segment| {
            format!(
                r#"<a href="/archives/{id}">{name}</a>"#,
                id = segment.id,
                name = escape_html(&segment.name),
            )
        })
        .collect::<Vec<_>>()
        .join(" / ");

    let children = view
        .archives
        .iter()
        .filter(|row| row.parent_id == Some(archive.id))
        .map(|row| {
            format!(
                r#"<li><a href="/archives/{id}">{name}</a> <span class="note">({count})</span></li>"#,
                id = row.id,
                name = escape_html(&row.name),
                count = row.work_count,
            )
        })
        .collect::<String>();
    let children_html = if children.is_empty() {
        r#"<p class="note">没有子归档。</p>"#.to_string()
    } else {
        format!("<ul>{children}</ul>")
    };

    let filed_rows = view
        .filed
        .iter()
        .map(|work| {
            let remove = if can_manage(work, view.user) {
                format!(
                    r#"<form method="post" action="/archives/{archive_id}/works/remove" class="inline-form">
                        <input type="hidden" name="work_id" value="{work_id}">
                        <button type="submit" class="secondary">移出</button>
                    </form>"#,
                    archive_id = archive.id,
                    work_id = work.id,
                )
            } else {
                String::new()
            };
            format!(
                r#"<tr><td><a href="/work/{id}">{title}</a></td><td>{owner}</td><td>{remove}</td></tr>"#,
                id = work.id,
                title = escape_html(&work.title),
                owner = escape_html(work.owner_label()),
                remove = remove,
            )
        })
        .collect::<String>();
    let filed_html = if filed_rows.is_empty() {
        r#"<p class="note">该归档中还没有作品。</p>"#.to_string()
    } else {
        format!(
            r#"<table><thead><tr><th>作品</th><th>作者</th><th>操作</th></tr></thead><tbody>{filed_rows}</tbody></table>"#
        )
    };

    let filed_ids: HashSet<i64> = view.filed.iter().map(|work| work.id).collect();
    let options = view
        .candidates
        .iter()
        .filter(|work| !filed_ids.contains(&work.id))
        .map(|work| {
            format!(
                r#"<option value="{id}">{title}</option>"#,
                id = work.id,
                title = escape_html(&work.title),
            )
        })
        .collect::<String>();
    let file_form = if options.is_empty() {
        r#"<p class="note">没有可加入的作品。</p>"#.to_string()
    } else {
        format!(
            r#"<form method="post" action="/archives/{id}/works">
                <label for="work_id">选择作品</label>
                <select id="work_id" name="work_id">{options}</select>
                <button type="submit">加入归档</button>
            </form>"#,
            id = archive.id,
        )
    };

    let rename_html = if can_rename(archive, view.user) {
        format!(
            r#"<section class="panel">
            <h2>重命名归档</h2>
            <form method="post" action="/archives/{id}/rename">
                <label for="rename_archive_name">新名称</label>
                <input id="rename_archive_name" type="text" name="archive_name" value="{name}" required>
                <button type="submit">保存名称</button>
            </form>
        </section>"#,
            id = archive.id,
            name = escape_html(&archive.name),
        )
    } else {
        String::new()
    };

    let delete_html = if view.user.is_admin {
        format!(
            r#"<section class="panel">
            <h2>删除归档</h2>
            <p class="note">只能删除没有子归档且不含作品的归档。</p>
            <form method="post" action="/archives/{id}/delete" onsubmit="return confirm('确认删除该归档？');">
                <button type="submit" class="danger">删除归档</button>
            </form>
        </section>"#,
            id = archive.id,
        )
    } else {
        String::new()
    };

    let body_html = format!(
        r#"        <p class="note"><a href="/archives">全部归档</a> / {breadcrumb}</p>
        <section class="panel">
            <h2>子归档</h2>
            {children_html}
        </section>
        <section class="panel">
            <h2>归档中的作品</h2>
            {filed_html}
        </section>
        <section class="panel">
            <h2>加入作品</h2>
            {file_form}
        </section>
        {rename_html}
        {delete_html}"#,
    );

    render_page(PageLayout {
        meta_title: &archive.name,
        page_heading: &archive.name,
        nav_user: Some(nav_for(view.user)),
        flash_html: Cow::Owned(params.render()),
        body_html: Cow::Owned(body_html),
    })
}
