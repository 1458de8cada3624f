use std::borrow::Cow;

use chrono::{Datelike, Utc};

pub const SITE_TITLE: &str = "作品共享平台";

const PAGE_BASE_STYLES: &str = r#"
        :root { color-scheme: light; }
        body { font-family: "Helvetica Neue", Arial, sans-serif; margin: 0; background: #f8fafc; color: #0f172a; min-height: 100vh; display: flex; flex-direction: column; }
        header { background: #ffffff; padding: 1.5rem; border-bottom: 1px solid #e2e8f0; }
        .header-bar { display: flex; justify-content: space-between; align-items: center; flex-wrap: wrap; gap: 1rem; }
        .header-bar h1 { margin: 0; font-size: 1.6rem; }
        nav { display: flex; flex-wrap: wrap; gap: 0.5rem; align-items: center; }
        nav a { color: #1d4ed8; text-decoration: none; font-weight: 600; background: #e0f2fe; padding: 0.45rem 0.9rem; border-radius: 999px; border: 1px solid #bfdbfe; }
        nav a:hover { background: #bfdbfe; border-color: #93c5fd; }
        nav a.admin-link { color: #0f172a; background: #fee2e2; border-color: #fecaca; }
        nav .current-user { color: #475569; font-size: 0.95rem; margin-right: 0.5rem; }
        main { flex: 1; padding: 2rem 1.5rem; max-width: 960px; width: 100%; margin: 0 auto; box-sizing: border-box; }
        section { margin-bottom: 2rem; }
        .panel { background: #ffffff; border-radius: 12px; border: 1px solid #e2e8f0; padding: 1.5rem; box-shadow: 0 18px 40px rgba(15, 23, 42, 0.08); }
        .panel h2 { margin-top: 0; }
        label { display: block; margin: 1rem 0 0.4rem; font-weight: 600; color: #0f172a; }
        input[type="text"], input[type="password"], input[type="file"], select { width: 100%; padding: 0.7rem; border-radius: 8px; border: 1px solid #cbd5f5; background: #f8fafc; color: #0f172a; box-sizing: border-box; }
        button { margin-top: 1rem; padding: 0.75rem 1.2rem; border: none; border-radius: 8px; background: #2563eb; color: #ffffff; font-weight: 600; cursor: pointer; }
        button:hover { background: #1d4ed8; }
        button.danger { background: #dc2626; }
        button.danger:hover { background: #b91c1c; }
        .inline-form { display: inline; }
        .inline-form button { margin-top: 0; padding: 0.4rem 0.8rem; }
        table { width: 100%; border-collapse: collapse; margin-top: 1rem; background: #ffffff; }
        th, td { padding: 0.65rem 0.85rem; border-bottom: 1px solid #e2e8f0; text-align: left; }
        th { background: #f1f5f9; font-weight: 600; }
        a { color: #2563eb; }
        .note { color: #475569; font-size: 0.95rem; line-height: 1.6; }
        .flash { padding: 1rem 1.25rem; border-radius: 10px; margin-bottom: 1.5rem; font-weight: 600; border: 1px solid transparent; }
        .flash.success { background: #ecfdf3; border-color: #bbf7d0; color: #166534; }
        .flash.error { background: #fef2f2; border-color: #fecaca; color: #b91c1c; }
        .lock { color: #b45309; font-size: 0.85rem; font-weight: 600; }
        .share-url { font-family: monospace; word-break: break-all; background: #f1f5f9; padding: 0.75rem; border-radius: 8px; }
        .archive-tree ul { list-style: none; padding-left: 1.25rem; border-left: 1px dashed #cbd5f5; }
        .archive-tree > ul { border-left: none; padding-left: 0; }
        .app-footer { margin-top: 3rem; text-align: center; font-size: 0.85rem; color: #94a3b8; }
        @media (max-width: 768px) {
            main { padding: 1.5rem 1rem; }
            .header-bar { flex-direction: column; align-items: flex-start; }
            th, td { padding: 0.5rem; }
        }
"#;

/// Signed-in viewer shown in the navigation bar.
pub struct NavUser<'a> {
    pub username: &'a str,
    pub is_admin: bool,
}

pub struct PageLayout<'a> {
    pub meta_title: &'a str,
    pub page_heading: &'a str,
    pub nav_user: Option<NavUser<'a>>,
    pub flash_html: Cow<'a, str>,
    pub body_html: Cow<'a, str>,
}

pub fn render_page(layout: PageLayout<'_>) -> String {
    let PageLayout {
        meta_title,
        page_heading,
        nav_user,
        flash_html,
        body_html,
    } = layout;

    let nav_html = nav_user.map(|user| render_nav(&user)).unwrap_or_default();
    let footer = render_footer();

    format!(
        r#"<!DOCTYPE html>
<html lang="zh-CN">
<head>
    <meta charset="UTF-8">
    <title>{meta_title} | {site}</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <meta name="robots" content="noindex,nofollow">
    <style>
{styles}
    </style>
</head>
<body>
    <header>
        <div class="header-bar">
            <h1>{page_heading}</h1>
            {nav_html}
        </div>
    </header>
    <main>
        {flash_html}
{body_html}
        {footer}
    </main>
</body>
</html>"#,
        meta_title = escape_html(meta_title),
        site = SITE_TITLE,
        styles = PAGE_BASE_STYLES,
        page_heading = escape_html(page_heading),
        nav_html = nav_html,
        flash_html = flash_html,
        body_html = body_html,
        footer = footer,
    )
}

fn render_nav(user: &NavUser<'_>) -> String {
    let admin_link = if user.is_admin {
        r#"<a class="admin-link" href="/user_management">用户管理</a>"#
    } else {
        ""
    };

    format!(
        r#"<nav>
                <span class="current-user">当前登录：<strong>{username}</strong></span>
                <a href="/">首页</a>
                <a href="/works">作品列表</a>
                <a href="/upload">上传作品</a>
                <a href="/archives">归档管理</a>
                <a href="/user_settings">用户设置</a>
                {admin_link}
                <a href="/logout">退出登录</a>
            </nav>"#,
        username = escape_html(user.username),
        admin_link = admin_link,
    )
}

/// Standalone card page used for the login and registration forms.
fn render_card_page(heading: &str, description: &str, message_html: &str, form_html: &str) -> String {
    let footer = render_footer();
    format!(
        r#"<!DOCTYPE html>
<html lang="zh-CN">
<head>
    <meta charset="UTF-8">
    <title>{heading} | {site}</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <meta name="robots" content="noindex,nofollow">
    <style>
        :root {{ color-scheme: light; }}
        body {{ font-family: "Helvetica Neue", Arial, sans-serif; display: flex; flex-direction: column; align-items: center; justify-content: center; min-height: 100vh; margin: 0; background: #f1f5f9; color: #0f172a; padding: 1.5rem; box-sizing: border-box; gap: 1.5rem; }}
        main {{ width: 100%; max-width: 480px; display: flex; flex-direction: column; align-items: center; gap: 1.5rem; }}
        .panel {{ background: #ffffff; padding: 2.5rem 2.25rem; border-radius: 18px; box-shadow: 0 20px 60px rgba(15, 23, 42, 0.08); width: 100%; border: 1px solid #e2e8f0; box-sizing: border-box; }}
        h1 {{ margin: 0 0 1rem; font-size: 1.8rem; text-align: center; }}
        p.description {{ margin: 0 0 1.75rem; color: #475569; text-align: center; font-size: 0.95rem; }}
        label {{ display: block; margin-top: 1.2rem; font-weight: 600; color: #0f172a; }}
        input {{ width: 100%; padding: 0.85rem; margin-top: 0.65rem; border-radius: 10px; border: 1px solid #cbd5f5; background: #f8fafc; color: #0f172a; font-size: 1rem; box-sizing: border-box; }}
        input:focus {{ outline: none; border-color: #2563eb; box-shadow: 0 0 0 3px rgba(37, 99, 235, 0.15); }}
        button {{ margin-top: 2rem; width: 100%; padding: 0.95rem; border: none; border-radius: 10px; background: #2563eb; color: #ffffff; font-weight: 600; font-size: 1.05rem; cursor: pointer; }}
        button:hover {{ background: #1d4ed8; }}
        .flash {{ padding: 0.85rem 1rem; border-radius: 10px; margin-bottom: 1rem; font-weight: 600; }}
        .flash.error {{ background: #fef2f2; color: #b91c1c; border: 1px solid #fecaca; }}
        .flash.success {{ background: #ecfdf3; color: #166534; border: 1px solid #bbf7d0; }}
        .switch {{ margin-top: 1.5rem; text-align: center; font-size: 0.95rem; }}
        .app-footer {{ margin-top: 2.5rem; text-align: center; font-size: 0.85rem; color: #64748b; }}
    </style>
</head>
<body>
    <main>
        <section class="panel">
            <h1>{heading}</h1>
            <p class="description">{description}</p>
            {message_html}
            {form_html}
        </section>
        {footer}
    </main>
</body>
</html>"#,
        heading = heading,
        site = SITE_TITLE,
        description = description,
        message_html = message_html,
        form_html = form_html,
        footer = footer,
    )
}

pub fn render_login_page(error: Option<&str>, notice: Option<&str>) -> String {
    let message_html = match (error, notice) {
        (Some(error), _) => format!(r#"<div class="flash error">{}</div>"#, escape_html(error)),
        (None, Some(notice)) => {
            format!(r#"<div class="flash success">{}</div>"#, escape_html(notice))
        }
        (None, None) => String::new(),
    };

    let form_html = r#"<form method="post" action="/login">
                <label for="username">用户名</label>
                <input id="username" name="username" required>
                <label for="password">密码</label>
                <input id="password" type="password" name="password" required>
                <button type="submit">登录</button>
            </form>
            <p class="switch">还没有账号？<a href="/register">使用邀请码注册</a></p>"#;

    render_card_page(SITE_TITLE, "请输入账号与密码登录。", &message_html, form_html)
}

pub fn render_register_page(error: Option<&str>, username: &str, invite_code: &str) -> String {
    let message_html = error
        .map(|error| format!(r#"<div class="flash error">{}</div>"#, escape_html(error)))
        .unwrap_or_default();

    let form_html = format!(
        r#"<form method="post" action="/register">
                <label for="username">用户名</label>
                <input id="username" name="username" value="{username}" required>
                <label for="password">密码</label>
                <input id="password" type="password" name="password" required>
                <label for="invite_code">邀请码</label>
                <input id="invite_code" name="invite_code" value="{invite_code}" required>
                <button type="submit">注册</button>
            </form>
            <p class="switch">已有账号？<a href="/login">返回登录</a></p>"#,
        username = escape_html(username),
        invite_code = escape_html(invite_code),
    );

    render_card_page("注册账号", "注册需要已有用户提供的邀请码。", &message_html, &form_html)
}

pub fn render_footer() -> String {
    let current_year = Utc::now().year();
    format!(
        r#"<footer class="app-footer">© 2024-{year} {site}</footer>"#,
        year = current_year,
        site = SITE_TITLE,
    )
}

pub fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Human readable byte count, e.g. `1.5 MB`.
pub fn format_file_size(bytes: i64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes.max(0) as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes.max(0), UNITS[0])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
