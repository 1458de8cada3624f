use serde::Deserialize;

/// `?status=` / `?error=` codes carried across post-redirect-get cycles.
#[derive(Default, Deserialize)]
pub struct FlashQuery {
    pub status: Option<String>,
    pub error: Option<String>,
}

impl FlashQuery {
    pub fn render(&self) -> String {
        compose_flash_message(self.status.as_deref(), self.error.as_deref())
    }
}

/// Compose a flash message HTML snippet for known status or error codes.
pub fn compose_flash_message(status: Option<&str>, error: Option<&str>) -> String {
    if let Some(status) = status {
        let message = match status {
            "uploaded" => "作品上传成功。",
            "work_deleted" => "作品已删除。",
            "work_updated" => "作品信息已更新。",
            "archive_created" => "归档已创建。",
            "archive_deleted" => "归档已删除。",
            "archive_renamed" => "归档已重命名。",
            "work_filed" => "作品已加入归档。",
            "work_unfiled" => "作品已移出归档。",
            "user_created" => "已成功创建用户。",
            "user_deleted" => "用户已删除。",
            "password_reset" => "已重置该用户的密码。",
            "nickname_saved" => "昵称已更新。",
            "password_changed" => "密码已修改。",
            _ => "",
        };

        if !message.is_empty() {
            return format!(r#"<div class="flash success">{message}</div>"#);
        }
    }

    if let Some(error) = error {
        let message = match error {
            "not_authorized" => "该操作需要管理员权限。",
            "forbidden" => "无权操作该作品。",
            "work_missing" => "作品不存在。",
            "work_title_missing" => "请填写作品标题。",
            "work_password_missing" => "请输入新的访问密码。",
            "archive_missing_name" => "请填写归档名称。",
            "archive_parent_missing" => "上级归档不存在。",
            "archive_has_children" => "请先删除所有子归档。",
            "archive_has_works" => "请先移除归档中的所有作品。",
            "archive_forbidden" => "只有归档创建者或管理员可以修改该归档。",
            "missing_username" => "请输入用户名。",
            "missing_password" => "请输入密码。",
            "duplicate" => "用户名已存在。",
            "user_missing" => "未找到该用户。",
            "last_admin" => "你是唯一的管理员，不能删除自己的账号。",
            "self_delete" => "不能在此删除当前登录的账号，请前往用户设置。",
            "unknown_action" => "未知操作。",
            _ => "发生未知错误，请查看日志。",
        };

        return format!(r#"<div class="flash error">{message}</div>"#);
    }

    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_status_renders_success() {
        let html = compose_flash_message(Some("uploaded"), None);
        assert!(html.contains("flash success"));
        assert!(html.contains("作品上传成功"));
    }

    #[test]
    fn unknown_status_falls_through_to_error() {
        let html = compose_flash_message(Some("bogus"), Some("duplicate"));
        assert!(html.contains("flash error"));
        assert!(html.contains("用户名已存在"));
    }

    #[test]
    fn unknown_error_uses_generic_message() {
        let html = compose_flash_message(None, Some("<script>"));
        assert!(html.contains("发生未知错误"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn empty_query_renders_nothing() {
        assert!(FlashQuery::default().render().is_empty());
    }
}
