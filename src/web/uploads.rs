use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use axum::extract::Multipart;
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::warn;
use uuid::Uuid;

/// Result type used by the shared upload helpers.
pub type UploadResult<T> = Result<T, UploadError>;

/// Error returned when validating or persisting uploaded files.
#[derive(Debug)]
pub struct UploadError {
    message: String,
}

impl UploadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for UploadError {}

/// Expectations for a single multipart file field.
#[derive(Debug, Clone, Copy)]
pub struct FileFieldConfig<'a> {
    pub field_name: &'a str,
    /// Lowercase extensions without the dot; empty accepts anything.
    pub allowed_extensions: &'a [&'a str],
    pub max_bytes: usize,
}

impl<'a> FileFieldConfig<'a> {
    pub fn new(field_name: &'a str, allowed_extensions: &'a [&'a str], max_bytes: usize) -> Self {
        Self {
            field_name,
            allowed_extensions,
            max_bytes,
        }
    }
}

/// Metadata describing a stored upload on disk.
#[derive(Debug, Clone)]
pub struct SavedFile {
    pub field_name: String,
    pub original_name: String,
    pub stored_name: String,
    pub stored_path: PathBuf,
    pub content_type: String,
    pub file_size: u64,
}

/// Aggregated output of the upload processor.
#[derive(Debug, Default)]
pub struct UploadOutcome {
    pub files: Vec<SavedFile>,
    pub text_fields: HashMap<String, String>,
}

impl UploadOutcome {
    pub fn first_file_for(&self, field_name: &str) -> Option<&SavedFile> {
        self.files.iter().find(|file| file.field_name == field_name)
    }

    pub fn first_text(&self, field_name: &str) -> Option<&str> {
        self.text_fields.get(field_name).map(|value| value.as_str())
    }

    /// Text value with surrounding whitespace removed; blank values count as absent.
    pub fn trimmed_text(&self, field_name: &str) -> Option<&str> {
        self.first_text(field_name)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Deletes every stored file, used when the surrounding request fails.
    pub async fn discard(&self) {
        remove_saved_files(&self.files).await;
    }
}

/// Ensures the destination directory exists.
pub async fn ensure_directory(path: &Path) -> UploadResult<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|err| UploadError::new(format!("无法创建上传目录: {err}")))
}

/// Parses multipart form data, storing each file under a generated name inside `dest_dir`.
///
/// Client filenames never reach the filesystem; they are kept as display metadata only.
/// On failure every file written so far is removed again.
pub async fn process_upload_form(
    mut multipart: Multipart,
    dest_dir: &Path,
    field_configs: &[FileFieldConfig<'_>],
) -> UploadResult<UploadOutcome> {
    ensure_directory(dest_dir).await?;

    let mut outcome = UploadOutcome::default();
    match collect_fields(&mut multipart, dest_dir, field_configs, &mut outcome).await {
        Ok(()) => Ok(outcome),
        Err(err) => {
            outcome.discard().await;
            Err(err)
        }
    }
}

async fn collect_fields(
    multipart: &mut Multipart,
    dest_dir: &Path,
    field_configs: &[FileFieldConfig<'_>],
    outcome: &mut UploadOutcome,
) -> UploadResult<()> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| UploadError::new(format!("解析上传表单失败: {err}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        let Some(file_name) = field.file_name().map(str::to_string) else {
            let value = field
                .text()
                .await
                .map_err(|err| UploadError::new(format!("读取字段 `{field_name}` 失败: {err}")))?;
            outcome.text_fields.insert(field_name, value);
            continue;
        };

        // Browsers submit an empty file part when nothing was selected.
        if file_name.is_empty() {
            continue;
        }

        let Some(config) = field_configs
            .iter()
            .find(|config| config.field_name == field_name)
        else {
            return Err(UploadError::new(format!(
                "不支持的文件字段: `{field_name}`"
            )));
        };

        if outcome.first_file_for(config.field_name).is_some() {
            return Err(UploadError::new(format!(
                "字段 `{}` 只能上传一个文件",
                config.field_name
            )));
        }

        let extension = file_extension(&file_name);
        if !config.allowed_extensions.is_empty()
            && !config.allowed_extensions.contains(&extension.as_str())
        {
            let shown = if extension.is_empty() {
                "无扩展名".to_string()
            } else {
                extension.clone()
            };
            return Err(UploadError::new(format!("不支持的文件类型: `{shown}`")));
        }

        let mut original_name = sanitize_filename::sanitize(&file_name);
        if original_name.is_empty() {
            original_name = generated_name(&extension);
        }
        let stored_name = generated_name(&extension);
        let stored_path = dest_dir.join(&stored_name);
        let content_type = mime_guess::from_path(&original_name)
            .first_or_octet_stream()
            .to_string();

        let mut file = File::create(&stored_path)
            .await
            .map_err(|err| UploadError::new(format!("保存文件失败: {err}")))?;

        // Registered before writing so a failed transfer still gets cleaned up.
        outcome.files.push(SavedFile {
            field_name: config.field_name.to_string(),
            original_name,
            stored_name,
            stored_path,
            content_type,
            file_size: 0,
        });

        let mut total_bytes: u64 = 0;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|err| UploadError::new(format!("读取上传数据失败: {err}")))?
        {
            total_bytes += chunk.len() as u64;
            if total_bytes > config.max_bytes as u64 {
                return Err(UploadError::new(format!(
                    "文件大小超过限制 (最大 {} MB)",
                    config.max_bytes / (1024 * 1024)
                )));
            }
            file.write_all(&chunk)
                .await
                .map_err(|err| UploadError::new(format!("写入文件失败: {err}")))?;
        }
        file.flush()
            .await
            .map_err(|err| UploadError::new(format!("刷新文件失败: {err}")))?;

        if let Some(saved) = outcome.files.last_mut() {
            saved.file_size = total_bytes;
        }
    }

    // Every configured field expects exactly one file.
    for config in field_configs {
        if outcome.first_file_for(config.field_name).is_none() {
            return Err(UploadError::new("请选择要上传的文件"));
        }
    }

    Ok(())
}

async fn remove_saved_files(files: &[SavedFile]) {
    for saved in files {
        if let Err(err) = tokio::fs::remove_file(&saved.stored_path).await {
            warn!(?err, file = %saved.stored_path.display(), "failed to discard uploaded file");
        }
    }
}

/// UUID-based storage name that keeps the (lowercased) extension of the upload.
fn generated_name(extension: &str) -> String {
    let key = Uuid::new_v4().simple().to_string();
    if extension.is_empty() {
        key
    } else {
        format!("{key}.{extension}")
    }
}

fn file_extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_name_keeps_extension_only() {
        let name = generated_name("pdf");
        assert!(name.ends_with(".pdf"));
        assert_eq!(name.len(), 32 + ".pdf".len());
        assert!(!name.contains('/'));
    }

    #[test]
    fn generated_name_without_extension() {
        let name = generated_name("");
        assert_eq!(name.len(), 32);
        assert!(!name.contains('.'));
    }

    #[test]
    fn file_extension_is_lowercased() {
        assert_eq!(file_extension("Report.Final.DOCX"), "docx");
        assert_eq!(file_extension("../../etc/passwd"), "");
        assert_eq!(file_extension("archive"), "");
    }

    #[test]
    fn trimmed_text_ignores_blank_values() {
        let mut outcome = UploadOutcome::default();
        outcome
            .text_fields
            .insert("password".to_string(), "   ".to_string());
        outcome
            .text_fields
            .insert("title".to_string(), "  Poster ".to_string());
        assert_eq!(outcome.trimmed_text("password"), None);
        assert_eq!(outcome.trimmed_text("title"), Some("Poster"));
        assert_eq!(outcome.first_text("missing"), None);
    }
}
