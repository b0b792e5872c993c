//! 路径感知的文件收集
//!
//! 负责:
//! - 把文件选择、文件夹选择、拖放三种输入统一成 (文件, 相对路径) 列表
//! - 递归遍历拖放的目录，保留目录结构
//! - 遍历失败时退化为只取顶层文件

use crate::uploader::admission::format_bytes;
use crate::uploader::source::SourceFile;
use async_recursion::async_recursion;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 收集结果中的单个文件
#[derive(Debug, Clone)]
pub struct CollectedFile {
    pub source: SourceFile,
    /// posix 风格相对路径（'/' 分隔）
    pub relative_path: String,
}

/// 文件夹选择器给出的文件（自带相对路径）
#[derive(Debug, Clone)]
pub struct FolderPickedFile {
    pub source: SourceFile,
    /// 选择器提供的路径，如 "docs/a.txt"
    pub path_hint: String,
}

/// 收集错误
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    /// 非空的拖放内容里没有任何文件
    #[error("未找到文件")]
    NoFilesFound,

    #[error("读取 {path} 失败: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("路径不存在: {0}")]
    NotFound(String),
}

/// 拖放内容中的条目
pub enum DropEntry {
    File(SourceFile),
    Directory(Box<dyn DirectoryEntry>),
}

impl std::fmt::Debug for DropEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropEntry::File(file) => f.debug_tuple("File").field(&file.name).finish(),
            DropEntry::Directory(dir) => f.debug_tuple("Directory").field(&dir.name()).finish(),
        }
    }
}

/// 可遍历的目录条目
#[async_trait]
pub trait DirectoryEntry: Send + Sync {
    /// 目录名（单段，不含分隔符）
    fn name(&self) -> &str;

    /// 读取直接子条目
    async fn read_entries(&self) -> Result<Vec<DropEntry>, CollectError>;
}

/// 本地文件系统目录
#[derive(Debug, Clone)]
pub struct LocalDirectory {
    path: PathBuf,
    name: String,
    skip_hidden: bool,
}

impl LocalDirectory {
    pub fn new<P: AsRef<Path>>(path: P, skip_hidden: bool) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            path,
            name,
            skip_hidden,
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> CollectError {
    CollectError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl DirectoryEntry for LocalDirectory {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_entries(&self) -> Result<Vec<DropEntry>, CollectError> {
        let mut reader = tokio::fs::read_dir(&self.path)
            .await
            .map_err(|e| io_error(&self.path, e))?;

        let mut paths = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| io_error(&self.path, e))?
        {
            paths.push(entry.path());
        }
        // 按名称排序，保证遍历顺序稳定
        paths.sort();

        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with('.'));
            if self.skip_hidden && hidden {
                debug!("跳过隐藏文件: {}", path.display());
                continue;
            }

            // 不跟随符号链接
            let metadata = tokio::fs::symlink_metadata(&path)
                .await
                .map_err(|e| io_error(&path, e))?;

            if metadata.is_dir() {
                entries.push(DropEntry::Directory(Box::new(LocalDirectory::new(
                    &path,
                    self.skip_hidden,
                ))));
            } else if metadata.is_file() {
                let source = SourceFile::from_path(&path)
                    .await
                    .map_err(|e| io_error(&path, e))?;
                entries.push(DropEntry::File(source));
            } else {
                debug!("跳过非常规文件: {}", path.display());
            }
        }

        Ok(entries)
    }
}

/// 拖放收集结果
#[derive(Debug, Default)]
pub struct DroppedFiles {
    pub files: Vec<CollectedFile>,
    /// 目录遍历失败，只保留了顶层文件
    pub degraded: bool,
}

/// 文件收集器
#[derive(Debug, Clone, Default)]
pub struct FileCollector {
    skip_hidden: bool,
}

impl FileCollector {
    pub fn new(skip_hidden: bool) -> Self {
        Self { skip_hidden }
    }

    /// 普通文件选择：相对路径就是文件名
    pub fn from_picker(&self, files: Vec<SourceFile>) -> Vec<CollectedFile> {
        files
            .into_iter()
            .map(|source| CollectedFile {
                relative_path: source.name.clone(),
                source,
            })
            .collect()
    }

    /// 文件夹选择：沿用选择器提供的路径
    pub fn from_folder_picker(&self, files: Vec<FolderPickedFile>) -> Vec<CollectedFile> {
        files
            .into_iter()
            .map(|file| {
                let normalized = normalize_relative_path(&file.path_hint);
                let relative_path = if normalized.is_empty() {
                    file.source.name.clone()
                } else {
                    normalized
                };
                CollectedFile {
                    source: file.source,
                    relative_path,
                }
            })
            .collect()
    }

    /// 拖放：递归展开目录
    ///
    /// 整个遍历完成后才返回。遍历出错时退化为只取顶层文件。
    pub async fn from_drop(&self, entries: Vec<DropEntry>) -> Result<DroppedFiles, CollectError> {
        if entries.is_empty() {
            return Ok(DroppedFiles::default());
        }

        let mut files = Vec::new();
        let degraded = match walk_entries(&entries, "", &mut files).await {
            Ok(()) => false,
            Err(e) => {
                warn!("目录遍历失败，只上传顶层文件: {}", e);
                files = entries
                    .iter()
                    .filter_map(|entry| match entry {
                        DropEntry::File(source) => Some(CollectedFile {
                            relative_path: source.name.clone(),
                            source: source.clone(),
                        }),
                        DropEntry::Directory(_) => None,
                    })
                    .collect();
                true
            }
        };

        if files.is_empty() {
            return Err(CollectError::NoFilesFound);
        }

        info!(
            "收集到 {} 个文件，总大小 {}",
            files.len(),
            format_bytes(files.iter().map(|f| f.source.size).sum())
        );

        Ok(DroppedFiles { files, degraded })
    }

    /// 命令行参数：文件按选择处理，目录按拖放处理
    pub async fn from_local_paths(&self, paths: &[PathBuf]) -> Result<DroppedFiles, CollectError> {
        let mut entries = Vec::with_capacity(paths.len());

        for path in paths {
            let metadata = match tokio::fs::metadata(path).await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(CollectError::NotFound(path.display().to_string()));
                }
                Err(e) => return Err(io_error(path, e)),
            };

            if metadata.is_dir() {
                entries.push(DropEntry::Directory(Box::new(LocalDirectory::new(
                    path,
                    self.skip_hidden,
                ))));
            } else {
                let source = SourceFile::from_path(path)
                    .await
                    .map_err(|e| io_error(path, e))?;
                entries.push(DropEntry::File(source));
            }
        }

        self.from_drop(entries).await
    }
}

/// 递归遍历条目，按 '/' 拼接路径段
#[async_recursion]
async fn walk_entries(
    entries: &[DropEntry],
    prefix: &str,
    out: &mut Vec<CollectedFile>,
) -> Result<(), CollectError> {
    for entry in entries {
        match entry {
            DropEntry::File(source) => {
                let relative_path = join_segment(prefix, &source.name);
                debug!("收集文件: {}", relative_path);
                out.push(CollectedFile {
                    source: source.clone(),
                    relative_path,
                });
            }
            DropEntry::Directory(dir) => {
                let children = dir.read_entries().await?;
                let dir_path = join_segment(prefix, dir.name());
                walk_entries(&children, &dir_path, out).await?;
            }
        }
    }
    Ok(())
}

fn join_segment(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// 反斜杠转为 '/'，去掉开头的 '/'
pub fn normalize_relative_path(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_string()
}
