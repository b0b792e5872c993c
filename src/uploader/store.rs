//! 批次上传项存储
//!
//! 上传项列表是批次唯一的共享可变状态。每次修改都复制整个列表、
//! 在副本上修改后整体替换，读取方拿到的快照不会被后续修改影响。

use crate::backend::UploadError;
use crate::events::UploadEvent;
use crate::uploader::task::{PendingUploadItem, UploadItemStatus};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// 事件通道容量
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// 上传项存储（克隆后共享同一列表）
#[derive(Debug, Clone)]
pub struct BatchStore {
    items: Arc<RwLock<Arc<Vec<PendingUploadItem>>>>,
    events: broadcast::Sender<UploadEvent>,
}

impl BatchStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            items: Arc::new(RwLock::new(Arc::new(Vec::new()))),
            events,
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    /// 发布事件（没有订阅者时忽略）
    pub fn publish(&self, event: UploadEvent) {
        let _ = self.events.send(event);
    }

    /// 当前列表快照
    pub fn snapshot(&self) -> Arc<Vec<PendingUploadItem>> {
        self.items.read().clone()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<PendingUploadItem> {
        self.items.read().iter().find(|item| item.id == id).cloned()
    }

    pub fn items_with_status(&self, status: UploadItemStatus) -> Vec<PendingUploadItem> {
        self.items
            .read()
            .iter()
            .filter(|item| item.status == status)
            .cloned()
            .collect()
    }

    pub fn count_status(&self, status: UploadItemStatus) -> usize {
        self.items
            .read()
            .iter()
            .filter(|item| item.status == status)
            .count()
    }

    /// 追加准入的上传项
    pub fn append(&self, new_items: Vec<PendingUploadItem>) {
        if new_items.is_empty() {
            return;
        }

        let events: Vec<UploadEvent> = new_items
            .iter()
            .map(|item| UploadEvent::Added {
                item_id: item.id.clone(),
                filename: item.filename().to_string(),
                relative_path: item.relative_path.clone(),
                size: item.source.size,
            })
            .collect();

        {
            let mut guard = self.items.write();
            let mut next = Vec::with_capacity(guard.len() + new_items.len());
            next.extend(guard.iter().cloned());
            next.extend(new_items);
            *guard = Arc::new(next);
        }

        for event in events {
            self.publish(event);
        }
    }

    /// 移除上传项
    pub fn remove(&self, id: &str) -> Result<PendingUploadItem, UploadError> {
        let removed = {
            let mut guard = self.items.write();
            let index = guard
                .iter()
                .position(|item| item.id == id)
                .ok_or_else(|| UploadError::not_found(id))?;
            let mut next = guard.as_ref().clone();
            let removed = next.remove(index);
            *guard = Arc::new(next);
            removed
        };

        debug!("移除上传项: {}", removed.relative_path);
        self.publish(UploadEvent::Removed {
            item_id: removed.id.clone(),
        });
        Ok(removed)
    }

    /// 清空列表
    pub fn clear(&self) {
        *self.items.write() = Arc::new(Vec::new());
    }

    /// 在列表副本上修改单个上传项，成功后整体替换
    fn update<T>(
        &self,
        id: &str,
        apply: impl FnOnce(&mut PendingUploadItem) -> Result<T, UploadError>,
    ) -> Result<T, UploadError> {
        let mut guard = self.items.write();
        let index = guard
            .iter()
            .position(|item| item.id == id)
            .ok_or_else(|| UploadError::not_found(id))?;

        let mut next = guard.as_ref().clone();
        let result = apply(&mut next[index])?;
        *guard = Arc::new(next);
        Ok(result)
    }

    /// 标记为上传中
    pub fn mark_uploading(&self, id: &str) -> Result<(), UploadError> {
        let old_status = self.update(id, |item| {
            let old = item.status;
            item.mark_uploading()?;
            Ok(old)
        })?;

        self.publish(UploadEvent::StatusChanged {
            item_id: id.to_string(),
            old_status,
            new_status: UploadItemStatus::Uploading,
        });
        Ok(())
    }

    /// 更新进度，只在值变化时发布事件
    pub fn set_progress(&self, id: &str, progress: u8) {
        let changed = self
            .update(id, |item| Ok(item.set_progress(progress)))
            .unwrap_or(false);

        if changed {
            self.publish(UploadEvent::Progress {
                item_id: id.to_string(),
                progress: progress.min(100),
            });
        }
    }

    /// 标记为成功
    pub fn mark_success(&self, id: &str, object_path: &str) -> Result<(), UploadError> {
        let relative_path = self.update(id, |item| {
            item.mark_success(object_path.to_string())?;
            Ok(item.relative_path.clone())
        })?;

        self.publish(UploadEvent::StatusChanged {
            item_id: id.to_string(),
            old_status: UploadItemStatus::Uploading,
            new_status: UploadItemStatus::Success,
        });
        self.publish(UploadEvent::Completed {
            item_id: id.to_string(),
            relative_path,
            object_path: object_path.to_string(),
        });
        Ok(())
    }

    /// 标记为失败
    pub fn mark_failed(&self, id: &str, error: &str) -> Result<(), UploadError> {
        let relative_path = self.update(id, |item| {
            item.mark_failed(error.to_string())?;
            Ok(item.relative_path.clone())
        })?;

        self.publish(UploadEvent::StatusChanged {
            item_id: id.to_string(),
            old_status: UploadItemStatus::Uploading,
            new_status: UploadItemStatus::Error,
        });
        self.publish(UploadEvent::Failed {
            item_id: id.to_string(),
            relative_path,
            error: error.to_string(),
        });
        Ok(())
    }
}

impl Default for BatchStore {
    fn default() -> Self {
        Self::new()
    }
}
