//! 对端在线状态跟踪
//!
//! 订阅对端的用户记录，只对外暴露在线状态、推送 token 和头像三项变化。

use crate::im::change::FromDocument;
use crate::im::presence::listener::PresenceListener;
use crate::im::presence::models::{PeerRecord, PresenceDelta, PresenceState};
use crate::im::serialization::decode_image;
use crate::im::store::DocumentStore;
use crate::im::types::{ChangeKind, DocumentChange};
use anyhow::{Context, Result};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 将一条对端用户记录应用到在线状态上
pub fn apply_peer_record(
    mut state: PresenceState,
    record: &PeerRecord,
) -> (PresenceState, PresenceDelta) {
    let mut delta = PresenceDelta::default();

    // 字段缺失视为离线
    let available = record.availability == Some(1);
    if available != state.available {
        delta.availability = Some(available);
    }
    state.available = available;

    match &record.push_token {
        Some(token) => state.push_token = Some(token.clone()),
        None => {
            state.push_token = None;
            if let Some(image) = &record.image {
                if state.peer_image.as_ref() != Some(image) {
                    if decode_image(image).is_some() {
                        state.peer_image = Some(image.clone());
                        delta.image_refreshed = Some(image.clone());
                    } else {
                        warn!("[Presence] 对端头像不是有效的 base64，忽略: {}", record.id);
                    }
                }
            }
        }
    }
    (state, delta)
}

/// 持有单个对端在线状态的跟踪器
#[derive(Debug)]
pub struct PresenceTracker {
    peer_id: String,
    state: PresenceState,
}

impl PresenceTracker {
    pub fn new(peer_id: impl Into<String>, initial: PresenceState) -> Self {
        Self {
            peer_id: peer_id.into(),
            state: initial,
        }
    }

    pub fn state(&self) -> &PresenceState {
        &self.state
    }

    /// 处理对端文档的一个变更批次，返回相对批次前的净变化
    pub fn on_batch(&mut self, changes: &[DocumentChange]) -> PresenceDelta {
        let before = self.state.clone();
        let mut image_refreshed = None;

        for change in changes.iter().filter(|c| c.document.id == self.peer_id) {
            match change.kind {
                ChangeKind::Added | ChangeKind::Modified => {
                    let Ok(record) = PeerRecord::from_document(&change.document) else {
                        continue;
                    };
                    let (state, delta) = apply_peer_record(std::mem::take(&mut self.state), &record);
                    self.state = state;
                    if delta.image_refreshed.is_some() {
                        image_refreshed = delta.image_refreshed;
                    }
                }
                ChangeKind::Removed => {
                    info!("[Presence] 对端用户记录被删除: {}", self.peer_id);
                    self.state.available = false;
                    self.state.push_token = None;
                }
            }
        }

        PresenceDelta {
            availability: (self.state.available != before.available).then_some(self.state.available),
            image_refreshed,
        }
    }

    /// 订阅对端用户记录，在后台任务中维护在线状态
    ///
    /// 返回的句柄被关闭或 drop 时订阅随之结束。
    pub async fn subscribe(
        store: &Arc<dyn DocumentStore>,
        users_collection: &str,
        peer_id: &str,
        initial_image: Option<String>,
        listener: Arc<dyn PresenceListener>,
    ) -> Result<PresenceSubscription> {
        let mut subscription = store
            .subscribe_document(users_collection, peer_id)
            .await
            .with_context(|| format!("订阅对端用户记录失败: {}", peer_id))?;

        let initial = PresenceState::with_peer_image(initial_image);
        let shared = Arc::new(RwLock::new(initial.clone()));
        let mut tracker = PresenceTracker::new(peer_id, initial);
        let state = shared.clone();
        let peer = peer_id.to_string();

        let task = tokio::spawn(async move {
            while let Some(batch) = subscription.next().await {
                let changes = match batch {
                    Ok(changes) => changes,
                    Err(e) => {
                        warn!("[Presence] 对端 {} 订阅流错误，保留现有状态: {}", peer, e);
                        continue;
                    }
                };
                let delta = tracker.on_batch(&changes);
                *state.write().await = tracker.state().clone();
                if delta.is_empty() {
                    continue;
                }
                debug!("[Presence] 对端 {} 状态变化: {:?}", peer, delta);
                if let Some(available) = delta.availability {
                    listener.on_availability_changed(available).await;
                }
                if let Some(image) = delta.image_refreshed {
                    listener.on_peer_image_changed(image).await;
                }
            }
            debug!("[Presence] 对端 {} 订阅结束", peer);
        });

        Ok(PresenceSubscription {
            state: shared,
            task,
        })
    }
}

/// 在线状态订阅句柄
pub struct PresenceSubscription {
    state: Arc<RwLock<PresenceState>>,
    task: JoinHandle<()>,
}

impl PresenceSubscription {
    /// 当前在线状态快照
    pub async fn state(&self) -> PresenceState {
        self.state.read().await.clone()
    }

    /// 取消订阅并等待后台任务退出
    pub async fn close(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl Drop for PresenceSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::store::InMemoryDocumentStore;
    use crate::im::types::{Document, Fields};
    use serde_json::json;
    use std::sync::Mutex;

    fn record(value: serde_json::Value) -> PeerRecord {
        let fields: Fields = value.as_object().cloned().unwrap_or_default();
        PeerRecord::from_document(&Document::new("bob", fields)).unwrap()
    }

    #[test]
    fn missing_availability_means_offline() {
        let (state, delta) = apply_peer_record(
            PresenceState {
                available: true,
                ..PresenceState::default()
            },
            &record(json!({"fcmToken": "tok"})),
        );
        assert!(!state.available);
        assert_eq!(delta.availability, Some(false));
        assert_eq!(state.push_token.as_deref(), Some("tok"));

        let (state, _) = apply_peer_record(state, &record(json!({"availability": "yes"})));
        assert!(!state.available);
    }

    #[test]
    fn token_absent_refreshes_image_only_when_changed() {
        let (state, delta) = apply_peer_record(
            PresenceState::with_peer_image(Some("aGk=".into())),
            &record(json!({"availability": 1, "image": "aGk="})),
        );
        assert!(state.available);
        assert_eq!(delta.image_refreshed, None);

        let (state, delta) = apply_peer_record(state, &record(json!({"availability": 1, "image": "aGV5"})));
        assert_eq!(delta.image_refreshed.as_deref(), Some("aGV5"));
        assert_eq!(delta.availability, None);
        assert_eq!(state.peer_image.as_deref(), Some("aGV5"));

        // 有 token 时不刷新头像
        let (state, delta) = apply_peer_record(state, &record(json!({"fcmToken": "t", "image": "b2s="})));
        assert_eq!(delta.image_refreshed, None);
        assert_eq!(state.peer_image.as_deref(), Some("aGV5"));
    }

    #[test]
    fn line_wrapped_image_is_refreshed() {
        let wrapped = "aGVsbG8gd29y\nbGQ=\n";
        let (state, delta) = apply_peer_record(
            PresenceState::default(),
            &record(json!({"availability": 1, "image": wrapped})),
        );
        assert_eq!(delta.image_refreshed.as_deref(), Some(wrapped));
        assert_eq!(state.peer_image.as_deref(), Some(wrapped));
    }

    #[derive(Default)]
    struct RecordingPresence {
        availability: Mutex<Vec<bool>>,
        images: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl PresenceListener for RecordingPresence {
        async fn on_availability_changed(&self, available: bool) {
            self.availability.lock().unwrap().push(available);
        }
        async fn on_peer_image_changed(&self, image: String) {
            self.images.lock().unwrap().push(image);
        }
    }

    #[tokio::test]
    async fn subscription_tracks_peer_record() {
        let memory = Arc::new(InMemoryDocumentStore::new());
        let store: Arc<dyn DocumentStore> = memory.clone();
        store
            .create("users", "bob", json!({"name": "Bob"}).as_object().cloned().unwrap())
            .await
            .unwrap();

        let listener = Arc::new(RecordingPresence::default());
        let sub = PresenceTracker::subscribe(&store, "users", "bob", None, listener.clone())
            .await
            .unwrap();

        store
            .update("users", "bob", json!({"availability": 1, "image": "aGk="}).as_object().cloned().unwrap())
            .await
            .unwrap();
        memory.emit_stream_error("users", "network").await;
        store
            .update("users", "bob", json!({"fcmToken": "tok"}).as_object().cloned().unwrap())
            .await
            .unwrap();

        for _ in 0..50 {
            if sub.state().await.push_token.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let state = sub.state().await;
        assert!(state.available);
        assert_eq!(state.push_token.as_deref(), Some("tok"));
        assert_eq!(*listener.availability.lock().unwrap(), vec![true]);
        assert_eq!(*listener.images.lock().unwrap(), vec!["aGk=".to_string()]);

        sub.close().await;
        assert_eq!(memory.subscriber_count().await, 0);
    }
}
