//! 聊天同步 CLI（演示版）
//!
//! 非交互式 CLI，在进程内文档存储上模拟两个用户的一段对话，
//! 输出所有监听器回调、最终的会话列表与消息线程。

use anyhow::{Context, Result};
use chat_sync_core_rust::im::client::{ChatClient, EngineConfig};
use chat_sync_core_rust::im::conversation::{
    ConversationListEntry, ConversationListListener, ResolveStrategy,
};
use chat_sync_core_rust::im::db::create_sqlite_pool;
use chat_sync_core_rust::im::entities::{UserIdentity, UserProfile};
use chat_sync_core_rust::im::message::{Message, MessageListener, SendListener};
use chat_sync_core_rust::im::preference::{
    save_identity, MemoryPreferenceStore, PreferenceStore, SqlitePreferenceStore,
};
use chat_sync_core_rust::im::presence::PresenceListener;
use chat_sync_core_rust::im::push::PushOutcome;
use chat_sync_core_rust::im::session::ThreadListeners;
use chat_sync_core_rust::im::store::{DocumentStore, InMemoryDocumentStore};
use chat_sync_core_rust::im::types::{fields, Fields};
use clap::{Parser, ValueEnum};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StrategyArg {
    /// 由参与者对确定会话 ID
    CompositeKey,
    /// 查询后创建（并发首发时可能重复）
    QueryThenCreate,
}

impl From<StrategyArg> for ResolveStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::CompositeKey => ResolveStrategy::CompositeKey,
            StrategyArg::QueryThenCreate => ResolveStrategy::QueryThenCreate,
        }
    }
}

/// 聊天同步 CLI
#[derive(Parser, Debug)]
#[command(name = "chat-cli")]
#[command(about = "聊天同步 CLI - 在内存文档存储上演示消息与会话合并", long_about = None)]
struct Args {
    /// 当前用户 ID
    #[arg(long, default_value = "alice")]
    me: String,

    /// 对端用户 ID
    #[arg(long, default_value = "bob")]
    peer: String,

    /// 双方各发送的消息条数
    #[arg(short, long, default_value = "3")]
    messages: usize,

    /// 会话创建方式
    #[arg(long, value_enum, default_value = "composite-key")]
    strategy: StrategyArg,

    /// 双方同时发送第一条消息，演示并发创建会话
    #[arg(long)]
    race: bool,

    /// 偏好设置 SQLite 数据库 URL，缺省时使用内存存储
    #[arg(long)]
    prefs_db: Option<String>,

    /// 日志级别（默认: info,chat_sync_core_rust=debug）
    #[arg(long, default_value = "info,chat_sync_core_rust=debug")]
    log_level: String,

    /// 额外写入的日志文件
    #[arg(long)]
    log_file: Option<String>,
}

/// 初始化日志（输出到 stdout，可选同时输出到文件）
fn init_logger(log_level: &str, log_file: Option<&str>) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 输出到文件，禁用 ANSI 颜色代码
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("无法创建日志文件 {}", path))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(false)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file {
        info!("[CLI] 📝 日志已同时输出到控制台和文件: {}", path);
    }
    Ok(())
}

/// 输出所有回调的监听器
struct CliListener {
    user: String,
}

#[async_trait::async_trait]
impl MessageListener for CliListener {
    async fn on_messages_reloaded(&self, messages: Vec<Message>) {
        info!("[CLI/{}] 📋 消息列表刷新，共 {} 条", self.user, messages.len());
    }

    async fn on_messages_appended(&self, messages: Vec<Message>, inserted: usize) {
        if let Some(last) = messages.last() {
            info!(
                "[CLI/{}] 📨 新增 {} 条消息，最新: {}: {}",
                self.user, inserted, last.sender_id, last.text
            );
        }
    }
}

#[async_trait::async_trait]
impl SendListener for CliListener {
    async fn on_input_cleared(&self) {
        info!("[CLI/{}] ✅ 发送完成", self.user);
    }

    async fn on_notification_result(&self, outcome: PushOutcome) {
        match outcome.error {
            None => info!("[CLI/{}] 🔔 通知已发送", self.user),
            Some(e) => warn!("[CLI/{}] 🔕 通知发送失败: {}", self.user, e),
        }
    }
}

#[async_trait::async_trait]
impl PresenceListener for CliListener {
    async fn on_availability_changed(&self, available: bool) {
        info!(
            "[CLI/{}] 对端{}",
            self.user,
            if available { "上线" } else { "离线" }
        );
    }

    async fn on_peer_image_changed(&self, _image: String) {
        info!("[CLI/{}] 🖼️ 对端头像已刷新", self.user);
    }
}

#[async_trait::async_trait]
impl ConversationListListener for CliListener {
    async fn on_conversation_list_changed(
        &self,
        entries: Vec<ConversationListEntry>,
        _scroll_to_top: bool,
    ) {
        info!("[CLI/{}] 🔄 会话列表（共 {} 个）", self.user, entries.len());
    }
}

fn listeners_for(user: &str) -> ThreadListeners {
    let listener = Arc::new(CliListener {
        user: user.to_string(),
    });
    ThreadListeners {
        message: listener.clone(),
        presence: listener.clone(),
        send: listener,
    }
}

async fn create_user(config: &EngineConfig, store: &dyn DocumentStore, id: &str) -> Result<()> {
    let mut user = Fields::new();
    user.insert(fields::NAME.into(), Value::from(id.to_uppercase()));
    user.insert(fields::AVAILABILITY.into(), Value::from(0));
    store.create(&config.collections.users, id, user).await?;
    Ok(())
}

async fn sign_in(
    config: &EngineConfig,
    store: Arc<dyn DocumentStore>,
    prefs: Arc<dyn PreferenceStore>,
    user_id: &str,
) -> Result<ChatClient> {
    save_identity(
        prefs.as_ref(),
        &UserIdentity::new(user_id, user_id.to_uppercase()),
    )
    .await?;
    ChatClient::new(config.clone(), store, prefs).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logger(&args.log_level, args.log_file.as_deref())?;

    info!("[CLI] 🚀 聊天同步 CLI（演示模式）");
    info!(
        "[CLI] 👥 {} <-> {}，每人 {} 条，策略 {:?}",
        args.me, args.peer, args.messages, args.strategy
    );

    let config = EngineConfig::new().with_resolve_strategy(args.strategy.into());
    let memory = Arc::new(InMemoryDocumentStore::new().with_latency(Duration::from_millis(2)));
    let store: Arc<dyn DocumentStore> = memory.clone();
    create_user(&config, store.as_ref(), &args.me).await?;
    create_user(&config, store.as_ref(), &args.peer).await?;

    let my_prefs: Arc<dyn PreferenceStore> = match &args.prefs_db {
        Some(url) => Arc::new(SqlitePreferenceStore::new(create_sqlite_pool(url).await?).await?),
        None => Arc::new(MemoryPreferenceStore::new()),
    };
    let mut me = sign_in(&config, store.clone(), my_prefs, &args.me).await?;
    let peer = sign_in(
        &config,
        store.clone(),
        Arc::new(MemoryPreferenceStore::new()),
        &args.peer,
    )
    .await?;

    me.update_push_token(&format!("{}-device", args.me)).await?;
    me.set_availability(true).await?;
    peer.set_availability(true).await?;

    let list = me
        .open_conversation_list(Arc::new(CliListener {
            user: args.me.clone(),
        }))
        .await?;
    let my_thread = me
        .open_thread(
            UserProfile::new(&args.peer, args.peer.to_uppercase()),
            listeners_for(&args.me),
        )
        .await?;
    let peer_thread = peer
        .open_thread(
            UserProfile::new(&args.me, args.me.to_uppercase()),
            listeners_for(&args.peer),
        )
        .await?;

    if args.race {
        info!("[CLI] ⚡ 双方同时发送第一条消息");
        let (a, b) = tokio::join!(
            my_thread.send_message("hi!"),
            peer_thread.send_message("hello!")
        );
        for result in [a, b] {
            if let Err(e) = result {
                error!("[CLI] 发送失败: {}", e);
            }
        }
    }

    for i in 0..args.messages {
        if let Err(e) = my_thread.send_message(&format!("message {} from {}", i, args.me)).await {
            error!("[CLI] 发送失败: {}", e);
        }
        if let Err(e) = peer_thread
            .send_message(&format!("message {} from {}", i, args.peer))
            .await
        {
            error!("[CLI] 发送失败: {}", e);
        }
    }

    // 等待订阅回推
    sleep(Duration::from_millis(200)).await;

    let records = memory.documents(&config.collections.conversations).await;
    info!("[CLI] 🗂️ 会话记录数: {}", records.len());
    if records.len() > 1 {
        let canonical = my_thread
            .resolver()
            .repair_duplicates(&args.me, &args.peer)
            .await?;
        info!("[CLI] 🔧 已合并重复会话，保留: {:?}", canonical);
        sleep(Duration::from_millis(100)).await;
    }

    info!("[CLI] 📋 会话列表:");
    for entry in list.entries() {
        info!(
            "[CLI]   - {} | 最新: {} | {}",
            entry.peer_name, entry.last_message, entry.last_message_time
        );
    }
    info!("[CLI] 💬 消息线程（{} 条）:", my_thread.messages().len());
    for message in my_thread.messages() {
        info!("[CLI]   {} -> {}: {}", message.sender_id, message.receiver_id, message.text);
    }

    my_thread.close().await;
    peer_thread.close().await;
    list.close().await;
    me.sign_out().await?;
    info!("[CLI] 👋 程序退出");
    Ok(())
}
