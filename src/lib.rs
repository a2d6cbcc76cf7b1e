pub mod im;

// 重新导出常用类型和函数，方便外部使用
pub use im::{
    client::{ChatClient, EngineConfig, PushConfig},
    conversation::{ConversationListEntry, ConversationResolver, ResolveStrategy},
    entities::{UserIdentity, UserProfile},
    error::{RecordError, SendError, StreamError},
    message::Message,
    session::{ConversationListSession, SendReceipt, ThreadListeners, ThreadSession},
    store::{DocumentStore, InMemoryDocumentStore},
};
