//! 记忆层：对话历史、知识库、偏好持久化

pub mod conversation;
pub mod knowledge;
pub mod preferences;

pub use conversation::{last_user_content, ConversationHistory, Message, Role};
pub use knowledge::{FileKnowledgeBase, KnowledgeSource, StaticKnowledge};
pub use preferences::{
    JsonFilePreferences, MemoryPreferences, PreferenceStore, SqlitePreferences,
    SELECTED_MODEL_KEY, SELECTED_THEME_KEY,
};
