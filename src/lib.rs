pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod memory;
pub mod testing;

pub mod prelude {
    pub use crate::agent::{ConversationAgent, build_system_prompt};
    pub use crate::config::{AppConfig, StoreBackend, StoreConfig, open_store};
    pub use crate::error::{JarvisError, Result};
    pub use crate::llm::{ModelRuntime, RuntimeReply};
    pub use crate::memory::{
        ConversationStore, SessionConfig, SessionMemory, TitlePolicy, ToolCallRecord,
        format_user_facts,
    };
}
