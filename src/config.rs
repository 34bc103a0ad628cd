//! 应用配置
//!
//! YAML 文件提供基础配置，环境变量（含 `.env`）覆盖其中的单项：
//! ```text
//! JARVIS_STORE_BACKEND=sqlite|file|memory
//! JARVIS_STORE_PATH=~/.jarvis/jarvis.db
//! JARVIS_CONTEXT_WINDOW=20
//! ```

use crate::error::{ConfigError, JarvisError, Result};
use crate::memory::session::{MIN_FETCH_BUFFER, SessionConfig};
use crate::memory::store::{
    ConversationStore, FileConversationStore, InMemoryConversationStore,
    SqliteConversationStore,
};
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_STORE_PATH: &str = "~/.jarvis/jarvis.db";

const ENV_BACKEND: &str = "JARVIS_STORE_BACKEND";
const ENV_PATH: &str = "JARVIS_STORE_PATH";
const ENV_CONTEXT_WINDOW: &str = "JARVIS_CONTEXT_WINDOW";

/// 存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    File,
    #[default]
    Sqlite,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "file" => Ok(StoreBackend::File),
            "sqlite" => Ok(StoreBackend::Sqlite),
            other => Err(ConfigError::InvalidValue {
                field: "store.backend".to_string(),
                message: format!("未知后端 '{other}'，可选 memory / file / sqlite"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// 数据文件路径，支持 `~/` 前缀；`memory` 后端忽略
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: DEFAULT_STORE_PATH.to_string(),
        }
    }
}

/// 顶层配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub session: SessionConfig,
}

impl AppConfig {
    /// 从 YAML 文件加载，不应用环境变量
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        let config: AppConfig = serde_yaml::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    /// 完整加载流程：`.env` → YAML（可选）→ 环境变量覆盖
    pub fn from_env(path: Option<&Path>) -> Result<Self> {
        dotenv().ok();
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        debug!(?config, "⚙️ 配置已加载");
        Ok(config)
    }

    /// 用查找函数提供的值覆盖对应字段
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(backend) = lookup(ENV_BACKEND) {
            self.store.backend = backend.parse()?;
        }
        if let Some(path) = lookup(ENV_PATH)
            && !path.trim().is_empty()
        {
            self.store.path = path;
        }
        if let Some(window) = lookup(ENV_CONTEXT_WINDOW) {
            self.session.context_window =
                window
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        field: ENV_CONTEXT_WINDOW.to_string(),
                        message: format!("'{window}' 不是非负整数"),
                    })?;
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.session.fetch_buffer < MIN_FETCH_BUFFER {
            warn!(
                fetch_buffer = self.session.fetch_buffer,
                min = MIN_FETCH_BUFFER,
                "fetch_buffer 小于下限，按下限生效"
            );
        }
        if self.store.backend != StoreBackend::Memory && self.store.path.trim().is_empty() {
            return Err(JarvisError::Config(ConfigError::InvalidValue {
                field: "store.path".to_string(),
                message: "持久化后端需要非空路径".to_string(),
            }));
        }
        Ok(())
    }
}

/// 按配置构建存储后端
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn ConversationStore>> {
    let store: Arc<dyn ConversationStore> = match config.backend {
        StoreBackend::Memory => Arc::new(InMemoryConversationStore::new()),
        StoreBackend::File => Arc::new(FileConversationStore::new(&config.path)?),
        StoreBackend::Sqlite => Arc::new(SqliteConversationStore::open(&config.path)?),
    };
    Ok(store)
}
