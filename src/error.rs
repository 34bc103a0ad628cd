use std::fmt;

/// 会话记忆项目的统一错误类型
#[derive(Debug)]
pub enum JarvisError {
    /// 存储层错误
    Store(StoreError),
    /// 模型运行时错误
    Llm(LlmError),
    /// 配置错误
    Config(ConfigError),
    /// IO 错误
    Io(std::io::Error),
}

/// 存储层错误，原样向调用方传播，本层不做重试
#[derive(Debug)]
pub enum StoreError {
    /// 写操作引用了不存在的会话
    ConversationNotFound(String),
    /// 记录不满足约束（如置信度越界）
    InvalidRecord(String),
    /// 数据库后端错误
    Backend(String),
    /// 序列化/反序列化错误
    Serialization(String),
    /// 文件读写错误
    Io(String),
}

/// 模型运行时错误
#[derive(Debug)]
pub enum LlmError {
    /// 网络请求失败
    NetworkError(String),
    /// 没有返回内容
    EmptyResponse,
}

/// 配置错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),
    /// 配置解析失败
    ParseFailed(String),
    /// 配置值无效
    InvalidValue { field: String, message: String },
}

impl fmt::Display for JarvisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JarvisError::Store(e) => write!(f, "Store Error: {}", e),
            JarvisError::Llm(e) => write!(f, "LLM Error: {}", e),
            JarvisError::Config(e) => write!(f, "Config Error: {}", e),
            JarvisError::Io(e) => write!(f, "IO Error: {}", e),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::ConversationNotFound(id) => write!(f, "Conversation '{}' not found", id),
            StoreError::InvalidRecord(msg) => write!(f, "Invalid record: {}", msg),
            StoreError::Backend(msg) => write!(f, "Backend error: {}", msg),
            StoreError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            StoreError::Io(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            LlmError::EmptyResponse => write!(f, "Empty response from LLM"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseFailed(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, message } => {
                write!(f, "Invalid config value for '{}': {}", field, message)
            }
        }
    }
}

impl std::error::Error for JarvisError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JarvisError::Io(e) => Some(e),
            JarvisError::Store(e) => Some(e),
            JarvisError::Llm(e) => Some(e),
            JarvisError::Config(e) => Some(e),
        }
    }
}

impl std::error::Error for StoreError {}
impl std::error::Error for LlmError {}
impl std::error::Error for ConfigError {}

// From 转换实现
impl From<std::io::Error> for JarvisError {
    fn from(err: std::io::Error) -> Self {
        JarvisError::Io(err)
    }
}

impl From<rusqlite::Error> for JarvisError {
    fn from(err: rusqlite::Error) -> Self {
        JarvisError::Store(StoreError::Backend(err.to_string()))
    }
}

impl From<serde_json::Error> for JarvisError {
    fn from(err: serde_json::Error) -> Self {
        JarvisError::Store(StoreError::Serialization(err.to_string()))
    }
}

impl From<serde_yaml::Error> for JarvisError {
    fn from(err: serde_yaml::Error) -> Self {
        JarvisError::Config(ConfigError::ParseFailed(err.to_string()))
    }
}

impl From<tokio::task::JoinError> for JarvisError {
    fn from(err: tokio::task::JoinError) -> Self {
        JarvisError::Store(StoreError::Backend(format!("blocking task failed: {}", err)))
    }
}

impl From<StoreError> for JarvisError {
    fn from(err: StoreError) -> Self {
        JarvisError::Store(err)
    }
}

impl From<LlmError> for JarvisError {
    fn from(err: LlmError) -> Self {
        JarvisError::Llm(err)
    }
}

impl From<ConfigError> for JarvisError {
    fn from(err: ConfigError) -> Self {
        JarvisError::Config(err)
    }
}

// 便捷的 Result 类型别名
pub type Result<T> = std::result::Result<T, JarvisError>;
