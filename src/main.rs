use clap::{Parser, Subcommand};
use jarvis_memory::config::{AppConfig, open_store};
use jarvis_memory::memory::{
    ConversationStore, MessageKind, SessionConfig, SessionMemory, StoredMessage,
    format_user_facts,
};
use std::path::PathBuf;
use std::sync::Arc;

/// 查看和维护 JARVIS 会话记忆
#[derive(Parser)]
#[command(name = "jarvis-memory", version)]
struct Cli {
    /// YAML 配置文件
    #[arg(short, long, env = "JARVIS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 列出会话（按最近活动排序）
    Conversations {
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// 包含已归档会话
        #[arg(long)]
        all: bool,
    },
    /// 打印会话的全部消息
    Show { id: String },
    /// 打印会话当前的上下文窗口
    Context {
        id: String,
        #[arg(long)]
        window: Option<usize>,
    },
    /// 列出用户事实
    Facts {
        #[arg(long = "type")]
        fact_type: Option<String>,
    },
    /// 写入或更新一条用户事实
    SetFact {
        fact_type: String,
        key: String,
        value: String,
        #[arg(long, default_value_t = 1.0)]
        confidence: f64,
    },
    /// 归档会话
    Archive { id: String },
    /// 重命名会话并锁定标题
    Rename { id: String, title: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "jarvis_memory=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env(cli.config.as_deref())?;
    let store = open_store(&config.store)?;

    match cli.command {
        Command::Conversations { limit, all } => {
            let conversations = store.list_conversations(limit, all).await?;
            if conversations.is_empty() {
                println!("（没有会话）");
            }
            for conv in conversations {
                println!(
                    "{}  {}{}",
                    conv.id,
                    conv.title.as_deref().unwrap_or("(untitled)"),
                    if conv.archived { "  [archived]" } else { "" }
                );
            }
        }
        Command::Show { id } => {
            let Some(conv) = store.get_conversation(&id).await? else {
                return Err(format!("会话不存在: {id}").into());
            };
            println!("# {}", conv.title.as_deref().unwrap_or("(untitled)"));
            for msg in store.get_messages(&id, usize::MAX).await? {
                print_message(&msg);
            }
        }
        Command::Context { id, window } => {
            if store.get_conversation(&id).await?.is_none() {
                return Err(format!("会话不存在: {id}").into());
            }
            let session_config = match window {
                Some(n) => SessionConfig {
                    context_window: n,
                    ..config.session.clone()
                },
                None => config.session.clone(),
            };
            let session = SessionMemory::open(store.clone(), Some(&id), session_config).await?;
            let window = session.context_window().await?;
            for msg in &window.messages {
                print_message(msg);
            }
            println!("-- {} 条消息（读取 {} 条）", window.len(), window.fetched);
            if !window.is_complete() {
                println!("-- 未解析的工具调用: {}", window.unresolved.join(", "));
            }
        }
        Command::Facts { fact_type } => {
            let facts = store.get_user_facts(fact_type.as_deref()).await?;
            println!("{}", format_user_facts(&facts));
        }
        Command::SetFact {
            fact_type,
            key,
            value,
            confidence,
        } => {
            store
                .set_user_fact(&fact_type, &key, &value, confidence)
                .await?;
            println!("✅ {fact_type}.{key} = {value}");
        }
        Command::Archive { id } => {
            store.archive_conversation(&id).await?;
            println!("📦 已归档 {id}");
        }
        Command::Rename { id, title } => {
            rename(store, &id, &title).await?;
            println!("🏷️ {id} → {title}");
        }
    }
    Ok(())
}

async fn rename(
    store: Arc<dyn ConversationStore>,
    id: &str,
    title: &str,
) -> jarvis_memory::error::Result<()> {
    store.update_conversation_title(id, title).await?;
    store.lock_conversation_title(id).await
}

fn print_message(msg: &StoredMessage) {
    match &msg.kind {
        MessageKind::Assistant { tool_calls } if !tool_calls.is_empty() => {
            let calls: Vec<String> = tool_calls
                .iter()
                .map(|c| format!("{}#{}({})", c.name, c.id, c.args))
                .collect();
            println!("[assistant] {} => {}", msg.content, calls.join(", "));
        }
        MessageKind::Tool { .. } => println!(
            "[tool {}#{}({})] {}",
            msg.kind.tool_name().unwrap_or("unknown"),
            msg.kind.tool_call_id().unwrap_or(""),
            msg.kind.tool_args().unwrap_or(""),
            msg.content
        ),
        kind => println!("[{}] {}", kind.role(), msg.content),
    }
}
