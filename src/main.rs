//! Hive - 命令行入口
//!
//! 从 stdin 逐行读取消息交给 Router 处理并打印回复。
//! 用户 ID 取自 HIVE_USER（默认 local）；输入 `:state` 打印当前会话快照，`:quit` 退出。

use anyhow::Context;
use hive::{agent::build_router, observability};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let router = build_router(config_path).context("Failed to build router")?;
    let uid = std::env::var("HIVE_USER").unwrap_or_else(|_| "local".to_string());
    tracing::info!(uid = %uid, agents = ?router.registry().names(), "Hive ready");

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            ":quit" | ":exit" => break,
            ":state" => {
                let snapshot = router.snapshot(&uid).await;
                let text = serde_json::to_string_pretty(&snapshot).context("Failed to serialize state")?;
                stdout.write_all(format!("{text}\n").as_bytes()).await?;
            }
            _ => {
                let reply = router.process(&uid, input).await;
                stdout.write_all(format!("{reply}\n\n").as_bytes()).await?;
            }
        }
    }
    Ok(())
}
