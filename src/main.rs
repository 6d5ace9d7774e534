use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};

use cortex_analyst_batch::models::load_questions;
use cortex_analyst_batch::services::write_exports;
use cortex_analyst_batch::utils::logging;
use cortex_analyst_batch::{AnalystConnection, Config, CortexAnalystClient, JobStore};

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(questions_path) = args.next().map(PathBuf::from) else {
        bail!("用法: cortex-batch <questions.csv> [config.toml]");
    };
    let config_path = args.next().map(PathBuf::from);

    // 加载配置
    let config = match &config_path {
        Some(path) => Config::from_toml_file(path)
            .await
            .with_context(|| format!("加载配置失败: {}", path.display()))?,
        None => Config::from_env(),
    };

    // 初始化日志
    logging::init(&config.log_level);
    config.validate().context("配置校验失败")?;
    logging::log_startup(&config);

    run(config, &questions_path).await
}

async fn run(config: Config, questions_path: &Path) -> Result<()> {
    let questions = load_questions(questions_path).await?;
    info!("✓ 从 {} 读取到 {} 道题", questions_path.display(), questions.len());

    let client = CortexAnalystClient::from_config(&config).context("创建 Cortex 客户端失败")?;
    let connection: Arc<dyn AnalystConnection> = Arc::new(client);

    let store = JobStore::from_config(&config);
    let job_id = store.create(questions, connection).await;

    let mut ticker = tokio::time::interval(config.poll_interval());
    let job = loop {
        tokio::select! {
            _ = ticker.tick() => {
                let job = store.get(&job_id).await?;
                if job.is_terminal() {
                    break job;
                }
                logging::log_status(&job.summary());
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("🛑 收到中断信号，取消作业 {}", job_id);
                store.delete(&job_id).await?;
                return Ok(());
            }
        }
    };

    let mut outputs = Vec::new();
    if job.status().is_finished() {
        let (json_path, csv_path) = write_exports(&job, Path::new(&config.output_dir)).await?;
        outputs.push(json_path.display().to_string());
        outputs.push(csv_path.display().to_string());
    } else {
        error!("❌ 作业未完成 ({})，不导出结果", job.status());
    }

    logging::print_final_stats(&job, &outputs);
    Ok(())
}
