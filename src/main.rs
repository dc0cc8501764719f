use anyhow::{Context, Result};
use paper_explain::utils::logging;
use paper_explain::{
    AnalysisPipeline, Config, GenerationOptions, InputFile, ProgressSink, TracingProgressSink,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    logging::init();

    // 加载配置
    let config = Config::from_env();

    // 收集待分析文件
    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        anyhow::bail!("用法: paper_explain <文件 1> [文件 2] …");
    }

    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("无法读取文件: {}", path))?;
        files.push(InputFile::new(path.clone(), bytes));
    }

    // Ctrl-C 触发协作式取消
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("收到 Ctrl-C，正在取消分析…");
                cancel.cancel();
            }
        });
    }

    let pipeline = AnalysisPipeline::from_config(&config).await?;
    let sink: Arc<dyn ProgressSink> = Arc::new(TracingProgressSink::new(config.verbose_logging));

    let records = pipeline
        .analyze(files, GenerationOptions::default(), sink, cancel)
        .await?;

    info!("共产出 {} 条讲解记录", records.len());
    Ok(())
}
