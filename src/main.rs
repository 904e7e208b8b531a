use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use workshop_cache::cache::{CacheManager, InProcessSources, ManagerSettings};
use workshop_cache::cli::args::Args;
use workshop_cache::infrastructure::{setup_logging, ConfigManager, ConfigSource};
use workshop_cache::service::{Authenticator, CacheService, HmacTokenAuthenticator};
use workshop_cache::storage::open_store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut sources = ConfigManager::new();
    if let Some(path) = &args.config {
        sources = sources.add_source(ConfigSource::File(path.clone()));
    }
    let mut config_manager = sources
        .add_source(ConfigSource::Environment)
        .add_source(ConfigSource::CommandLine(args.overrides()));
    let config = config_manager.load().context("加载配置失败")?.clone();

    setup_logging(config.logging.to_logging_config()?)?;

    if let Some(ids) = &args.issue_token {
        let [tenant, user] = ids.as_slice() else {
            anyhow::bail!("--issue-token expects TENANT and USER");
        };
        let secret = config
            .auth
            .secret
            .as_deref()
            .context("auth.secret must be set to issue tokens")?;
        println!("{}", HmacTokenAuthenticator::new(secret).issue(tenant, user)?);
        return Ok(());
    }

    let store = open_store(&config.storage).await.context("打开持久层失败")?;
    let mut manager = CacheManager::new(ManagerSettings::from_app_config(&config), Some(store));
    if let Some(seed) = &args.seed {
        let records = InProcessSources::from_file(seed)
            .with_context(|| format!("加载业务数据失败: {}", seed.display()))?;
        manager = manager.with_sources(Arc::new(records));
    }
    let manager = Arc::new(manager);

    let mut janitor = manager.janitor();
    janitor.start();

    let authenticator = config
        .auth
        .secret
        .as_deref()
        .map(|secret| Arc::new(HmacTokenAuthenticator::new(secret)) as Arc<dyn Authenticator>);
    if authenticator.is_none() {
        warn!("auth.secret is not set, protected actions will be rejected");
    }
    let service = CacheService::new(Arc::clone(&manager), authenticator)
        .with_preload_collections(config.warmup.preload_collections.clone());

    info!(backend = ?config.storage.backend, "workshop-cache ready, reading requests from stdin");

    let result = tokio::select! {
        result = serve(&service) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    };

    janitor.stop().await;
    manager.shutdown().await;
    info!("workshop-cache stopped");
    result
}

/// 行分隔的 JSON 请求/响应，直到标准输入关闭
async fn serve(service: &CacheService) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = service.handle_line(line).await;
        let output = serde_json::to_string(&response)?;
        stdout.write_all(output.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    Ok(())
}
