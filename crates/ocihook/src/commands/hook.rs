use ocihook_core::{GitRepository, Hook, HookSettings, PodmanEngine};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

/// stdin の ref 更新をすべて処理し、終了コードを決める
pub async fn handle(repo: Arc<GitRepository>, settings: HookSettings) -> anyhow::Result<ExitCode> {
    let mut input = String::new();
    tokio::io::stdin().read_to_string(&mut input).await?;

    tracing::debug!("Read {} bytes of ref updates", input.len());

    let engine = Arc::new(PodmanEngine::new(settings.engine.clone()));
    let hook = Hook::new(repo, engine, settings);

    let report = hook.run(&input).await;
    report.print_summary();

    if report.success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
