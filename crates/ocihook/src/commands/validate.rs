use colored::Colorize;
use ocihook_core::{BuildConfig, HookSettings, Orchestrator, PushRef, Repository};
use std::process::ExitCode;

pub async fn handle(
    repo: &dyn Repository,
    settings: &HookSettings,
    rev: &str,
    refname: &str,
) -> anyhow::Result<ExitCode> {
    println!("{}", "ビルド定義を検証中...".blue());

    let commit = repo.resolve(rev).await?;
    let push = PushRef::new("0".repeat(commit.len()), commit.as_str(), refname);
    println!("リビジョン: {} ({})", rev.cyan(), push.short_sha());

    let config = match BuildConfig::load(repo, &commit, settings).await {
        Ok(Some(config)) => config,
        Ok(None) => {
            println!(
                "{}",
                format!("{} がありません（ビルド対象外）", settings.descriptor).yellow()
            );
            return Ok(ExitCode::SUCCESS);
        }
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ 設定エラー".red().bold());
            eprintln!("  {}", e.user_message());
            return Ok(ExitCode::FAILURE);
        }
    };

    println!("{}", "✓ ビルド定義は正常です！".green().bold());
    println!();
    println!("サマリー:");
    println!("  イメージ: {}", config.image_base().cyan());
    println!("  プラットフォーム: {}", config.platforms.join(", "));
    println!("  作業ディレクトリ: {}", config.work_dir.display());
    println!("  モード: {}", config.mode());
    if let Some(base) = &config.base {
        println!(
            "  ベース: {} → {}",
            base.dockerfile,
            Orchestrator::base_image_name(&config, &push).cyan()
        );
    }

    let image_base = config.image_base();
    println!("  variant: {}個", config.variants.len());
    for variant in &config.variants {
        println!("    - {} ({})", variant.label().cyan(), variant.dockerfile);
        for (context, producer) in &variant.contexts {
            let producer = if producer.is_empty() { "main" } else { producer.as_str() };
            println!("        context {} ← {}", context, producer);
        }
        for tag in push.image_tags(&image_base, &variant.suffix) {
            println!("        {}", tag);
        }
    }

    Ok(ExitCode::SUCCESS)
}
