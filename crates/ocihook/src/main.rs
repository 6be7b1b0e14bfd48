mod commands;

use clap::{Args, Parser, Subcommand};
use ocihook_core::settings::{
    DEFAULT_BUILDS_ROOT, DEFAULT_DESCRIPTOR, DEFAULT_ENGINE, DEFAULT_PLATFORM,
};
use ocihook_core::{GitRepository, HookSettings, Repository};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ocihook")]
#[command(version)]
#[command(about = "git push で OCI イメージをビルドして公開する post-receive フック", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: SettingsArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct SettingsArgs {
    /// git ディレクトリ（省略時はカレントディレクトリ）
    #[arg(long, env = "OCIHOOK_GIT_DIR", global = true)]
    git_dir: Option<PathBuf>,

    /// コンテナエンジンの実行ファイル
    #[arg(long, env = "OCIHOOK_ENGINE", default_value = DEFAULT_ENGINE, global = true)]
    engine: String,

    /// 作業ディレクトリを置く場所
    #[arg(long, env = "OCIHOOK_BUILDS_ROOT", default_value = DEFAULT_BUILDS_ROOT, global = true)]
    builds_root: PathBuf,

    /// ビルド定義ファイル名
    #[arg(long, env = "OCIHOOK_DESCRIPTOR", default_value = DEFAULT_DESCRIPTOR, global = true)]
    descriptor: String,

    /// platforms 未指定時のプラットフォーム
    #[arg(long, env = "OCIHOOK_DEFAULT_PLATFORM", default_value = DEFAULT_PLATFORM, global = true)]
    default_platform: String,
}

impl SettingsArgs {
    fn to_settings(&self) -> HookSettings {
        HookSettings {
            engine: self.engine.clone(),
            builds_root: self.builds_root.clone(),
            descriptor: self.descriptor.clone(),
            default_platform: self.default_platform.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// stdin の ref 更新を処理してビルド（デフォルト）
    Hook,
    /// 指定リビジョンのビルド定義を検証（ビルドはしない）
    Validate {
        /// 検証するリビジョン
        rev: String,
        /// タグ算出に使う ref 名
        #[arg(long = "ref", default_value = "refs/heads/main")]
        refname: String,
    },
}

fn init_tracing() {
    use std::io::IsTerminal;
    use tracing_subscriber::EnvFilter;

    // git は stderr を `remote:` 行として push した側に表示する
    let filter = EnvFilter::try_from_env("OCIHOOK_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .without_time()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing();

    // post-receive はベアリポジトリの中で実行される
    let git_dir = match &cli.settings.git_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let settings = cli.settings.to_settings();
    let repo = Arc::new(GitRepository::open(git_dir));
    tracing::debug!(
        "Repository: {} ({})",
        repo.name(),
        repo.git_dir().display()
    );

    match cli.command.unwrap_or(Commands::Hook) {
        Commands::Hook => commands::hook::handle(repo, settings).await,
        Commands::Validate { rev, refname } => {
            commands::validate::handle(repo.as_ref(), &settings, &rev, &refname).await
        }
    }
}
