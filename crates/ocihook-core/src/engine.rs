//! コンテナエンジンの操作
//!
//! エンジンは variant や依存関係を知らない薄いラッパーです。
//! 実装は podman CLI を呼ぶ [`PodmanEngine`] と、テスト用の
//! [`crate::fakes::RecordingEngine`] があります。

use crate::error::{BuildError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// 1回のビルドの入力
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildRequest {
    /// ビルドコンテキストからの相対パス
    pub dockerfile: String,
    pub context_dir: PathBuf,
    pub target: Option<String>,
    /// 付与するタグ（先頭が manifest 名になる）
    pub tags: Vec<String>,
    pub build_args: BTreeMap<String, String>,
    /// コンテキスト名 -> イメージ参照
    pub contexts: BTreeMap<String, String>,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// ビルドしてタグを付けるだけ（push しない）
    async fn build_local(&self, request: &BuildRequest, platform: &str) -> Result<()>;

    /// 1プラットフォームでビルドし、全タグを push
    async fn build_single_platform(&self, request: &BuildRequest, platform: &str) -> Result<()>;

    /// プラットフォームごとにビルドして manifest list にまとめ、全タグを push
    async fn build_multi_platform(
        &self,
        request: &BuildRequest,
        platforms: &[String],
    ) -> Result<()>;

    /// ローカルイメージの削除
    async fn remove_image(&self, name: &str) -> Result<()>;
}

/// podman CLI を使うエンジン実装
#[derive(Debug, Clone)]
pub struct PodmanEngine {
    program: String,
}

impl Default for PodmanEngine {
    fn default() -> Self {
        Self::new("podman")
    }
}

impl PodmanEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// コマンドを実行
    ///
    /// stdout は stderr に流す。git は stderr を `remote:` 行として push した側に表示する。
    async fn run(&self, args: &[String]) -> Result<()> {
        let command_line = format!("{} {}", self.program, args.join(" "));
        tracing::info!("  {}", command_line);

        let status = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(std::io::stderr())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|source| BuildError::CommandSpawn {
                program: self.program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(BuildError::CommandFailed {
                command: command_line,
                status: status.to_string(),
            });
        }

        Ok(())
    }

    async fn push_manifest_tags(
        &self,
        request: &BuildRequest,
        platforms: &[String],
        manifest: &str,
    ) -> Result<()> {
        for platform in platforms {
            self.run(&build_command(request, platform, BuildOutput::Manifest(manifest)))
                .await?;
        }

        for tag in &request.tags {
            if tag != manifest {
                self.run(&strings(["tag", manifest, tag.as_str()])).await?;
            }
            self.run(&manifest_push_args(tag)).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl ContainerEngine for PodmanEngine {
    async fn build_local(&self, request: &BuildRequest, platform: &str) -> Result<()> {
        self.run(&build_command(request, platform, BuildOutput::Tags))
            .await
    }

    async fn build_single_platform(&self, request: &BuildRequest, platform: &str) -> Result<()> {
        self.run(&build_command(request, platform, BuildOutput::Tags))
            .await?;

        for tag in &request.tags {
            self.run(&strings(["push", tag.as_str()])).await?;
        }

        Ok(())
    }

    async fn build_multi_platform(
        &self,
        request: &BuildRequest,
        platforms: &[String],
    ) -> Result<()> {
        let manifest = request.tags.first().ok_or_else(|| {
            BuildError::InvalidConfig("multi-platform build needs at least one tag".to_string())
        })?;

        self.run(&strings(["manifest", "create", manifest.as_str()])).await?;

        let result = self.push_manifest_tags(request, platforms, manifest).await;

        // 成否にかかわらずローカルの manifest list は消す
        if let Err(e) = self.run(&strings(["manifest", "rm", manifest.as_str()])).await {
            tracing::warn!("Failed to remove manifest list {}: {}", manifest, e);
        }

        result
    }

    async fn remove_image(&self, name: &str) -> Result<()> {
        self.run(&strings(["rmi", name])).await
    }
}

/// ビルド結果の出力先
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildOutput<'a> {
    /// `--tag` を付ける
    Tags,
    /// `--manifest` に追加する
    Manifest(&'a str),
}

/// `podman build` の引数を組み立てる
fn build_command(request: &BuildRequest, platform: &str, output: BuildOutput<'_>) -> Vec<String> {
    let mut args = strings(["build", "--file", request.dockerfile.as_str(), "--platform", platform]);

    if let BuildOutput::Manifest(manifest) = output {
        args.extend(strings(["--manifest", manifest]));
    }

    for (key, value) in &request.build_args {
        args.push("--build-arg".to_string());
        args.push(format!("{}={}", key, value));
    }

    if let Some(target) = &request.target {
        args.extend(strings(["--target", target.as_str()]));
    }

    args.extend(build_context_args(&request.contexts));

    if output == BuildOutput::Tags {
        for tag in &request.tags {
            args.extend(strings(["--tag", tag.as_str()]));
        }
    }

    args.push(request.context_dir.display().to_string());
    args
}

/// `{name: image}` を `--build-context` フラグに変換
pub fn build_context_args(contexts: &BTreeMap<String, String>) -> Vec<String> {
    contexts
        .iter()
        .flat_map(|(name, image)| {
            [
                "--build-context".to_string(),
                format!("{}=container-image://{}", name, image),
            ]
        })
        .collect()
}

fn manifest_push_args(tag: &str) -> Vec<String> {
    strings([
        "manifest",
        "push",
        "--all",
        tag,
        format!("docker://{}", tag).as_str(),
    ])
}

fn strings<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
