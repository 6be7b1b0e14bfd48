//! ソース管理とリポジトリ単位オプションへのアクセス
//!
//! フックが触るのは「指定リビジョンのファイル読み出し」「アーカイブ展開」
//! 「リポジトリオプションの参照」の3つだけです。git CLI を呼ぶ実装と、
//! テスト用のインメモリ実装（[`crate::fakes::MemoryRepository`]）があります。

use crate::error::{BuildError, Result};
use async_trait::async_trait;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// gitolite は `option X = Y` を `gitolite-options.X` として git config に保存する
const OPTION_SECTION: &str = "gitolite-options";

#[async_trait]
pub trait Repository: Send + Sync {
    /// リポジトリ名（`.git` を除いたディレクトリ名）
    fn name(&self) -> &str;

    /// リビジョン名をコミット ID に解決
    async fn resolve(&self, rev: &str) -> Result<String>;

    /// 指定リビジョンのファイルを読み出す（存在しなければ None）
    async fn read_file(&self, rev: &str, path: &str) -> Result<Option<String>>;

    /// リポジトリ単位のオプションを参照（未設定・空文字なら None）
    async fn option(&self, key: &str) -> Result<Option<String>>;

    /// 指定リビジョンのツリーを dest に展開
    async fn export(&self, rev: &str, dest: &Path) -> Result<()>;
}

/// git CLI を使うリポジトリ実装
#[derive(Debug, Clone)]
pub struct GitRepository {
    git_dir: PathBuf,
    name: String,
}

impl GitRepository {
    pub fn open(git_dir: impl Into<PathBuf>) -> Self {
        let git_dir = git_dir.into();
        let name = repo_name_from_path(&git_dir);
        Self { git_dir, name }
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    async fn git(&self, args: &[&str]) -> Result<std::process::Output> {
        tracing::debug!("Running: git --git-dir {} {}", self.git_dir.display(), args.join(" "));

        Command::new("git")
            .arg("--git-dir")
            .arg(&self.git_dir)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| BuildError::CommandSpawn {
                program: "git".to_string(),
                source,
            })
    }
}

#[async_trait]
impl Repository for GitRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(&self, rev: &str) -> Result<String> {
        let spec = format!("{}^{{commit}}", rev);
        let output = self.git(&["rev-parse", "--verify", "--quiet", &spec]).await?;

        if !output.status.success() {
            return Err(BuildError::InvalidRef(format!("unknown revision: {}", rev)));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn read_file(&self, rev: &str, path: &str) -> Result<Option<String>> {
        let object = format!("{}:{}", rev, path);
        let output = self.git(&["show", &object]).await?;

        if !output.status.success() {
            tracing::debug!(
                "git show {} failed: {}",
                object,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(None);
        }

        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }

    async fn option(&self, key: &str) -> Result<Option<String>> {
        let name = format!("{}.{}", OPTION_SECTION, key);
        let output = self.git(&["config", "--get", &name]).await?;

        // exit 1 はキー未設定
        if output.status.code() == Some(1) {
            return Ok(None);
        }
        if !output.status.success() {
            return Err(BuildError::CommandFailed {
                command: format!("git config --get {}", name),
                status: output.status.to_string(),
            });
        }

        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!value.is_empty()).then_some(value))
    }

    async fn export(&self, rev: &str, dest: &Path) -> Result<()> {
        let git_dir = self.git_dir.clone();
        let rev = rev.to_string();
        let dest = dest.to_path_buf();

        tokio::task::spawn_blocking(move || export_archive(&git_dir, &rev, &dest))
            .await
            .map_err(|e| BuildError::Checkout(format!("archive task panicked: {}", e)))?
    }
}

/// `git archive` の tar ストリームをそのまま展開する
///
/// 作業ツリーの checkout は使わない（同じリポジトリへの並行 push で index がロックされるため）。
/// バイト列のまま tar に渡すので、バイナリファイルも壊れない。
fn export_archive(git_dir: &Path, rev: &str, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;

    let mut child = std::process::Command::new("git")
        .arg("--git-dir")
        .arg(git_dir)
        .args(["archive", "--format=tar", rev])
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| BuildError::CommandSpawn {
            program: "git".to_string(),
            source,
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| BuildError::Checkout("git archive has no stdout".to_string()))?;

    // 展開に失敗した場合も stdout を閉じてから wait する
    let unpacked = unpack_archive(stdout, dest);
    let status = child.wait()?;

    if !status.success() {
        return Err(BuildError::CommandFailed {
            command: format!("git archive --format=tar {}", rev),
            status: status.to_string(),
        });
    }

    unpacked
}

/// tar ストリームを dest に展開
pub fn unpack_archive<R: Read>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_overwrite(true);
    archive
        .unpack(dest)
        .map_err(|e| BuildError::Checkout(format!("failed to extract into {}: {}", dest.display(), e)))
}

/// git ディレクトリのパスからリポジトリ名を求める
///
/// - `/srv/git/myapp.git` -> `myapp`
/// - `/home/me/myapp/.git` -> `myapp`
pub fn repo_name_from_path(git_dir: &Path) -> String {
    let file_name = git_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if file_name == ".git" {
        return git_dir
            .parent()
            .map(repo_name_from_path)
            .unwrap_or_default();
    }

    file_name
        .strip_suffix(".git")
        .map(str::to_string)
        .unwrap_or(file_name)
}
