//! push されたリビジョンの展開とビルド引数の収集

use crate::error::Result;
use crate::push_ref::PushRef;
use crate::repository::Repository;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Dockerfile から COPY できるコミットハッシュのスタンプファイル
pub const COMMIT_HASH_FILE: &str = ".commit_hash.txt";

/// バージョンを読み取るパッケージメタデータ
const PACKAGE_JSON: &str = "package.json";

#[derive(Debug, Deserialize)]
struct PackageJson {
    version: Option<String>,
}

/// 展開済みのビルドコンテキスト
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub dir: PathBuf,
    pub build_args: BTreeMap<String, String>,
}

impl Checkout {
    /// リビジョンを dest に展開し、ビルド引数を収集する
    ///
    /// dest はリポジトリごとに使い回す（存在しなければ作成）。
    pub async fn prepare(repo: &dyn Repository, push: &PushRef, dest: &Path) -> Result<Self> {
        tracing::info!("Exporting {} into {}", push.short_sha(), dest.display());
        tokio::fs::create_dir_all(dest).await?;
        repo.export(&push.new_rev, dest).await?;

        let build_args = read_build_args(dest, push.short_sha())?;
        Ok(Self {
            dir: dest.to_path_buf(),
            build_args,
        })
    }
}

/// 展開したツリーからビルド引数を集める
///
/// COMMIT_HASH は常に含む。package.json に version があれば VERSION も含む。
/// 副作用としてコミットハッシュのスタンプファイルを書き出す。
pub fn read_build_args(work_dir: &Path, short_sha: &str) -> Result<BTreeMap<String, String>> {
    let mut args = BTreeMap::new();
    args.insert("COMMIT_HASH".to_string(), short_sha.to_string());

    let pkg_path = work_dir.join(PACKAGE_JSON);
    if pkg_path.is_file() {
        let content = std::fs::read_to_string(&pkg_path)?;
        let pkg: PackageJson = serde_json::from_str(&content)?;
        if let Some(version) = pkg.version.filter(|v| !v.is_empty()) {
            args.insert("VERSION".to_string(), version);
        }
    }

    std::fs::write(work_dir.join(COMMIT_HASH_FILE), short_sha)?;

    Ok(args)
}
