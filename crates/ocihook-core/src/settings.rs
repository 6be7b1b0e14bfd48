//! フック全体の設定
//!
//! プロセス全体のグローバル状態は持たず、CLI で組み立てた値を
//! [`crate::Orchestrator`] や [`crate::Hook`] に明示的に渡します。

use std::path::{Path, PathBuf};

pub const DEFAULT_ENGINE: &str = "podman";
pub const DEFAULT_BUILDS_ROOT: &str = "/opt/builds";
pub const DEFAULT_DESCRIPTOR: &str = ".oci-build.json";
pub const DEFAULT_PLATFORM: &str = "linux/amd64";

/// リポジトリ単位の上書きオプション名（gitolite の `option oci.registry = ...`）
pub const REGISTRY_OPTION: &str = "oci.registry";
pub const IMAGE_NAME_OPTION: &str = "oci.image-name";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookSettings {
    /// コンテナエンジンの実行ファイル
    pub engine: String,
    /// リポジトリごとの作業ディレクトリを置く場所
    pub builds_root: PathBuf,
    /// リポジトリ直下のビルド定義ファイル名
    pub descriptor: String,
    /// platforms 未指定時のプラットフォーム
    pub default_platform: String,
}

impl Default for HookSettings {
    fn default() -> Self {
        Self {
            engine: DEFAULT_ENGINE.to_string(),
            builds_root: PathBuf::from(DEFAULT_BUILDS_ROOT),
            descriptor: DEFAULT_DESCRIPTOR.to_string(),
            default_platform: DEFAULT_PLATFORM.to_string(),
        }
    }
}

impl HookSettings {
    /// リポジトリのデフォルト作業ディレクトリ: `{builds_root}/{repo}-checkout`
    pub fn default_work_dir(&self, repo_name: &str) -> PathBuf {
        self.builds_root.join(format!("{}-checkout", repo_name))
    }

    /// ビルド定義の work_dir を解決（相対パスは builds_root 基準）
    pub fn resolve_work_dir(&self, work_dir: &Path) -> PathBuf {
        if work_dir.is_absolute() {
            work_dir.to_path_buf()
        } else {
            self.builds_root.join(work_dir)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_work_dir() {
        let settings = HookSettings::default();
        assert_eq!(
            settings.default_work_dir("myapp"),
            PathBuf::from("/opt/builds/myapp-checkout")
        );
    }

    #[test]
    fn test_resolve_relative_work_dir() {
        let settings = HookSettings {
            builds_root: PathBuf::from("/srv/builds"),
            ..Default::default()
        };
        assert_eq!(
            settings.resolve_work_dir(Path::new("app")),
            PathBuf::from("/srv/builds/app")
        );
        assert_eq!(
            settings.resolve_work_dir(Path::new("/tmp/x")),
            PathBuf::from("/tmp/x")
        );
    }
}
