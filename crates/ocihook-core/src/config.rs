//! ビルド定義（`.oci-build.json`）の読み込み
//!
//! 定義ファイルは push されたリビジョンから直接読み出します（作業ツリーは見ない）。
//! リポジトリ単位のオプション（`oci.registry`, `oci.image-name`）が設定されていれば、
//! 定義ファイルの値より常に優先されます。

use crate::error::{BuildError, Result};
use crate::push_ref::SHORT_SHA_LEN;
use crate::repository::Repository;
use crate::settings::{HookSettings, IMAGE_NAME_OPTION, REGISTRY_OPTION};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// 定義ファイルの生の形
#[derive(Debug, Default, Deserialize)]
struct Descriptor {
    registry: Option<String>,
    image_name: Option<String>,
    platforms: Option<Vec<String>>,
    work_dir: Option<PathBuf>,
    base: Option<BaseSpec>,
    variants: Option<Vec<Variant>>,
}

/// 同じリビジョンから作る1つのイメージ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    /// タグのサフィックス（"" がメインイメージ）
    #[serde(default)]
    pub suffix: String,
    pub dockerfile: String,
    #[serde(default)]
    pub target: Option<String>,
    /// コンテキスト名 -> 先にビルドされた variant のサフィックス
    #[serde(default)]
    pub contexts: BTreeMap<String, String>,
}

impl Variant {
    pub fn new(suffix: impl Into<String>, dockerfile: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
            dockerfile: dockerfile.into(),
            target: None,
            contexts: BTreeMap::new(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_context(mut self, name: impl Into<String>, producer: impl Into<String>) -> Self {
        self.contexts.insert(name.into(), producer.into());
        self
    }

    /// 表示用ラベル（メインは "main"）
    pub fn label(&self) -> &str {
        if self.suffix.is_empty() {
            "main"
        } else {
            &self.suffix
        }
    }
}

impl Default for Variant {
    fn default() -> Self {
        Self::new("", "Dockerfile")
    }
}

/// 共有ベースイメージ（ローカルのみ、push しない）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseSpec {
    pub dockerfile: String,
}

/// リポジトリ単位の上書き値
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub registry: Option<String>,
    pub image_name: Option<String>,
}

impl Overrides {
    pub async fn load(repo: &dyn Repository) -> Result<Self> {
        Ok(Self {
            registry: repo.option(REGISTRY_OPTION).await?,
            image_name: repo.option(IMAGE_NAME_OPTION).await?,
        })
    }
}

/// 検証済みのビルド設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    pub registry: String,
    pub image_name: String,
    pub platforms: Vec<String>,
    pub work_dir: PathBuf,
    pub variants: Vec<Variant>,
    pub base: Option<BaseSpec>,
}

impl BuildConfig {
    /// push されたリビジョンから定義ファイルを読み込む
    ///
    /// 定義ファイルが無ければ `Ok(None)`（ビルド対象外のリポジトリ）。
    pub async fn load(
        repo: &dyn Repository,
        rev: &str,
        settings: &HookSettings,
    ) -> Result<Option<Self>> {
        let Some(raw) = repo.read_file(rev, &settings.descriptor).await? else {
            return Ok(None);
        };

        tracing::info!(
            "Found {} in {} ({})",
            settings.descriptor,
            repo.name(),
            rev.chars().take(SHORT_SHA_LEN).collect::<String>()
        );

        let overrides = Overrides::load(repo).await?;
        Self::from_descriptor(&raw, repo.name(), &overrides, settings).map(Some)
    }

    /// 定義ファイルの内容から設定を組み立てて検証する
    pub fn from_descriptor(
        raw: &str,
        repo_name: &str,
        overrides: &Overrides,
        settings: &HookSettings,
    ) -> Result<Self> {
        let descriptor: Descriptor =
            serde_json::from_str(raw).map_err(|source| BuildError::DescriptorParse {
                file: settings.descriptor.clone(),
                source,
            })?;

        let registry = overrides
            .registry
            .clone()
            .or(non_empty(descriptor.registry))
            .ok_or(BuildError::MissingField("registry"))?;

        let image_name = overrides
            .image_name
            .clone()
            .or(non_empty(descriptor.image_name))
            .unwrap_or_else(|| repo_name.to_string());

        let platforms = descriptor
            .platforms
            .unwrap_or_else(|| vec![settings.default_platform.clone()]);

        let work_dir = descriptor
            .work_dir
            .map(|dir| settings.resolve_work_dir(&dir))
            .unwrap_or_else(|| settings.default_work_dir(repo_name));

        // target "" は未指定と同じ
        let variants = descriptor
            .variants
            .unwrap_or_else(|| vec![Variant::default()])
            .into_iter()
            .map(|mut v| {
                v.target = non_empty(v.target);
                v
            })
            .collect();

        let config = Self {
            registry,
            image_name,
            platforms,
            work_dir,
            variants,
            base: descriptor.base,
        };
        config.validate()?;
        Ok(config)
    }

    /// 設定の検証
    pub fn validate(&self) -> Result<()> {
        if self.platforms.is_empty() {
            return Err(BuildError::InvalidConfig(
                "platforms must contain at least one platform".to_string(),
            ));
        }
        if self.variants.is_empty() {
            return Err(BuildError::InvalidConfig(
                "variants must contain at least one variant".to_string(),
            ));
        }
        if let Some(base) = &self.base
            && base.dockerfile.trim().is_empty()
        {
            return Err(BuildError::InvalidConfig(
                "base.dockerfile must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for variant in &self.variants {
            if variant.dockerfile.trim().is_empty() {
                return Err(BuildError::InvalidConfig(format!(
                    "variant '{}' has an empty dockerfile",
                    variant.label()
                )));
            }
            if !seen.insert(variant.suffix.as_str()) {
                return Err(BuildError::InvalidConfig(format!(
                    "duplicate variant suffix '{}'",
                    variant.suffix
                )));
            }
        }

        for variant in &self.variants {
            validate_repository_name(&format!("{}{}", self.image_name, variant.suffix))?;
        }

        self.validate_order()
    }

    /// 各 variant のコンテキストが、それより前の variant だけを参照していることを確認
    pub fn validate_order(&self) -> Result<()> {
        let mut built: HashSet<&str> = HashSet::new();

        for variant in &self.variants {
            for (context, producer) in &variant.contexts {
                if !built.contains(producer.as_str()) {
                    return Err(BuildError::DependencyOrder {
                        variant: variant.suffix.clone(),
                        context: context.clone(),
                        producer: producer.clone(),
                    });
                }
            }
            built.insert(variant.suffix.as_str());
        }

        Ok(())
    }

    pub fn image_base(&self) -> String {
        format!("{}/{}", self.registry, self.image_name)
    }

    pub fn is_multi_platform(&self) -> bool {
        self.platforms.len() > 1
    }

    pub fn has_base(&self) -> bool {
        self.base.is_some()
    }

    /// ログ用のビルドモード表記
    pub fn mode(&self) -> &'static str {
        if self.has_base() {
            "bake-aware (shared base + build contexts)"
        } else {
            "legacy (direct build per variant)"
        }
    }
}

/// レジストリのリポジトリ名として使えるか検証
///
/// `/` 区切りの各要素は小文字英数字で始まって終わり、間の区切りは
/// `.` `_` `__` または1つ以上の `-` のみ。
pub fn validate_repository_name(name: &str) -> Result<()> {
    if name.split('/').all(is_path_component) {
        Ok(())
    } else {
        Err(BuildError::InvalidConfig(format!(
            "'{}' is not a valid repository name (lowercase letters, digits and . _ - only)",
            name
        )))
    }
}

fn is_path_component(component: &str) -> bool {
    let is_alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    if !component.starts_with(is_alnum) || !component.ends_with(is_alnum) {
        return false;
    }

    let mut separator = String::new();
    for c in component.chars() {
        if is_alnum(c) {
            let valid = matches!(separator.as_str(), "" | "." | "_" | "__")
                || separator.chars().all(|s| s == '-');
            if !valid {
                return false;
            }
            separator.clear();
        } else if matches!(c, '.' | '_' | '-') {
            separator.push(c);
        } else {
            return false;
        }
    }
    true
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(raw: &str) -> Result<BuildConfig> {
        BuildConfig::from_descriptor(raw, "myapp", &Overrides::default(), &HookSettings::default())
    }

    #[test]
    fn test_minimal_descriptor_defaults() {
        let config = load(r#"{"registry": "r.example.com"}"#).unwrap();

        assert_eq!(config.registry, "r.example.com");
        assert_eq!(config.image_name, "myapp");
        assert_eq!(config.platforms, vec!["linux/amd64"]);
        assert!(!config.is_multi_platform());
        assert_eq!(config.work_dir, PathBuf::from("/opt/builds/myapp-checkout"));
        assert_eq!(config.variants, vec![Variant::default()]);
        assert!(!config.has_base());
        assert_eq!(config.image_base(), "r.example.com/myapp");
    }

    #[test]
    fn test_full_descriptor() {
        let config = load(
            r#"{
                "registry": "registry.example.com",
                "image_name": "myorg/myapp",
                "platforms": ["linux/amd64", "linux/arm64"],
                "base": {"dockerfile": "docker/base.dockerfile"},
                "variants": [
                    {"suffix": "", "dockerfile": "Dockerfile", "target": "final"},
                    {"suffix": "-s6", "dockerfile": "Dockerfile", "target": "final-s6"},
                    {"suffix": "-lite", "dockerfile": "docker/variants/lite.dockerfile",
                     "target": "", "contexts": {"main": ""}}
                ]
            }"#,
        )
        .unwrap();

        assert!(config.is_multi_platform());
        assert!(config.has_base());
        assert_eq!(config.variants.len(), 3);
        assert_eq!(config.variants[0].target.as_deref(), Some("final"));
        assert_eq!(config.variants[2].target, None);
        assert_eq!(config.variants[2].contexts.get("main"), Some(&String::new()));
        assert_eq!(config.image_base(), "registry.example.com/myorg/myapp");
    }

    #[test]
    fn test_missing_registry() {
        let err = load(r#"{"image_name": "app"}"#).unwrap_err();
        assert!(matches!(err, BuildError::MissingField("registry")));
        assert!(err.is_config_error());
    }

    #[test]
    fn test_overrides_win() {
        let overrides = Overrides {
            registry: Some("private.example.com".to_string()),
            image_name: Some("team/app".to_string()),
        };
        let config = BuildConfig::from_descriptor(
            r#"{"registry": "public.example.com", "image_name": "app"}"#,
            "myapp",
            &overrides,
            &HookSettings::default(),
        )
        .unwrap();

        assert_eq!(config.image_base(), "private.example.com/team/app");
    }

    #[test]
    fn test_override_supplies_missing_registry() {
        let overrides = Overrides {
            registry: Some("private.example.com".to_string()),
            image_name: None,
        };
        let config =
            BuildConfig::from_descriptor("{}", "myapp", &overrides, &HookSettings::default())
                .unwrap();
        assert_eq!(config.image_base(), "private.example.com/myapp");
    }

    #[test]
    fn test_forward_reference_rejected() {
        let err = load(
            r#"{
                "registry": "r",
                "variants": [
                    {"suffix": "-a", "dockerfile": "A", "contexts": {"x": "-b"}},
                    {"suffix": "-b", "dockerfile": "B"}
                ]
            }"#,
        )
        .unwrap_err();

        match err {
            BuildError::DependencyOrder {
                variant,
                context,
                producer,
            } => {
                assert_eq!(variant, "-a");
                assert_eq!(context, "x");
                assert_eq!(producer, "-b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_reference_rejected() {
        let err = load(
            r#"{"registry": "r", "variants": [{"suffix": "-a", "dockerfile": "A", "contexts": {"x": "-a"}}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::DependencyOrder { .. }));
    }

    #[test]
    fn test_duplicate_suffix_rejected() {
        let err = load(
            r#"{"registry": "r", "variants": [{"dockerfile": "A"}, {"dockerfile": "B"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::InvalidConfig(_)));
    }

    #[test]
    fn test_uppercase_suffix_rejected() {
        let err = load(
            r#"{"registry": "r", "variants": [{"dockerfile": "A"}, {"suffix": "-Lite", "dockerfile": "B"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::InvalidConfig(ref msg) if msg.contains("myapp-Lite")));
        assert!(err.is_config_error());
    }

    #[test]
    fn test_repository_name_rules() {
        for name in ["app", "myorg/my-app", "app__x", "a.b_c", "app--lite", "v2"] {
            assert!(validate_repository_name(name).is_ok(), "{}", name);
        }
        for name in ["App", "app-", "app/", "/app", "a..b", "a._b", "a___b", "app:1", ""] {
            assert!(validate_repository_name(name).is_err(), "{}", name);
        }
    }

    #[test]
    fn test_empty_platforms_rejected() {
        let err = load(r#"{"registry": "r", "platforms": []}"#).unwrap_err();
        assert!(matches!(err, BuildError::InvalidConfig(_)));
    }

    #[test]
    fn test_malformed_json() {
        let err = load("{ not json").unwrap_err();
        assert!(matches!(err, BuildError::DescriptorParse { .. }));
    }

    #[test]
    fn test_relative_work_dir() {
        let config = load(r#"{"registry": "r", "work_dir": "custom"}"#).unwrap();
        assert_eq!(config.work_dir, PathBuf::from("/opt/builds/custom"));
    }

    #[test]
    fn test_variant_label() {
        assert_eq!(Variant::default().label(), "main");
        assert_eq!(Variant::new("-lite", "Dockerfile").label(), "-lite");
    }
}
