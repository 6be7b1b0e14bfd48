//! ベースイメージと variant のビルド順序制御
//!
//! 1つの ref について次の順で処理します。
//!
//! 1. 計画: コンテキストの参照順とタグを検証（ここで失敗したら何もビルドしない）
//! 2. ベース: 設定されていればローカルにだけビルド
//! 3. variant: 宣言順にビルドして push。失敗したら残りは打ち切り
//! 4. 後始末: ベースをビルドしていれば、結果にかかわらず削除

use crate::checkout::Checkout;
use crate::config::{BuildConfig, Variant};
use crate::engine::{BuildRequest, ContainerEngine};
use crate::error::{BuildError, Result};
use crate::push_ref::{PushRef, validate_tag};
use crate::report::BuildResult;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// ベースイメージを注入するコンテキスト名
pub const BASE_CONTEXT: &str = "base";

/// 結果表でのベースイメージのラベル
pub const BASE_LABEL: &str = "base";

/// variant ごとのビルド計画
#[derive(Debug, Clone)]
struct VariantPlan<'a> {
    variant: &'a Variant,
    tags: Vec<String>,
}

pub struct Orchestrator {
    engine: Arc<dyn ContainerEngine>,
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    /// ローカル専用ベースイメージの名前
    ///
    /// 別リポジトリで短縮 SHA が衝突しないよう、イメージ名も含める。
    pub fn base_image_name(config: &BuildConfig, push: &PushRef) -> String {
        format!("localhost/{}-base:{}", config.image_name, push.short_sha())
    }

    /// 1つの ref についてベースと全 variant をビルドする
    ///
    /// 設定不備は `Err` で返し、その場合エンジンは一度も呼ばれない。
    /// ビルド失敗は失敗の [`BuildResult`] として返す。
    pub async fn run(
        &self,
        config: &BuildConfig,
        push: &PushRef,
        checkout: &Checkout,
    ) -> Result<Vec<BuildResult>> {
        let plan = Self::plan(config, push)?;

        let mut results = Vec::new();

        let base_image = match &config.base {
            Some(base) => {
                let name = Self::base_image_name(config, push);
                tracing::info!("Building base image ({})", base.dockerfile);

                let request = BuildRequest {
                    dockerfile: base.dockerfile.clone(),
                    context_dir: checkout.dir.clone(),
                    target: None,
                    tags: vec![name.clone()],
                    build_args: checkout.build_args.clone(),
                    contexts: BTreeMap::new(),
                };

                if let Err(e) = self.engine.build_local(&request, &config.platforms[0]).await {
                    tracing::error!("Base build failed: {}", e);
                    results.push(BuildResult::failed(BASE_LABEL, e.to_string()));
                    return Ok(results);
                }

                tracing::info!("  Base image: {}", name);
                Some(name)
            }
            None => None,
        };

        self.build_variants(config, checkout, &plan, base_image.as_deref(), &mut results)
            .await;

        if let Some(name) = &base_image {
            self.remove_base(name).await;
        }

        Ok(results)
    }

    /// 参照順とタグを検証してビルド計画を作る
    fn plan<'a>(config: &'a BuildConfig, push: &PushRef) -> Result<Vec<VariantPlan<'a>>> {
        config.validate()?;

        // タグ名は全 variant で共通
        for name in push.tag_names() {
            validate_tag(&name)?;
        }

        let image_base = config.image_base();
        Ok(config
            .variants
            .iter()
            .map(|variant| VariantPlan {
                variant,
                tags: push.image_tags(&image_base, &variant.suffix),
            })
            .collect())
    }

    /// 宣言順に variant をビルド（最初の失敗で打ち切り）
    async fn build_variants(
        &self,
        config: &BuildConfig,
        checkout: &Checkout,
        plan: &[VariantPlan<'_>],
        base_image: Option<&str>,
        results: &mut Vec<BuildResult>,
    ) {
        // サフィックス -> 最初に公開したタグ
        let mut built_images: HashMap<String, String> = HashMap::new();

        for VariantPlan { variant, tags } in plan {
            let label = variant.label();

            let contexts = match resolve_contexts(variant, base_image, &built_images) {
                Ok(contexts) => contexts,
                Err(e) => {
                    tracing::error!("{}", e);
                    results.push(BuildResult::failed(label, e.to_string()));
                    return;
                }
            };

            let request = BuildRequest {
                dockerfile: variant.dockerfile.clone(),
                context_dir: checkout.dir.clone(),
                target: variant.target.clone(),
                tags: tags.clone(),
                build_args: checkout.build_args.clone(),
                contexts,
            };

            tracing::info!("Building {} ({} tags)", label, tags.len());

            let outcome = if config.is_multi_platform() {
                self.engine
                    .build_multi_platform(&request, &config.platforms)
                    .await
            } else {
                self.engine
                    .build_single_platform(&request, &config.platforms[0])
                    .await
            };

            match outcome {
                Ok(()) => {
                    tracing::info!("  Pushed: {}", tags.join(", "));
                    built_images.insert(variant.suffix.clone(), tags[0].clone());
                    results.push(BuildResult::ok(label, tags.clone()));
                }
                Err(e) => {
                    tracing::error!("Build failed for {}: {}", label, e);
                    results.push(BuildResult::failed(label, e.to_string()));
                    return;
                }
            }
        }
    }

    /// ベースイメージの削除（失敗しても警告のみ）
    async fn remove_base(&self, name: &str) {
        if let Err(e) = self.engine.remove_image(name).await {
            tracing::warn!("Failed to remove base image {}: {}", name, e);
        }
    }
}

/// variant に渡すビルドコンテキストを解決
///
/// ベースがあれば `base` として全 variant に注入し、宣言されたコンテキストは
/// 既にビルドした variant の先頭タグに解決する。同名の宣言はベースより優先。
pub fn resolve_contexts(
    variant: &Variant,
    base_image: Option<&str>,
    built_images: &HashMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let mut contexts = BTreeMap::new();

    if let Some(base) = base_image {
        contexts.insert(BASE_CONTEXT.to_string(), base.to_string());
    }

    for (context, producer) in &variant.contexts {
        let image = built_images
            .get(producer)
            .ok_or_else(|| BuildError::DependencyOrder {
                variant: variant.suffix.clone(),
                context: context.clone(),
                producer: producer.clone(),
            })?;
        contexts.insert(context.clone(), image.clone());
    }

    Ok(contexts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{EngineCall, RecordingEngine};
    use std::path::PathBuf;

    const SHA: &str = "abc1234def5678abc1234def5678abc1234def56";

    fn config(variants: Vec<Variant>) -> BuildConfig {
        BuildConfig {
            registry: "r.example.com".to_string(),
            image_name: "app".to_string(),
            platforms: vec!["linux/amd64".to_string()],
            work_dir: PathBuf::from("/tmp/app-checkout"),
            variants,
            base: None,
        }
    }

    fn checkout() -> Checkout {
        Checkout {
            dir: PathBuf::from("/tmp/app-checkout"),
            build_args: BTreeMap::from([("COMMIT_HASH".to_string(), "abc1234".to_string())]),
        }
    }

    fn push() -> PushRef {
        PushRef::new("0".repeat(40), SHA, "refs/heads/main")
    }

    #[test]
    fn test_resolve_contexts_injects_base() {
        let variant = Variant::new("-lite", "lite.dockerfile").with_context("main", "");
        let built = HashMap::from([("".to_string(), "r/app:abc1234".to_string())]);

        let contexts = resolve_contexts(&variant, Some("localhost/app-base:abc1234"), &built).unwrap();
        assert_eq!(contexts["base"], "localhost/app-base:abc1234");
        assert_eq!(contexts["main"], "r/app:abc1234");
    }

    #[test]
    fn test_resolve_contexts_missing_producer() {
        let variant = Variant::new("-lite", "lite.dockerfile").with_context("main", "");
        let err = resolve_contexts(&variant, None, &HashMap::new()).unwrap_err();
        assert!(matches!(err, BuildError::DependencyOrder { .. }));
    }

    #[test]
    fn test_resolve_contexts_empty() {
        let contexts = resolve_contexts(&Variant::default(), None, &HashMap::new()).unwrap();
        assert!(contexts.is_empty());
    }

    #[test]
    fn test_base_image_name() {
        assert_eq!(
            Orchestrator::base_image_name(&config(vec![]), &push()),
            "localhost/app-base:abc1234"
        );
    }

    #[tokio::test]
    async fn test_dependent_variant_gets_producer_tag() {
        let engine = Arc::new(RecordingEngine::new());
        let orchestrator = Orchestrator::new(engine.clone());
        let config = config(vec![
            Variant::new("-a", "A.dockerfile"),
            Variant::new("-b", "B.dockerfile").with_context("x", "-a"),
        ]);

        let results = orchestrator.run(&config, &push(), &checkout()).await.unwrap();
        assert!(results.iter().all(|r| r.success));

        let calls = engine.calls();
        assert_eq!(calls.len(), 2);
        let first = calls[0].request().unwrap();
        let second = calls[1].request().unwrap();
        assert_eq!(first.dockerfile, "A.dockerfile");
        assert_eq!(second.dockerfile, "B.dockerfile");
        assert_eq!(second.contexts["x"], first.tags[0]);
        assert_eq!(second.contexts["x"], "r.example.com/app-a:abc1234");
    }

    #[tokio::test]
    async fn test_forward_reference_builds_nothing() {
        let engine = Arc::new(RecordingEngine::new());
        let orchestrator = Orchestrator::new(engine.clone());
        let config = config(vec![
            Variant::new("-a", "A.dockerfile").with_context("x", "-b"),
            Variant::new("-b", "B.dockerfile"),
        ]);

        let err = orchestrator.run(&config, &push(), &checkout()).await.unwrap_err();
        assert!(err.is_config_error());
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_tag_name_builds_nothing() {
        let engine = Arc::new(RecordingEngine::new());
        let orchestrator = Orchestrator::new(engine.clone());
        let mut config = config(vec![Variant::default()]);
        config.base = Some(crate::config::BaseSpec {
            dockerfile: "base.dockerfile".to_string(),
        });
        let push = PushRef::new("0".repeat(40), SHA, "refs/tags/v1.0/hotfix");

        let err = orchestrator.run(&config, &push, &checkout()).await.unwrap_err();

        assert!(matches!(err, BuildError::InvalidTag(_)));
        assert!(err.is_config_error());
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_base_removed_once_after_variant_failure() {
        let engine = Arc::new(RecordingEngine::new().failing_on("Dockerfile"));
        let orchestrator = Orchestrator::new(engine.clone());
        let mut config = config(vec![
            Variant::default(),
            Variant::new("-lite", "lite.dockerfile"),
        ]);
        config.base = Some(crate::config::BaseSpec {
            dockerfile: "base.dockerfile".to_string(),
        });

        let results = orchestrator.run(&config, &push(), &checkout()).await.unwrap();

        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].variant, "main");
        assert_eq!(engine.removed(), vec!["localhost/app-base:abc1234"]);

        // -lite はビルドされない
        let built: Vec<String> = engine
            .calls()
            .iter()
            .filter_map(|c| c.request().map(|r| r.dockerfile.clone()))
            .collect();
        assert_eq!(built, vec!["base.dockerfile", "Dockerfile"]);
    }

    #[tokio::test]
    async fn test_base_failure_skips_variants_and_cleanup() {
        let engine = Arc::new(RecordingEngine::new().failing_on("base.dockerfile"));
        let orchestrator = Orchestrator::new(engine.clone());
        let mut config = config(vec![Variant::default()]);
        config.base = Some(crate::config::BaseSpec {
            dockerfile: "base.dockerfile".to_string(),
        });

        let results = orchestrator.run(&config, &push(), &checkout()).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].variant, BASE_LABEL);
        assert!(!results[0].success);
        assert_eq!(engine.calls().len(), 1);
        assert!(engine.removed().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_failure_is_not_a_build_failure() {
        let engine = Arc::new(RecordingEngine::new().failing_removals());
        let orchestrator = Orchestrator::new(engine.clone());
        let mut config = config(vec![Variant::default()]);
        config.base = Some(crate::config::BaseSpec {
            dockerfile: "base.dockerfile".to_string(),
        });

        let results = orchestrator.run(&config, &push(), &checkout()).await.unwrap();

        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(engine.removed().len(), 1);
    }

    #[tokio::test]
    async fn test_multi_platform_uses_manifest_build() {
        let engine = Arc::new(RecordingEngine::new());
        let orchestrator = Orchestrator::new(engine.clone());
        let mut config = config(vec![Variant::default()]);
        config.platforms = vec!["linux/amd64".to_string(), "linux/arm64".to_string()];

        orchestrator.run(&config, &push(), &checkout()).await.unwrap();

        match &engine.calls()[0] {
            EngineCall::BuildMulti { request, platforms } => {
                assert_eq!(platforms.len(), 2);
                assert_eq!(request.tags[0], "r.example.com/app:abc1234");
            }
            other => panic!("unexpected call: {:?}", other),
        }
    }
}
