//! post-receive フック本体
//!
//! stdin の ref 更新を1行ずつ処理し、結果を [`HookReport`] に集約します。
//! ある ref が失敗しても、後続の ref は処理を続けます。

use crate::checkout::Checkout;
use crate::config::BuildConfig;
use crate::engine::ContainerEngine;
use crate::error::BuildError;
use crate::orchestrator::Orchestrator;
use crate::push_ref::PushRef;
use crate::report::{BuildResult, HookReport};
use crate::repository::Repository;
use crate::settings::HookSettings;
use std::sync::Arc;

/// 設定読み込み段階の失敗に付けるラベル
pub const CONFIG_LABEL: &str = "config";

/// 展開段階の失敗に付けるラベル
pub const CHECKOUT_LABEL: &str = "checkout";

/// 定義ファイルを読めなかったときのラベル
pub const REPOSITORY_LABEL: &str = "repository";

pub struct Hook {
    repo: Arc<dyn Repository>,
    orchestrator: Orchestrator,
    settings: HookSettings,
}

impl Hook {
    pub fn new(
        repo: Arc<dyn Repository>,
        engine: Arc<dyn ContainerEngine>,
        settings: HookSettings,
    ) -> Self {
        Self {
            repo,
            orchestrator: Orchestrator::new(engine),
            settings,
        }
    }

    /// stdin の内容をすべて処理する
    pub async fn run(&self, input: &str) -> HookReport {
        let mut report = HookReport::default();

        for line in input.lines().filter(|l| !l.trim().is_empty()) {
            let push: PushRef = match line.parse() {
                Ok(push) => push,
                Err(e) => {
                    tracing::warn!("Skipping line: {}", e);
                    continue;
                }
            };

            report.extend(self.process_ref(&push).await);
        }

        report
    }

    /// 1つの ref 更新を処理する
    pub async fn process_ref(&self, push: &PushRef) -> Vec<BuildResult> {
        if push.is_delete() {
            tracing::debug!("Skipping deletion of {}", push.refname);
            return Vec::new();
        }

        let config = match BuildConfig::load(self.repo.as_ref(), &push.new_rev, &self.settings).await
        {
            Ok(Some(config)) => config,
            Ok(None) => {
                tracing::info!("No {}, skipping...", self.settings.descriptor);
                return Vec::new();
            }
            Err(e) => return failure(REPOSITORY_LABEL, e),
        };

        tracing::info!("Push received: {} ({})", push.refname, push.short_sha());
        tracing::info!("Registry: {}  Image: {}", config.registry, config.image_name);
        tracing::info!("Mode: {}", config.mode());

        let checkout = match Checkout::prepare(self.repo.as_ref(), push, &config.work_dir).await {
            Ok(checkout) => checkout,
            Err(e) => return failure(CHECKOUT_LABEL, e),
        };

        match self.orchestrator.run(&config, push, &checkout).await {
            Ok(results) => results,
            Err(e) => failure(CONFIG_LABEL, e),
        }
    }
}

/// 失敗した段階の結果（設定不備なら段階にかかわらず config 扱い）
fn failure(stage: &'static str, e: BuildError) -> Vec<BuildResult> {
    tracing::error!("{}", e.user_message());
    let label = if e.is_config_error() { CONFIG_LABEL } else { stage };
    vec![BuildResult::failed(label, e.to_string())]
}
