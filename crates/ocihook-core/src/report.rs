//! ビルド結果の集計と表示

use colored::Colorize;

/// 1つの variant（または base / 設定 / checkout 段階）の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub variant: String,
    pub tags: Vec<String>,
    pub success: bool,
    pub error: Option<String>,
}

impl BuildResult {
    pub fn ok(variant: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            variant: variant.into(),
            tags,
            success: true,
            error: None,
        }
    }

    pub fn failed(variant: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            variant: variant.into(),
            tags: Vec::new(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// フック1回分の結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookReport {
    pub results: Vec<BuildResult>,
}

impl HookReport {
    pub fn extend(&mut self, results: impl IntoIterator<Item = BuildResult>) {
        self.results.extend(results);
    }

    /// 失敗が1つも無ければ成功（何もビルドしなかった場合も成功）
    pub fn success(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// variant ごとの状態表を組み立てる
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.results.len() + 2);
        lines.push("─".repeat(50));

        for r in &self.results {
            let status = if r.success {
                format!("{} ok", "✓".green())
            } else {
                format!(
                    "{} FAILED: {}",
                    "✗".red().bold(),
                    r.error.as_deref().unwrap_or("unknown error")
                )
            };
            lines.push(format!("  {:<8} {}", r.variant, status));
        }

        lines.push(format!(
            "Done ({}/{} succeeded)",
            self.succeeded(),
            self.results.len()
        ));
        lines
    }

    pub fn print_summary(&self) {
        if self.is_empty() {
            return;
        }
        println!();
        for line in self.summary_lines() {
            println!("{}", line);
        }
    }
}
