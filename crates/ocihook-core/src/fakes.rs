//! テスト用のリポジトリとエンジン
//!
//! [`MemoryRepository`] は git を使わずにファイルツリーを返し、
//! [`RecordingEngine`] はコンテナエンジンを呼ばずに呼び出しを記録します。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::engine::{BuildRequest, ContainerEngine};
use crate::error::{BuildError, Result};
use crate::repository::Repository;

/// メモリ上のリポジトリ（リビジョン -> パス -> 内容）
#[derive(Debug, Default)]
pub struct MemoryRepository {
    name: String,
    trees: HashMap<String, BTreeMap<String, Vec<u8>>>,
    options: HashMap<String, String>,
    exports: Mutex<Vec<String>>,
}

impl MemoryRepository {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_file(
        mut self,
        rev: impl Into<String>,
        path: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        self.trees
            .entry(rev.into())
            .or_default()
            .insert(path.into(), content.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// これまでに展開したリビジョン（呼び出し順）
    pub fn exports(&self) -> Vec<String> {
        self.exports.lock().unwrap().clone()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(&self, rev: &str) -> Result<String> {
        if self.trees.contains_key(rev) {
            Ok(rev.to_string())
        } else {
            Err(BuildError::InvalidRef(format!("unknown revision: {}", rev)))
        }
    }

    async fn read_file(&self, rev: &str, path: &str) -> Result<Option<String>> {
        Ok(self
            .trees
            .get(rev)
            .and_then(|tree| tree.get(path))
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
    }

    async fn option(&self, key: &str) -> Result<Option<String>> {
        Ok(self.options.get(key).filter(|v| !v.is_empty()).cloned())
    }

    async fn export(&self, rev: &str, dest: &Path) -> Result<()> {
        let tree = self
            .trees
            .get(rev)
            .ok_or_else(|| BuildError::Checkout(format!("unknown revision {}", rev)))?;

        for (path, content) in tree {
            let target = dest.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, content)?;
        }

        self.exports.lock().unwrap().push(rev.to_string());
        Ok(())
    }
}

/// 記録したエンジン呼び出し
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    BuildLocal {
        request: BuildRequest,
        platform: String,
    },
    BuildSingle {
        request: BuildRequest,
        platform: String,
    },
    BuildMulti {
        request: BuildRequest,
        platforms: Vec<String>,
    },
    Remove {
        name: String,
    },
}

impl EngineCall {
    pub fn request(&self) -> Option<&BuildRequest> {
        match self {
            EngineCall::BuildLocal { request, .. }
            | EngineCall::BuildSingle { request, .. }
            | EngineCall::BuildMulti { request, .. } => Some(request),
            EngineCall::Remove { .. } => None,
        }
    }
}

/// 呼び出しを記録するエンジン
///
/// dockerfile か target が失敗対象に含まれるビルドは失敗する。
#[derive(Debug, Default)]
pub struct RecordingEngine {
    calls: Mutex<Vec<EngineCall>>,
    failing: HashSet<String>,
    fail_removals: bool,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// dockerfile か target が `name` のビルドを失敗させる
    pub fn failing_on(mut self, name: impl Into<String>) -> Self {
        self.failing.insert(name.into());
        self
    }

    pub fn failing_removals(mut self) -> Self {
        self.fail_removals = true;
        self
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    /// push したタグ（push 順）
    pub fn pushed_tags(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::BuildSingle { request, .. } | EngineCall::BuildMulti { request, .. } => {
                    Some(request.tags)
                }
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn removed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::Remove { name } => Some(name),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: EngineCall) -> Result<()> {
        let fails = call.request().is_some_and(|request| {
            self.failing.contains(&request.dockerfile)
                || request
                    .target
                    .as_ref()
                    .is_some_and(|t| self.failing.contains(t))
        });
        let command = format!("{:?}", call);
        self.calls.lock().unwrap().push(call);

        if fails {
            return Err(BuildError::CommandFailed {
                command,
                status: "exit status: 1".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerEngine for RecordingEngine {
    async fn build_local(&self, request: &BuildRequest, platform: &str) -> Result<()> {
        self.record(EngineCall::BuildLocal {
            request: request.clone(),
            platform: platform.to_string(),
        })
    }

    async fn build_single_platform(&self, request: &BuildRequest, platform: &str) -> Result<()> {
        self.record(EngineCall::BuildSingle {
            request: request.clone(),
            platform: platform.to_string(),
        })
    }

    async fn build_multi_platform(
        &self,
        request: &BuildRequest,
        platforms: &[String],
    ) -> Result<()> {
        self.record(EngineCall::BuildMulti {
            request: request.clone(),
            platforms: platforms.to_vec(),
        })
    }

    async fn remove_image(&self, name: &str) -> Result<()> {
        self.calls.lock().unwrap().push(EngineCall::Remove {
            name: name.to_string(),
        });

        if self.fail_removals {
            return Err(BuildError::CommandFailed {
                command: format!("rmi {}", name),
                status: "exit status: 1".to_string(),
            });
        }
        Ok(())
    }
}
