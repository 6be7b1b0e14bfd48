//! ref 更新行の解析とイメージタグの算出
//!
//! post-receive フックは stdin から `<old-sha> <new-sha> <refname>` を1行ずつ受け取ります。
//! 1行が1つの [`PushRef`] になり、そこから公開するタグの集合を決めます。

use crate::error::{BuildError, Result};
use std::str::FromStr;

/// 短縮 SHA の桁数
pub const SHORT_SHA_LEN: usize = 7;

/// リリースタグの接頭辞
pub const VERSION_PREFIX: &str = "v";

/// リリース候補タグの目印
pub const RC_MARKER: &str = "-rc";

const HEADS_PREFIX: &str = "refs/heads/";
const TAGS_PREFIX: &str = "refs/tags/";

/// Docker タグの最大長
const MAX_TAG_LEN: usize = 128;

/// post-receive が受け取った1件の ref 更新
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRef {
    pub old_rev: String,
    pub new_rev: String,
    pub refname: String,
}

impl FromStr for PushRef {
    type Err = BuildError;

    fn from_str(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let [old_rev, new_rev, refname] = parts.as_slice() else {
            return Err(BuildError::InvalidRef(format!(
                "expected 3 fields, got {}: {:?}",
                parts.len(),
                line.trim()
            )));
        };

        for rev in [old_rev, new_rev] {
            if !is_object_id(rev) {
                return Err(BuildError::InvalidRef(format!(
                    "not an object id: {}",
                    rev
                )));
            }
        }

        Ok(Self {
            old_rev: old_rev.to_string(),
            new_rev: new_rev.to_string(),
            refname: refname.to_string(),
        })
    }
}

/// SHA-1 (40桁) と SHA-256 (64桁) のオブジェクト ID を受け付ける
fn is_object_id(rev: &str) -> bool {
    matches!(rev.len(), 40 | 64) && rev.chars().all(|c| c.is_ascii_hexdigit())
}

impl PushRef {
    pub fn new(
        old_rev: impl Into<String>,
        new_rev: impl Into<String>,
        refname: impl Into<String>,
    ) -> Self {
        Self {
            old_rev: old_rev.into(),
            new_rev: new_rev.into(),
            refname: refname.into(),
        }
    }

    pub fn short_sha(&self) -> &str {
        let end = self.new_rev.len().min(SHORT_SHA_LEN);
        &self.new_rev[..end]
    }

    /// new-sha が全桁ゼロなら ref の削除
    pub fn is_delete(&self) -> bool {
        !self.new_rev.is_empty() && self.new_rev.chars().all(|c| c == '0')
    }

    pub fn is_tag(&self) -> bool {
        self.refname.starts_with(TAGS_PREFIX)
    }

    /// タグ名（タグ push でなければ None）
    pub fn tag(&self) -> Option<&str> {
        self.refname.strip_prefix(TAGS_PREFIX)
    }

    /// リリースタグ: `v` で始まり、`-rc` を含まない
    ///
    /// RC 判定より先に評価すること。
    pub fn is_release(&self) -> bool {
        self.tag()
            .is_some_and(|t| t.starts_with(VERSION_PREFIX) && !t.contains(RC_MARKER))
    }

    pub fn is_rc(&self) -> bool {
        self.tag().is_some_and(|t| t.contains(RC_MARKER))
    }

    /// ブランチ名（タグとして使える形にサニタイズ済み）
    ///
    /// バージョン以外のタグ push の場合はタグ名を同じ扱いにする。
    pub fn branch(&self) -> String {
        let short = self
            .refname
            .strip_prefix(HEADS_PREFIX)
            .or_else(|| self.tag())
            .unwrap_or(&self.refname);
        sanitize_tag(short)
    }

    /// 公開するタグ名（イメージ名を含まない部分）
    ///
    /// - リリース (v1.0.0)       → {sha}, {version}, latest
    /// - RC (v1.0.0-rc1)         → {sha}, {version}, next
    /// - ブランチ push           → {sha}, {branch}, edge
    ///
    /// バージョン名はそのまま使うので、タグとして不正な文字を含むことがある。
    pub fn tag_names(&self) -> Vec<String> {
        let mut names = vec![self.short_sha().to_string()];

        if self.is_release() || self.is_rc() {
            let channel = if self.is_release() { "latest" } else { "next" };
            names.push(self.tag().unwrap_or_default().to_string());
            names.push(channel.to_string());
        } else {
            names.push(self.branch());
            names.push("edge".to_string());
        }

        names
    }

    /// 公開するイメージタグを算出
    ///
    /// 先頭のタグはマルチプラットフォームビルドの manifest 名になる。
    pub fn image_tags(&self, image_base: &str, suffix: &str) -> Vec<String> {
        let full_base = format!("{}{}", image_base, suffix);
        self.tag_names()
            .iter()
            .map(|name| format!("{}:{}", full_base, name))
            .collect()
    }
}

/// ブランチ名などをタグとして使える文字列に変換
///
/// `/` を含む使えない文字は `-` に置き換え、先頭の `.` `-` は除去する。
pub fn sanitize_tag(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();

    let trimmed = replaced.trim_start_matches(['.', '-']);
    trimmed.chars().take(MAX_TAG_LEN).collect()
}

/// タグのバリデーション
pub fn validate_tag(tag: &str) -> Result<()> {
    // Docker タグの制約:
    // - 128文字以下
    // - 英数字、ピリオド、ハイフン、アンダースコアのみ
    // - 先頭はピリオドまたはハイフンではない

    if tag.is_empty() {
        return Err(BuildError::InvalidTag("(empty)".to_string()));
    }

    if tag.len() > MAX_TAG_LEN {
        return Err(BuildError::InvalidTag(format!(
            "Tag too long ({} characters, max {})",
            tag.len(),
            MAX_TAG_LEN
        )));
    }

    if tag.starts_with('.') || tag.starts_with('-') {
        return Err(BuildError::InvalidTag(tag.to_string()));
    }

    if let Some(c) = tag
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '.' && *c != '-' && *c != '_')
    {
        return Err(BuildError::InvalidTag(format!(
            "Invalid character '{}' in tag: {}",
            c, tag
        )));
    }

    Ok(())
}
