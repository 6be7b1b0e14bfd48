use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Failed to parse {file}: {source}")]
    DescriptorParse {
        file: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Missing required field in build descriptor: {0}")]
    MissingField(&'static str),

    #[error("Invalid build configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "Variant '{variant}' depends on context '{context}' (suffix '{producer}') which hasn't been built yet"
    )]
    DependencyOrder {
        variant: String,
        context: String,
        producer: String,
    },

    #[error("Invalid image tag: {0}")]
    InvalidTag(String),

    #[error("Invalid ref update line: {0}")]
    InvalidRef(String),

    #[error("Command failed ({status}): {command}")]
    CommandFailed { command: String, status: String },

    #[error("Failed to run {program}: {source}")]
    CommandSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkout failed: {0}")]
    Checkout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BuildError {
    /// 設定不備に起因するエラーかどうか（リトライしても直らない）
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            BuildError::DescriptorParse { .. }
                | BuildError::MissingField(_)
                | BuildError::InvalidConfig(_)
                | BuildError::DependencyOrder { .. }
                | BuildError::InvalidTag(_)
        )
    }

    /// push した人に見せる分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::DependencyOrder { variant, .. } => {
                format!(
                    "{}\n\
                     \n\
                     解決方法:\n\
                     1. .oci-build.json の variants の並び順を確認してください\n\
                     2. variant '{}' が参照する variant をそれより前に宣言してください",
                    self, variant
                )
            }
            BuildError::MissingField(field) => {
                format!(
                    "{}\n\
                     \n\
                     .oci-build.json に \"{}\" を追加するか、\n\
                     リポジトリ側のオプションで指定してください。",
                    self, field
                )
            }
            BuildError::DescriptorParse { file, .. } => {
                format!("{}\n\n{} の JSON 構文を確認してください。", self, file)
            }
            BuildError::CommandFailed { .. } => {
                format!(
                    "{}\n\
                     \n\
                     上に出力されたビルドログを確認してください。",
                    self
                )
            }
            _ => format!("{}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
