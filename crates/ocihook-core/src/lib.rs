//! ocihook: git push で OCI イメージをビルド・公開するパイプライン
//!
//! post-receive フックとして動き、push されたリビジョンの `.oci-build.json` に
//! 従って共有ベースイメージと各 variant をビルドし、レジストリへ push します。
//! コンテナエンジンとソース管理は trait 越しに扱うため、テストでは
//! [`fakes`] の実装に差し替えられます。

pub mod checkout;
pub mod config;
pub mod engine;
pub mod error;
pub mod fakes;
pub mod hook;
pub mod orchestrator;
pub mod push_ref;
pub mod report;
pub mod repository;
pub mod settings;

pub use checkout::{Checkout, read_build_args};
pub use config::{BaseSpec, BuildConfig, Overrides, Variant};
pub use engine::{BuildRequest, ContainerEngine, PodmanEngine};
pub use error::{BuildError, Result};
pub use hook::Hook;
pub use orchestrator::{Orchestrator, resolve_contexts};
pub use push_ref::{PushRef, sanitize_tag, validate_tag};
pub use report::{BuildResult, HookReport};
pub use repository::{GitRepository, Repository};
pub use settings::HookSettings;
