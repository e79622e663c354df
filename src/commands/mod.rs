// ============================================================================
// Commands 层：命令行入口调用的薄封装
// ✅ 只能做：加载配置、组装外部协作者、调用 services
// ⛔ 禁止：实现业务逻辑
// ============================================================================

pub mod extension;
pub mod project;

use std::sync::Arc;

use crate::extension::catalogue::HttpVersionCatalogue;
use crate::services::asset_builder::BuildCollaborators;
use crate::services::bundler::EsbuildBundler;
use crate::utils::process::{ProcessRunner, SystemRunner};

/// 真实环境下的外部工具集合
pub struct Toolchain {
    runner: Arc<dyn ProcessRunner>,
    bundler: EsbuildBundler,
    catalogue: HttpVersionCatalogue,
}

impl Toolchain {
    /// 本机进程 + esbuild + 环境变量指定的版本目录
    pub fn system() -> Self {
        let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner::new());
        Toolchain {
            bundler: EsbuildBundler::new(Arc::clone(&runner)),
            runner,
            catalogue: HttpVersionCatalogue::from_env(),
        }
    }

    pub fn collaborators(&self) -> BuildCollaborators<'_> {
        BuildCollaborators {
            runner: self.runner.as_ref(),
            bundler: &self.bundler,
            catalogue: &self.catalogue,
        }
    }
}
