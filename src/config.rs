//! 配置加载模块
//!
//! 配置来源优先级：环境变量（`CONCEPT_BANK` 前缀）覆盖 TOML 文件，
//! `.env` 文件在加载前注入环境。所有字段均有默认值，配置缺失不报错。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// 数据目录（数据库文件所在目录）
    pub data_dir: PathBuf,
    /// 连接池最大连接数
    pub pool_max_size: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            pool_max_size: 15,
        }
    }
}

impl Settings {
    /// 从环境变量与配置文件加载配置
    ///
    /// 环境变量形如 `CONCEPT_BANK__DATA_DIR`；配置文件为
    /// `config/concept_bank.toml`（可选）。
    pub fn from_env_and_file() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut builder = config::Config::builder().add_source(
            config::Environment::with_prefix("CONCEPT_BANK").separator("__"),
        );
        if std::path::Path::new("config/concept_bank.toml").exists() {
            builder = builder.add_source(config::File::with_name("config/concept_bank"));
        }
        let loaded = builder.build()?;

        let mut settings = Settings::default();
        if let Ok(val) = loaded.try_deserialize::<serde_json::Value>() {
            settings = serde_json::from_value::<Settings>(val).unwrap_or(settings);
        }
        Ok(settings)
    }
}
