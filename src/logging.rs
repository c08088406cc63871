//! 日志初始化
//!
//! 统一使用 tracing + EnvFilter，默认 INFO 级别，`RUST_LOG` 覆盖。

use tracing_subscriber::{filter::LevelFilter, EnvFilter};

/// 初始化全局日志订阅器（进程入口调用一次）
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .init();
}

/// 测试用初始化（重复调用安全）
pub fn try_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .try_init();
}
