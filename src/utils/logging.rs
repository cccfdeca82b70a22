use std::env;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 日志配置
pub struct LoggingConfig;

impl LoggingConfig {
    /// 初始化日志系统
    ///
    /// 支持通过环境变量配置：
    /// - RUST_LOG: 设置日志级别（error, warn, info, debug, trace）
    /// - MAESTRO_DEBUG: 启用详细调试输出
    pub fn init() {
        let is_debug = env::var("MAESTRO_DEBUG").is_ok();

        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => {
                if is_debug {
                    EnvFilter::new("maestro=debug,info")
                } else {
                    EnvFilter::new("maestro=info,warn")
                }
            }
        };

        let fmt_layer = if is_debug {
            fmt::layer().with_target(true).with_file(true).boxed()
        } else {
            fmt::layer().with_target(false).boxed()
        };

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init();
    }
}
