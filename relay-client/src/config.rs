//! 客户端配置

use std::time::Duration;

use clap::Parser;
use protocol::{TransportConfig, CONNECT_TIMEOUT_SECS, DEFAULT_PORT};

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "relay-client", version, about = "TCP text message relay client")]
pub struct Args {
    /// 服务器地址
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// 服务器端口
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// 登录用户名
    #[arg(short, long)]
    pub username: String,

    /// 连接超时（秒）
    #[arg(long, value_name = "SECS", default_value_t = CONNECT_TIMEOUT_SECS)]
    pub connect_timeout: u64,

    /// 输出 debug 日志
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout),
            nodelay: true,
        }
    }
}
