//! 服务端配置

use std::time::Duration;

use clap::Parser;
use protocol::{DEFAULT_PORT, MAX_CONNECTIONS, WRITE_TIMEOUT, WRITE_TIMEOUT_SECS};

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "relay-server", version, about = "TCP text message relay server")]
pub struct Args {
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// 监听端口
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// 最大同时连接数
    #[arg(long, default_value_t = MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// 空闲超时（秒），不设置则不限
    #[arg(long, value_name = "SECS")]
    pub idle_timeout: Option<u64>,

    /// 向单个会话写入一帧的超时（秒）
    #[arg(long, value_name = "SECS", default_value_t = WRITE_TIMEOUT_SECS)]
    pub write_timeout: u64,

    /// 输出 debug 日志
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            addr: format!("{}:{}", self.host, self.port),
            max_connections: self.max_connections,
            idle_timeout: self.idle_timeout.map(Duration::from_secs),
            write_timeout: Duration::from_secs(self.write_timeout),
        }
    }
}

/// 服务端运行配置
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// 监听地址，格式为 "host:port"
    pub addr: String,
    pub max_connections: usize,
    pub idle_timeout: Option<Duration>,
    /// 对端不读时，一次投递最多等待的时间
    pub write_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: format!("127.0.0.1:{}", DEFAULT_PORT),
            max_connections: MAX_CONNECTIONS,
            idle_timeout: None,
            write_timeout: WRITE_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["relay-server"]).unwrap();
        let config = args.server_config();
        assert_eq!(config.addr, "127.0.0.1:5222");
        assert_eq!(config.max_connections, MAX_CONNECTIONS);
        assert!(config.idle_timeout.is_none());
        assert_eq!(config.write_timeout, WRITE_TIMEOUT);
        assert!(!args.verbose);
    }

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "relay-server",
            "--host",
            "0.0.0.0",
            "-p",
            "6000",
            "--idle-timeout",
            "30",
            "--write-timeout",
            "3",
            "-v",
        ])
        .unwrap();
        let config = args.server_config();
        assert_eq!(config.addr, "0.0.0.0:6000");
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.write_timeout, Duration::from_secs(3));
        assert!(args.verbose);
    }
}
