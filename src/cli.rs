/// 命令行参数定义
use clap::Parser;

/// lan-tunnel 客户端命令行参数
///
/// 未显式给出的参数不覆盖配置文件，缺省值在合并阶段统一补齐
#[derive(Parser, Debug)]
#[command(
    name = "lan-tunnel",
    version,
    about = "Expose a local server behind a NAT or firewall to the internet"
)]
pub struct Cli {
    /// Client key
    #[arg(short = 'k', long = "key")]
    pub key: Option<String>,

    /// Relay server host
    #[arg(short = 's', long = "server")]
    pub server: Option<String>,

    /// Relay server port
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Data channel pool capacity
    #[arg(long = "pool-size")]
    pub pool_size: Option<usize>,

    /// Configuration file (TOML)
    #[arg(short = 'c', long = "config")]
    pub config: Option<String>,

    /// Verbosity level (-v: debug, -vv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_short_flags() {
        let cli = Cli::parse_from(["lan-tunnel", "-k", "mykey", "-s", "relay.example", "-p", "4901"]);
        assert_eq!(cli.key.as_deref(), Some("mykey"));
        assert_eq!(cli.server.as_deref(), Some("relay.example"));
        assert_eq!(cli.port, Some(4901));
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_parse_defaults() {
        let cli = Cli::parse_from(["lan-tunnel"]);
        assert!(cli.key.is_none());
        assert!(cli.server.is_none());
        assert!(cli.port.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_verbose_count() {
        let cli = Cli::parse_from(["lan-tunnel", "-vv"]);
        assert_eq!(cli.verbose, 2);
    }
}
