use anyhow::Result;
use clap::{Arg, Command};
use taskmesh::app::AppMode;
use taskmesh::common::{start_application, StartupConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("taskmesh-worker")
        .version(env!("CARGO_PKG_VERSION"))
        .about("分布式任务协调系统 - Worker服务")
        .long_about("启动Worker：向协调器发送心跳，接收任务并在本地执行池中执行")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径"),
        )
        .arg(
            Arg::new("worker-id")
                .short('w')
                .long("worker-id")
                .value_name("ID")
                .help("Worker ID，缺省时随机生成"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let startup_config = StartupConfig {
        config_path: matches.get_one::<String>("config").cloned(),
        log_level: matches.get_one::<String>("log-level").cloned(),
        log_format: matches.get_one::<String>("log-format").cloned(),
        worker_id: matches.get_one::<String>("worker-id").cloned(),
    };

    start_application(startup_config, AppMode::Worker, "Worker").await
}
