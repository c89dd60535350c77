use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use taskmesh::common::{load_config, StartupConfig};
use taskmesh_core::{
    config::AppConfig,
    models::{TaskRecord, WorkerSummary},
    traits::TaskStore,
};
use taskmesh_infrastructure::DatabaseManager;
use taskmesh_worker::CoordinatorClient;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = CliApp::parse();
    cli.run().await
}

/// CLI应用程序主结构
#[derive(Parser, Debug)]
#[command(name = "taskmesh-cli")]
#[command(version)]
#[command(about = "分布式任务协调系统 - 命令行工具")]
#[command(long_about = "直接提交任务、向存储写入定时任务、查看任务状态和在线Worker")]
struct CliApp {
    #[command(subcommand)]
    command: Commands,

    /// 协调器地址，缺省取配置中的 worker.coordinator_address
    #[arg(long)]
    coordinator: Option<String>,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 以JSON输出
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 直接提交任务，立即分发给一个Worker
    Submit {
        /// 任务负载
        data: String,
    },
    /// 写入一个定时任务，由协调器扫描后分发
    Schedule {
        /// 任务命令
        command: String,
        /// 延迟秒数
        #[arg(short, long, default_value = "0")]
        delay_seconds: i64,
    },
    /// 查看任务状态
    Status {
        /// 任务ID
        task_id: Uuid,
    },
    /// 列出存储中的任务
    Tasks,
    /// 列出协调器上的在线Worker
    Workers,
    /// 执行数据库迁移
    Migrate,
}

impl CliApp {
    async fn run(self) -> Result<()> {
        let config = load_config(&StartupConfig {
            config_path: self.config.clone(),
            ..Default::default()
        })?;

        match self.command {
            Commands::Submit { ref data } => {
                let client = coordinator_client(&config, self.coordinator.as_deref())?;
                let response = client.submit_task(data).await.context("提交任务失败")?;
                if self.json {
                    println!("{}", serde_json::to_string_pretty(&response)?);
                } else {
                    println!("{}", response.message);
                    println!("任务ID: {}", response.task_id);
                }
            }
            Commands::Schedule {
                ref command,
                delay_seconds,
            } => {
                let store = open_store(&config).await?;
                let scheduled_at = Utc::now() + Duration::seconds(delay_seconds);
                let task = store
                    .insert_task(command, scheduled_at)
                    .await
                    .context("写入任务失败")?;
                if self.json {
                    println!("{}", serde_json::to_string_pretty(&task)?);
                } else {
                    println!("任务已写入: {}", task.id);
                    println!("计划时间: {}", task.scheduled_at.to_rfc3339());
                }
            }
            Commands::Status { task_id } => {
                let store = open_store(&config).await?;
                let task = store
                    .get_task(task_id)
                    .await
                    .context("查询任务失败")?
                    .ok_or_else(|| anyhow::anyhow!("任务不存在: {task_id}"))?;
                if self.json {
                    println!("{}", serde_json::to_string_pretty(&task)?);
                } else {
                    print_task_details(&task);
                }
            }
            Commands::Tasks => {
                let store = open_store(&config).await?;
                let tasks = store.list_tasks().await.context("查询任务列表失败")?;
                if self.json {
                    println!("{}", serde_json::to_string_pretty(&tasks)?);
                } else {
                    print_tasks_table(&tasks);
                }
            }
            Commands::Workers => {
                let client = coordinator_client(&config, self.coordinator.as_deref())?;
                let workers = client.list_workers_or_empty().await;
                if self.json {
                    println!("{}", serde_json::to_string_pretty(&workers)?);
                } else {
                    print_workers_table(&workers);
                }
            }
            Commands::Migrate => {
                let database = DatabaseManager::new(&config.database)
                    .await
                    .context("连接数据库失败")?;
                database.migrate().await.context("执行数据库迁移失败")?;
                database.close().await;
                println!("数据库迁移完成");
            }
        }

        Ok(())
    }
}

fn coordinator_client(config: &AppConfig, address: Option<&str>) -> Result<CoordinatorClient> {
    let address = address.unwrap_or(&config.worker.coordinator_address);
    CoordinatorClient::new(address).context("创建协调器客户端失败")
}

async fn open_store(config: &AppConfig) -> Result<std::sync::Arc<dyn TaskStore>> {
    let database = DatabaseManager::new(&config.database)
        .await
        .context("连接数据库失败")?;
    Ok(database.task_store())
}

fn format_time(value: Option<chrono::DateTime<Utc>>) -> String {
    value
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".to_string())
}

fn print_task_details(task: &TaskRecord) {
    println!("任务ID:   {}", task.id);
    println!("命令:     {}", task.command);
    println!("状态:     {}", task.state());
    println!("计划时间: {}", task.scheduled_at.to_rfc3339());
    println!("认领时间: {}", format_time(task.picked_at));
    println!("开始时间: {}", format_time(task.started_at));
    println!("完成时间: {}", format_time(task.completed_at));
    println!("失败时间: {}", format_time(task.failed_at));
    println!("Worker:   {}", task.worker_id.as_deref().unwrap_or("-"));
}

fn print_tasks_table(tasks: &[TaskRecord]) {
    if tasks.is_empty() {
        println!("没有任务");
        return;
    }
    println!("{:<38} {:<10} {:<27} {:<12} 命令", "ID", "状态", "计划时间", "Worker");
    for task in tasks {
        println!(
            "{:<38} {:<10} {:<27} {:<12} {}",
            task.id,
            task.state().to_string(),
            task.scheduled_at.to_rfc3339(),
            task.worker_id.as_deref().unwrap_or("-"),
            task.command
        );
    }
}

fn print_workers_table(workers: &[WorkerSummary]) {
    if workers.is_empty() {
        println!("没有在线Worker");
        return;
    }
    println!(
        "{:<12} {:<24} {:<8} {:<10} {:<38} 最后活跃",
        "ID", "地址", "状态", "已完成", "当前任务"
    );
    for worker in workers {
        println!(
            "{:<12} {:<24} {:<8} {:<10} {:<38} {}",
            worker.id,
            worker.address,
            worker.status.as_str(),
            worker.tasks_completed,
            worker
                .current_task_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            worker.last_active_at.to_rfc3339()
        );
    }
}
