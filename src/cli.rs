use clap::{Parser, Subcommand};

/// 食谱生成任务Worker
#[derive(Parser, Debug)]
#[command(name = "mealprep-jobs")]
#[command(version = "1.0.0")]
#[command(about = "食谱生成任务队列与Worker")]
pub struct CliApp {
    #[command(subcommand)]
    pub command: Commands,

    /// 配置文件路径
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// 日志级别 (覆盖配置)
    #[arg(short, long, global = true, value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: Option<String>,

    /// 日志格式 (覆盖配置)
    #[arg(long, global = true, value_parser = ["json", "pretty"])]
    pub log_format: Option<String>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// 启动Worker、健康监控与停滞任务清理
    Run {
        /// Worker ID (覆盖配置)
        #[arg(long)]
        worker_id: Option<String>,
    },
    /// 创建食谱生成任务并入队
    Submit {
        /// 季节
        #[arg(short, long)]
        season: String,
        /// 任务完成后的回调地址
        #[arg(long)]
        webhook_url: Option<String>,
    },
    /// 查看任务详情
    Status {
        /// 任务ID
        job_id: String,
    },
    /// 列出任务 (最新在前)
    List {
        /// 状态过滤: pending, processing, completed, failed
        #[arg(short, long)]
        status: Option<String>,
        /// 最多显示数量
        #[arg(long, default_value = "20")]
        limit: i64,
    },
    /// 重试失败的任务
    Retry {
        /// 任务ID
        job_id: String,
    },
    /// 查看队列长度与队首消息
    Queue {
        /// 显示的消息数量
        #[arg(long, default_value = "10")]
        head: usize,
    },
    /// 执行一次存储健康检查
    Health,
    /// 手动重建数据库连接池
    Recover,
}
