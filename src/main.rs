// ==========================================
// 农户批量入驻 - 命令行入口
// ==========================================
// 子命令: import（导入文件并输出结果报表）/ template（输出模板 CSV）
// ==========================================

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use farmer_onboarding::api::{RetryRequest, SubmitOptions, SubmitRequest};
use farmer_onboarding::app::{get_default_db_path, AppState};
use farmer_onboarding::domain::types::{
    CredentialMethod, DeduplicationMode, InputFormat, ProcessingMode,
};
use farmer_onboarding::logging;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "farmer-onboarding", version, about = "Bulk farmer onboarding pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import farmers from a CSV, Excel or JSON file
    Import(ImportArgs),
    /// Print the upload template as CSV
    Template {
        /// Print the field list as JSON instead of CSV
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args, Debug)]
struct ImportArgs {
    /// Organization the farmers are onboarded into
    #[arg(long)]
    org: String,

    /// Input file
    #[arg(long)]
    file: PathBuf,

    /// Input format (csv, excel, json); inferred from the file extension when omitted
    #[arg(long)]
    format: Option<InputFormat>,

    #[arg(long)]
    chunk_size: Option<usize>,

    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Duplicate handling: skip, update or error
    #[arg(long)]
    dedup: Option<DeduplicationMode>,

    /// Stop dispatching new records after the first failure
    #[arg(long)]
    stop_on_error: bool,

    /// Assign every created farmer to this Kisan Sathi user
    #[arg(long)]
    kisan_sathi: Option<String>,

    /// Send login credentials to new farmers (sms, email, both)
    #[arg(long)]
    send_credentials: Option<CredentialMethod>,

    /// Retry failed records once more as a follow-up operation
    #[arg(long)]
    retry_failed: bool,

    /// Write the result report to this path (format follows its extension)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Only include failed records in the report
    #[arg(long)]
    failures_only: bool,

    /// SQLite database path
    #[arg(long, env = "FARMER_ONBOARDING_DB_PATH")]
    db: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Import(args) => run_import(args).await,
        Command::Template { json } => run_template(json).await,
    }
}

async fn run_import(args: ImportArgs) -> Result<()> {
    let db_path = args.db.clone().unwrap_or_else(get_default_db_path);
    tracing::info!("使用数据库: {}", db_path);

    let state = AppState::new(db_path)
        .await
        .map_err(anyhow::Error::msg)
        .context("无法初始化AppState")?;

    let data = std::fs::read(&args.file)
        .with_context(|| format!("无法读取文件: {}", args.file.display()))?;

    let request = SubmitRequest {
        org_id: args.org.clone(),
        input_format: args.format,
        file_name: args.file.file_name().map(|n| n.to_string_lossy().to_string()),
        processing_mode: ProcessingMode::Sync,
        options: SubmitOptions {
            chunk_size: args.chunk_size,
            max_concurrency: args.max_concurrency,
            continue_on_error: args.stop_on_error.then_some(false),
            deduplication_mode: args.dedup,
            assign_kisan_sathi: args.kisan_sathi.as_ref().map(|_| true),
            kisan_sathi_user_id: args.kisan_sathi.clone(),
            send_credentials: args.send_credentials.map(|_| true),
            credential_method: args.send_credentials,
        },
    };

    let api = &state.bulk_api;
    let submitted = api.submit(request, &data).await.map_err(|e| {
        anyhow::anyhow!("[{}] {}", e.code(), e)
    })?;
    let mut operation_id = submitted.operation_id;
    let mut status = api.get_status(&operation_id).await?;

    if args.retry_failed && status.can_retry && status.progress.failed > 0 {
        let retried = api
            .retry(RetryRequest {
                operation_id: operation_id.clone(),
                ..RetryRequest::default()
            })
            .await?;
        operation_id = retried.operation_id;
        status = api.get_status(&operation_id).await?;
    }

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "operation:  {}", status.operation_id)?;
    writeln!(stdout, "status:     {}", status.status)?;
    writeln!(
        stdout,
        "records:    total={} successful={} failed={} skipped={}",
        status.progress.total,
        status.progress.successful,
        status.progress.failed,
        status.progress.skipped
    )?;
    writeln!(stdout, "batches:    {}/{}", status.current_batch, status.total_batches)?;
    if let Some(summary) = &status.error_summary {
        writeln!(stdout, "errors:     {}", summary)?;
    }

    if let Some(report_path) = &args.report {
        let format = report_format(report_path, args.format)?;
        let report = api
            .download_results(&operation_id, format, args.failures_only)
            .await?;
        std::fs::write(report_path, &report.bytes)
            .with_context(|| format!("无法写入报表: {}", report_path.display()))?;
        writeln!(stdout, "report:     {}", report_path.display())?;
    }

    Ok(())
}

async fn run_template(json: bool) -> Result<()> {
    // 模板不依赖数据库，直接用内存装配
    let state = AppState::new(":memory:".to_string())
        .await
        .map_err(anyhow::Error::msg)?;

    let mut stdout = std::io::stdout().lock();
    if json {
        let fields = state.bulk_api.template();
        writeln!(stdout, "{}", serde_json::to_string_pretty(&fields)?)?;
    } else {
        stdout.write_all(&state.bulk_api.template_csv()?)?;
    }
    Ok(())
}

/// 报表格式: 报表路径扩展名优先，其次输入格式，默认 CSV
fn report_format(path: &Path, input: Option<InputFormat>) -> Result<InputFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => match InputFormat::from_extension(ext) {
            Some(format) => Ok(format),
            None => bail!("不支持的报表格式: {}", ext),
        },
        None => Ok(input.unwrap_or(InputFormat::Csv)),
    }
}
