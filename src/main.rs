// ==========================================
// 考勤对账引擎 - 命令行入口
// ==========================================
// 用法:
//   attendance-reconciler init [db]
//   attendance-reconciler import <db> <csv>
//   attendance-reconciler config-set <db> <key> <value>
//   attendance-reconciler reconcile <db> <start> <end> [employee] [--full]
//   attendance-reconciler verify-gaps <db> <date> [device]
//
// 输出: JSON (stdout); 日志走 stderr, RUST_LOG 控制级别
// ==========================================

use anyhow::{anyhow, bail, Context, Result};
use attendance_reconciler::config::ConfigManager;
use attendance_reconciler::db::{ensure_schema, get_default_db_path, open_sqlite_connection};
use attendance_reconciler::engine::{IntegrityVerifier, ReconcileRequest, ReconciliationCoordinator};
use attendance_reconciler::importer::PunchCsvImporter;
use attendance_reconciler::repository::{
    AttendanceRecordRepository, PunchEventRepository, RunLogRepository,
};
use attendance_reconciler::{logging, ReconcileConfigReader};
use chrono::NaiveDate;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

const USAGE: &str = "用法:
  attendance-reconciler init [db]
  attendance-reconciler import <db> <csv>
  attendance-reconciler config-set <db> <key> <value>
  attendance-reconciler reconcile <db> <start> <end> [employee] [--full]
  attendance-reconciler verify-gaps <db> <date> [device]";

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!("{}", USAGE);
    };
    let rest = &args[1..];

    tracing::info!("{} v{}", attendance_reconciler::APP_NAME, attendance_reconciler::VERSION);

    match command.as_str() {
        "init" => run_init(rest),
        "import" => run_import(rest),
        "config-set" => run_config_set(rest),
        "reconcile" => run_reconcile(rest).await,
        "verify-gaps" => run_verify_gaps(rest).await,
        "-h" | "--help" | "help" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("未知命令: {}\n{}", other, USAGE),
    }
}

// ==========================================
// 子命令
// ==========================================

fn run_init(args: &[String]) -> Result<()> {
    let db_path = args.first().cloned().unwrap_or_else(get_default_db_path);
    open_database(&db_path)?;
    println!("{}", serde_json::json!({ "db_path": db_path, "initialized": true }));
    Ok(())
}

fn run_import(args: &[String]) -> Result<()> {
    let db_path = arg(args, 0, "db")?;
    let csv_path = arg(args, 1, "csv")?;

    let conn = open_database(db_path)?;
    let importer = PunchCsvImporter::new(
        Arc::new(PunchEventRepository::new(conn)),
        logging::component_span("importer"),
    );
    let summary = importer
        .import_file(csv_path)
        .with_context(|| format!("导入失败: {}", csv_path))?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn run_config_set(args: &[String]) -> Result<()> {
    let db_path = arg(args, 0, "db")?;
    let key = arg(args, 1, "key")?;
    let value = arg(args, 2, "value")?;

    let conn = open_database(db_path)?;
    let manager = ConfigManager::from_connection(conn)?;
    manager.set_global_config_value(key, value)?;

    println!("{}", serde_json::json!({ "key": key, "value": value }));
    Ok(())
}

async fn run_reconcile(args: &[String]) -> Result<()> {
    let full = args.iter().any(|a| a == "--full");
    let positional: Vec<&String> = args.iter().filter(|a| !a.starts_with("--")).collect();

    let db_path = positional.first().ok_or_else(|| anyhow!("缺少参数: db\n{}", USAGE))?;
    let start = parse_date(positional.get(1).map(|s| s.as_str()), "start")?;
    let end = parse_date(positional.get(2).map(|s| s.as_str()), "end")?;
    let employee = positional.get(3).map(|s| s.as_str());

    let conn = open_database(db_path)?;
    let coordinator = ReconciliationCoordinator::new(
        Arc::new(PunchEventRepository::new(conn.clone())),
        Arc::new(AttendanceRecordRepository::new(conn.clone())),
        Arc::new(ConfigManager::from_connection(conn.clone())?),
        logging::component_span("coordinator"),
    )
    .with_run_log(Arc::new(RunLogRepository::new(conn)));

    let request = if full {
        ReconcileRequest::full(employee, start, end)
    } else {
        ReconcileRequest::incremental(employee, start, end)
    }
    .with_actor("cli");

    let report = coordinator.reconcile(request).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    report.into_result()?;
    Ok(())
}

async fn run_verify_gaps(args: &[String]) -> Result<()> {
    let db_path = arg(args, 0, "db")?;
    let date = parse_date(args.get(1).map(|s| s.as_str()), "date")?;
    let device = args.get(2).map(|s| s.as_str());

    let conn = open_database(db_path)?;
    let config = ConfigManager::from_connection(conn.clone())?
        .load_reconcile_config()
        .await?;
    let verifier = IntegrityVerifier::new(
        Arc::new(PunchEventRepository::new(conn)),
        &config,
        logging::component_span("integrity"),
    );

    let gaps = verifier.verify(date, date, device)?;
    println!("{}", serde_json::to_string_pretty(&gaps)?);
    Ok(())
}

// ==========================================
// 辅助函数
// ==========================================

fn open_database(db_path: &str) -> Result<Arc<Mutex<Connection>>> {
    let conn = open_sqlite_connection(db_path)
        .with_context(|| format!("无法打开数据库: {}", db_path))?;
    ensure_schema(&conn).context("建表失败")?;
    Ok(Arc::new(Mutex::new(conn)))
}

fn arg<'a>(args: &'a [String], idx: usize, name: &str) -> Result<&'a str> {
    args.get(idx)
        .map(|s| s.as_str())
        .ok_or_else(|| anyhow!("缺少参数: {}\n{}", name, USAGE))
}

fn parse_date(value: Option<&str>, name: &str) -> Result<NaiveDate> {
    let value = value.ok_or_else(|| anyhow!("缺少参数: {}\n{}", name, USAGE))?;
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("日期格式错误 ({}): {}, 期望 YYYY-MM-DD", name, value))
}
