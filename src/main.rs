// ==========================================
// 砂箱使用与维修跟踪系统 - 命令行入口
// ==========================================
// 用途: 对指定数据库执行一次对账重算并打印箱组状态
//
// 用法:
//   cargo run -- [db_path]
//
// 不带参数时使用系统数据目录下的默认数据库。
// ==========================================

use mold_usage_tracker::db::get_default_db_path;
use mold_usage_tracker::{logging, FleetApi};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志系统
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", mold_usage_tracker::APP_NAME);
    tracing::info!("系统版本: {}", mold_usage_tracker::VERSION);
    tracing::info!("==================================================");

    let db_path = std::env::args()
        .nth(1)
        .unwrap_or_else(get_default_db_path);
    tracing::info!("使用数据库: {}", db_path);

    let api = FleetApi::new(&db_path)?;

    // 以本地日期（日粒度）为“当前日期”执行对账重算
    let now = chrono::Local::now().date_naive();
    let result = api.reconcile(now)?;

    tracing::info!(
        "对账重算完成: 回放 {} 条事件, {} 次自动维修触发",
        result.events_replayed,
        result.auto_triggers
    );

    // 打印箱组状态（对应原统计面板: 号 / 当前 / 总计 / 维修 / 状态）
    tracing::info!("{:>4} {:>6} {:>6} {:>6}  状态", "箱号", "当前", "总计", "维修");
    for mold in api.fleet_status()? {
        tracing::info!(
            "{:>4} {:>6} {:>6} {:>6}  {}",
            mold.mold_id,
            mold.current_count,
            mold.total_count,
            mold.repair_count,
            mold.status_text()
        );
    }

    Ok(())
}
