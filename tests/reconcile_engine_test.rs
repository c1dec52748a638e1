// ==========================================
// 对账重算引擎集成测试 (SQLite 全链路)
// ==========================================
// 测试范围:
// 1. 全量重算的阈值语义与快照落盘
// 2. 幂等性（重跑不漂移、AUTO 记录不重复）
// 3. 追加事件后 total_count 单调性
// 4. 人工维修与自动触发的合并
// 5. 闲置标志与维修状态互斥
// ==========================================


use mold_usage_tracker::domain::types::{IdleFlag, RepairOrigin};
use mold_usage_tracker::FleetApi;
use test_helpers::{create_test_db, d, ev, insert_test_config, open_test_connection};

/// 创建阈值可控的测试 API
fn setup_api(
    fleet_size: i32,
    wear_threshold: i64,
    idle_days_threshold: i64,
) -> (tempfile::NamedTempFile, FleetApi) {
    let (temp_file, db_path) = create_test_db().expect("创建测试数据库失败");
    {
        let conn = open_test_connection(&db_path).expect("打开数据库失败");
        insert_test_config(&conn, fleet_size, wear_threshold, idle_days_threshold)
            .expect("插入配置失败");
    }
    let api = FleetApi::new(&db_path).expect("构建 FleetApi 失败");
    (temp_file, api)
}

#[test]
fn test_threshold_trigger_writes_snapshot_and_auto_record() {
    // 箱组 3、阈值 5、箱 1 连续 5 天使用
    let (_temp, api) = setup_api(3, 5, 4);
    let events: Vec<_> = (1..=5).map(|day| ev(1, d(2025, 1, day))).collect();
    api.append_usage_events(&events).unwrap();

    let result = api.reconcile(d(2025, 1, 5)).unwrap();
    assert_eq!(result.events_replayed, 5);
    assert_eq!(result.auto_triggers, 1);

    let status = api.fleet_status().unwrap();
    let mold1 = status.iter().find(|m| m.mold_id == 1).unwrap();
    assert_eq!(mold1.total_count, 5);
    assert_eq!(mold1.current_count, 0);
    assert_eq!(mold1.repair_count, 1);
    assert_eq!(mold1.last_use_date, Some(d(2025, 1, 5)));
    assert_eq!(mold1.last_repair_date, Some(d(2025, 1, 5)));
    assert!(!mold1.in_repair);

    // AUTO 维修周期落盘: 当日闭合，记录触发时计数
    let history = api.repair_history(1).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].origin, RepairOrigin::Auto);
    assert_eq!(history[0].start_date, d(2025, 1, 5));
    assert_eq!(history[0].end_date, Some(d(2025, 1, 5)));
    assert_eq!(history[0].uses_before_repair, 5);
}

#[test]
fn test_reconcile_is_idempotent() {
    let (_temp, api) = setup_api(3, 5, 4);
    let events: Vec<_> = (1..=14)
        .map(|day| ev((day % 3) + 1, d(2025, 1, day as u32)))
        .collect();
    api.append_usage_events(&events).unwrap();

    let first = api.reconcile(d(2025, 1, 20)).unwrap();
    let status_first = api.fleet_status().unwrap();
    let history_first = api.repair_history(1).unwrap();

    let second = api.reconcile(d(2025, 1, 20)).unwrap();
    let status_second = api.fleet_status().unwrap();
    let history_second = api.repair_history(1).unwrap();

    // 快照逐字节一致，AUTO 记录不重复
    assert_eq!(first.snapshot, second.snapshot);
    assert_eq!(status_first, status_second);
    assert_eq!(history_first, history_second);
}

#[test]
fn test_total_count_monotonic_under_append() {
    let (_temp, api) = setup_api(2, 100, 40);
    let l1: Vec<_> = (1..=6).map(|day| ev(1, d(2025, 1, day))).collect();
    api.append_usage_events(&l1).unwrap();
    api.reconcile(d(2025, 1, 10)).unwrap();

    let total_l1 = api
        .fleet_status()
        .unwrap()
        .iter()
        .find(|m| m.mold_id == 1)
        .unwrap()
        .total_count;

    // 追加 L2 后重算: total = L1 + |L2|
    let l2 = vec![ev(1, d(2025, 1, 11)), ev(1, d(2025, 1, 12)), ev(1, d(2025, 1, 13))];
    api.append_usage_events(&l2).unwrap();
    api.reconcile(d(2025, 1, 13)).unwrap();

    let total_l2 = api
        .fleet_status()
        .unwrap()
        .iter()
        .find(|m| m.mold_id == 1)
        .unwrap()
        .total_count;

    assert_eq!(total_l1, 6);
    assert_eq!(total_l2, total_l1 + 3);
}

#[test]
fn test_manual_repair_merged_with_replay() {
    let (_temp, api) = setup_api(2, 100, 40);
    let events: Vec<_> = (1..=4).map(|day| ev(1, d(2025, 1, day))).collect();
    api.append_usage_events(&events).unwrap();
    api.reconcile(d(2025, 1, 4)).unwrap();

    // 人工送修后重算: current 归零、维修状态保持、total 不变
    api.send_to_repair(1, d(2025, 1, 5)).unwrap();
    api.reconcile(d(2025, 1, 6)).unwrap();

    let status = api.fleet_status().unwrap();
    let mold1 = status.iter().find(|m| m.mold_id == 1).unwrap();
    assert!(mold1.in_repair);
    assert_eq!(mold1.current_count, 0);
    assert_eq!(mold1.total_count, 4);
    assert_eq!(mold1.repair_count, 1);
    assert_eq!(mold1.last_repair_date, Some(d(2025, 1, 5)));

    // 返修并继续使用: 返修后的事件重新累计磨损
    api.return_from_repair(1, d(2025, 1, 7)).unwrap();
    api.append_usage_events(&[ev(1, d(2025, 1, 8)), ev(1, d(2025, 1, 9))])
        .unwrap();
    api.reconcile(d(2025, 1, 9)).unwrap();

    let status = api.fleet_status().unwrap();
    let mold1 = status.iter().find(|m| m.mold_id == 1).unwrap();
    assert!(!mold1.in_repair);
    assert_eq!(mold1.current_count, 2);
    assert_eq!(mold1.total_count, 6);
    assert_eq!(mold1.repair_count, 1);
}

#[test]
fn test_events_during_repair_count_total_not_wear() {
    let (_temp, api) = setup_api(1, 100, 40);
    api.append_usage_events(&[ev(1, d(2025, 1, 1)), ev(1, d(2025, 1, 2))])
        .unwrap();
    api.send_to_repair(1, d(2025, 1, 3)).unwrap();

    // 维修期间日志仍出现该箱的事件
    api.append_usage_events(&[ev(1, d(2025, 1, 4))]).unwrap();
    api.return_from_repair(1, d(2025, 1, 5)).unwrap();
    api.append_usage_events(&[ev(1, d(2025, 1, 6))]).unwrap();

    api.reconcile(d(2025, 1, 6)).unwrap();

    let status = api.fleet_status().unwrap();
    let mold1 = status.iter().find(|m| m.mold_id == 1).unwrap();
    // 全寿命计数包含维修期间事件，磨损计数只从返修后算起
    assert_eq!(mold1.total_count, 4);
    assert_eq!(mold1.current_count, 1);
}

#[test]
fn test_idle_flag_and_repair_mutually_exclusive() {
    let (_temp, api) = setup_api(3, 100, 4);
    api.append_usage_events(&[ev(1, d(2025, 1, 1)), ev(2, d(2025, 1, 1))])
        .unwrap();
    api.send_to_repair(2, d(2025, 1, 2)).unwrap();

    api.reconcile(d(2025, 1, 10)).unwrap();

    let status = api.fleet_status().unwrap();
    for mold in &status {
        assert!(
            !(mold.in_repair && mold.idle_flag.is_some()),
            "箱 {} 同时维修中与闲置",
            mold.mold_id
        );
    }

    // 箱 1: 闲置 9 天；箱 2: 维修中不判闲置；箱 3: 从未使用，总是标记
    let mold1 = status.iter().find(|m| m.mold_id == 1).unwrap();
    assert_eq!(mold1.idle_flag, Some(IdleFlag::Stale { days_idle: 9 }));
    let mold2 = status.iter().find(|m| m.mold_id == 2).unwrap();
    assert!(mold2.idle_flag.is_none());
    let mold3 = status.iter().find(|m| m.mold_id == 3).unwrap();
    assert_eq!(mold3.idle_flag, Some(IdleFlag::NeverUsed));
}

#[test]
fn test_reconcile_preserves_open_manual_record() {
    // 重算不得动人工记录: open 记录重算后仍 open
    let (_temp, api) = setup_api(2, 5, 40);
    let events: Vec<_> = (1..=5).map(|day| ev(2, d(2025, 2, day))).collect();
    api.append_usage_events(&events).unwrap();
    api.send_to_repair(1, d(2025, 2, 1)).unwrap();

    api.reconcile(d(2025, 2, 6)).unwrap();
    api.reconcile(d(2025, 2, 6)).unwrap();

    let history1 = api.repair_history(1).unwrap();
    let manual: Vec<_> = history1
        .iter()
        .filter(|r| r.origin == RepairOrigin::Manual)
        .collect();
    assert_eq!(manual.len(), 1);

    // 箱 2 的 AUTO 触发重跑后仍只有一条
    let history2 = api.repair_history(2).unwrap();
    let autos: Vec<_> = history2
        .iter()
        .filter(|r| r.origin == RepairOrigin::Auto)
        .collect();
    assert_eq!(autos.len(), 1);
}
