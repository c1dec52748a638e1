// ==========================================
// FleetApi 集成测试
// ==========================================
// 测试范围:
// 1. 建箱引导与默认配置
// 2. 人工送修/返修及其失败语义
// 3. 事件导入校验
// 4. 月度统计与维修历史查询
// ==========================================


use mold_usage_tracker::domain::types::RepairOrigin;
use mold_usage_tracker::engine::EngineError;
use mold_usage_tracker::FleetApi;
use rusqlite::params;
use test_helpers::{create_test_db, d, ev, insert_test_config, open_test_connection};

#[test]
fn test_bootstrap_seeds_default_fleet() {
    let (_temp, db_path) = create_test_db().unwrap();
    let api = FleetApi::new(&db_path).unwrap();

    // 默认配置: 11 箱、阈值 100、闲置窗口 4 天
    let config = api.config();
    assert_eq!(config.fleet_size, 11);
    assert_eq!(config.wear_threshold, 100);
    assert_eq!(config.idle_days_threshold, 4);

    let status = api.fleet_status().unwrap();
    assert_eq!(status.len(), 11);
    for (idx, mold) in status.iter().enumerate() {
        assert_eq!(mold.mold_id, idx as i32 + 1);
        assert_eq!(mold.total_count, 0);
        assert!(!mold.in_repair);
    }
}

#[test]
fn test_config_overrides_respected() {
    let (_temp, db_path) = create_test_db().unwrap();
    {
        let conn = open_test_connection(&db_path).unwrap();
        insert_test_config(&conn, 3, 5, 2).unwrap();
    }
    let api = FleetApi::new(&db_path).unwrap();

    assert_eq!(api.config().fleet_size, 3);
    assert_eq!(api.config().wear_threshold, 5);
    assert_eq!(api.config().idle_days_threshold, 2);
    assert_eq!(api.fleet_status().unwrap().len(), 3);
}

#[test]
fn test_send_and_return_roundtrip() {
    let (_temp, db_path) = create_test_db().unwrap();
    let api = FleetApi::new(&db_path).unwrap();

    api.append_usage_events(&[ev(4, d(2025, 1, 1)), ev(4, d(2025, 1, 2))])
        .unwrap();
    api.reconcile(d(2025, 1, 2)).unwrap();

    // 送修: open 记录带走当前计数
    let mold = api.send_to_repair(4, d(2025, 1, 3)).unwrap();
    assert!(mold.in_repair);
    assert_eq!(mold.current_count, 0);
    assert_eq!(mold.repair_count, 1);
    assert_eq!(mold.last_repair_date, Some(d(2025, 1, 3)));
    // last_use_date 作为历史事实保留
    assert_eq!(mold.last_use_date, Some(d(2025, 1, 2)));

    let history = api.repair_history(4).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].origin, RepairOrigin::Manual);
    assert_eq!(history[0].uses_before_repair, 2);

    // 返修: 记录闭合、状态恢复就绪
    let mold = api.return_from_repair(4, d(2025, 1, 9)).unwrap();
    assert!(!mold.in_repair);
    assert_eq!(mold.current_count, 0);

    let history = api.repair_history(4).unwrap();
    assert_eq!(history[0].end_date, Some(d(2025, 1, 9)));
}

#[test]
fn test_send_to_repair_noop_when_already_in_repair() {
    let (_temp, db_path) = create_test_db().unwrap();
    let api = FleetApi::new(&db_path).unwrap();

    api.send_to_repair(1, d(2025, 1, 3)).unwrap();
    // 重复送修: 幂等无操作，repair_count 不重复累加
    let mold = api.send_to_repair(1, d(2025, 1, 4)).unwrap();

    assert_eq!(mold.repair_count, 1);
    assert_eq!(mold.last_repair_date, Some(d(2025, 1, 3)));
    assert_eq!(api.repair_history(1).unwrap().len(), 1);
}

#[test]
fn test_return_without_active_repair_rejected() {
    let (_temp, db_path) = create_test_db().unwrap();
    let api = FleetApi::new(&db_path).unwrap();

    let err = api.return_from_repair(2, d(2025, 1, 5)).unwrap_err();
    assert!(matches!(err, EngineError::NoActiveRepair { mold_id: 2 }));

    // 状态未被改动
    let status = api.fleet_status().unwrap();
    let mold2 = status.iter().find(|m| m.mold_id == 2).unwrap();
    assert!(!mold2.in_repair);
    assert_eq!(mold2.repair_count, 0);
}

#[test]
fn test_return_rejected_when_flag_set_but_no_record() {
    // in_repair 标记存在但无 open 记录（历史引导数据）
    let (_temp, db_path) = create_test_db().unwrap();
    let api = FleetApi::new(&db_path).unwrap();
    {
        let conn = open_test_connection(&db_path).unwrap();
        conn.execute("UPDATE molds SET in_repair = 1 WHERE mold_id = 3", [])
            .unwrap();
    }

    let err = api.return_from_repair(3, d(2025, 1, 5)).unwrap_err();
    assert!(matches!(err, EngineError::NoActiveRepair { mold_id: 3 }));

    // 维修标记原样保留，没有被凭空闭合
    let status = api.fleet_status().unwrap();
    assert!(status.iter().find(|m| m.mold_id == 3).unwrap().in_repair);
}

#[test]
fn test_append_rejects_out_of_fleet_ids() {
    let (_temp, db_path) = create_test_db().unwrap();
    let api = FleetApi::new(&db_path).unwrap();

    let err = api
        .append_usage_events(&[ev(1, d(2025, 1, 1)), ev(99, d(2025, 1, 1))])
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidUnitId { mold_id: 99, .. }));

    // 整体拒绝: 合法的那条也不能写入
    api.reconcile(d(2025, 1, 2)).unwrap();
    let status = api.fleet_status().unwrap();
    assert_eq!(status.iter().find(|m| m.mold_id == 1).unwrap().total_count, 0);
}

#[test]
fn test_malformed_event_date_rejected_at_replay() {
    let (_temp, db_path) = create_test_db().unwrap();
    let api = FleetApi::new(&db_path).unwrap();
    {
        // 绕过 API 直接塞入坏日期行，模拟外部日志源的脏数据
        let conn = open_test_connection(&db_path).unwrap();
        conn.execute(
            "INSERT INTO usage_records (mold_id, use_date, slot) VALUES (?1, ?2, ?3)",
            params![5, "01.02.2025", "B"],
        )
        .unwrap();
    }

    let err = api.reconcile(d(2025, 2, 1)).unwrap_err();
    match err {
        EngineError::InvalidEventDate { mold_id, raw } => {
            assert_eq!(mold_id, 5);
            assert_eq!(raw, "01.02.2025");
        }
        other => panic!("意外的错误类型: {other:?}"),
    }
}

#[test]
fn test_monthly_stats() {
    let (_temp, db_path) = create_test_db().unwrap();
    let api = FleetApi::new(&db_path).unwrap();

    api.append_usage_events(&[
        ev(1, d(2025, 1, 10)),
        ev(2, d(2025, 1, 31)),
        ev(1, d(2025, 2, 1)),
    ])
    .unwrap();
    api.send_to_repair(3, d(2025, 1, 15)).unwrap();

    let january = api.monthly_stats(2025, 1).unwrap();
    assert_eq!(january.total_uses, 2);
    assert_eq!(january.repairs_count, 1);

    let february = api.monthly_stats(2025, 2).unwrap();
    assert_eq!(february.total_uses, 1);
    assert_eq!(february.repairs_count, 0);
}

#[test]
fn test_repair_history_infers_missing_end_date() {
    let (_temp, db_path) = create_test_db().unwrap();
    let api = FleetApi::new(&db_path).unwrap();

    api.send_to_repair(6, d(2025, 1, 10)).unwrap();
    // 维修开始后出现下一次使用: 展示层据此推断结束日期
    api.append_usage_events(&[ev(6, d(2025, 1, 20))]).unwrap();

    let history = api.repair_history(6).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].start_date, d(2025, 1, 10));
    assert_eq!(history[0].end_date, Some(d(2025, 1, 20)));
}
