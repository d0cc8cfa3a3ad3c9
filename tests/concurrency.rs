mod common;

use chrono::NaiveDate;
use common::*;
use futures::future::join_all;
use ridewatch::db;
use ridewatch::model::{BoardingStatus, PhaseAction, RejectReason};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_readers_accept_a_card_once() {
    let (_dir, pool) = file_pool().await;
    seed_basic(&pool).await;
    let sender = RecordingSender::default();
    let svc = service(&pool, &sender);
    svc.set_driver_phase(DRIVER, PhaseAction::StartDuty, at(7, 0, 0))
        .await
        .unwrap();

    let tasks = (0..8).map(|i| {
        let svc = svc.clone();
        tokio::spawn(async move {
            svc.record_scan(scan("CARD-1", at(8, 0, i % 3)))
                .await
                .unwrap()
        })
    });
    let receipts: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let accepted = receipts.iter().filter(|r| r.accepted).count();
    let suppressed = receipts
        .iter()
        .filter(|r| r.reason == Some(RejectReason::DuplicateSuppressed))
        .count();
    assert_eq!(accepted, 1);
    assert_eq!(suppressed, 7);
    assert!(receipts.iter().all(|r| r.is_success()));

    assert_eq!(db::count_boarding_records(&pool).await.unwrap(), 1);
    let events = db::list_scan_events_for_card(&pool, "CARD-1").await.unwrap();
    assert_eq!(events.len(), 8);
    assert_eq!(sender.calls().await.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_students_never_contend() {
    let (_dir, pool) = file_pool().await;
    seed_driver(&pool, DRIVER).await;
    for id in 1..=12 {
        seed_student(&pool, id, &format!("Student {id}"), Some(DRIVER)).await;
        assign_card(&pool, &format!("CARD-{id}"), id).await;
    }
    let sender = RecordingSender::default();
    let svc = service(&pool, &sender);
    svc.set_driver_phase(DRIVER, PhaseAction::StartDuty, at(7, 0, 0))
        .await
        .unwrap();

    let tasks = (1..=12).map(|id| {
        let svc = svc.clone();
        tokio::spawn(async move {
            svc.record_scan(scan(&format!("CARD-{id}"), at(8, 0, 0)))
                .await
                .unwrap()
        })
    });
    let receipts: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert!(receipts.iter().all(|r| r.accepted));

    let day = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
    let records = db::list_boarding_for_day(&pool, day).await.unwrap();
    assert_eq!(records.len(), 12);
    assert!(records.iter().all(|r| r.status == BoardingStatus::Boarded));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reset_racing_scans_keeps_one_record_per_key() {
    let (_dir, pool) = file_pool().await;
    seed_basic(&pool).await;
    let sender = RecordingSender::default();
    let svc = service(&pool, &sender);
    svc.set_driver_phase(DRIVER, PhaseAction::StartDuty, at(7, 0, 0))
        .await
        .unwrap();
    let day = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();

    let scan_task = {
        let svc = svc.clone();
        tokio::spawn(async move { svc.record_scan(scan("CARD-1", at(8, 0, 0))).await })
    };
    let reset_tasks = (0..3).map(|_| {
        let svc = svc.clone();
        tokio::spawn(async move { svc.reset_for_day(day).await })
    });
    let resets = join_all(reset_tasks).await;
    let receipt = scan_task.await.unwrap().unwrap();
    assert!(receipt.accepted);
    for reset in resets {
        reset.unwrap().unwrap();
    }

    let records = db::list_boarding_for_day(&pool, day).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, BoardingStatus::Boarded);
}
