mod common;

use common::*;
use ridewatch::db;
use ridewatch::model::{Direction, PhaseAction, TripPhase};
use ridewatch::phase;
use ridewatch::RideError;

#[tokio::test]
async fn full_shift_walks_every_phase() {
    let pool = memory_pool().await;
    seed_driver(&pool, DRIVER).await;

    let started = phase::set_driver_phase(&pool, DRIVER, PhaseAction::StartDuty, at(7, 0, 0))
        .await
        .unwrap();
    assert_eq!(
        started,
        TripPhase::OnDuty {
            direction: Direction::Outbound
        }
    );
    let reversed =
        phase::set_driver_phase(&pool, DRIVER, PhaseAction::ReverseDirection, at(15, 0, 0))
            .await
            .unwrap();
    assert_eq!(reversed.direction(), Some(Direction::Return));
    let ended = phase::set_driver_phase(&pool, DRIVER, PhaseAction::EndDuty, at(17, 0, 0))
        .await
        .unwrap();
    assert_eq!(ended, TripPhase::OffDuty);

    let driver = db::fetch_driver(&pool, DRIVER).await.unwrap().unwrap();
    assert_eq!(driver.phase, TripPhase::OffDuty);

    let cases = [
        (at(6, 0, 0), TripPhase::OffDuty),
        (at(7, 0, 0), started),
        (at(12, 0, 0), started),
        (at(15, 30, 0), reversed),
        (at(18, 0, 0), TripPhase::OffDuty),
    ];
    for (when, expected) in cases {
        assert_eq!(
            phase::phase_at(&pool, &driver, when).await.unwrap(),
            expected,
            "{when}"
        );
    }
}

#[tokio::test]
async fn invalid_actions_are_refused() {
    let pool = memory_pool().await;
    seed_driver(&pool, DRIVER).await;

    let err = phase::set_driver_phase(&pool, DRIVER, PhaseAction::ReverseDirection, at(7, 0, 0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RideError::InvalidPhaseTransition {
            from: TripPhase::OffDuty,
            action: PhaseAction::ReverseDirection
        }
    ));

    phase::set_driver_phase(&pool, DRIVER, PhaseAction::StartDuty, at(7, 0, 0))
        .await
        .unwrap();
    let err = phase::set_driver_phase(&pool, DRIVER, PhaseAction::StartDuty, at(7, 1, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, RideError::InvalidPhaseTransition { .. }));

    let err = phase::set_driver_phase(&pool, 404, PhaseAction::StartDuty, at(7, 0, 0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RideError::ReferenceError {
            entity: "driver",
            id: 404
        }
    ));
}

#[tokio::test]
async fn positions_only_move_forward_in_time() {
    let pool = memory_pool().await;
    seed_driver(&pool, DRIVER).await;

    phase::report_position(&pool, DRIVER, 31.20, 121.40, at(8, 0, 0))
        .await
        .unwrap();
    phase::report_position(&pool, DRIVER, 30.00, 120.00, at(7, 59, 0))
        .await
        .unwrap();
    let driver = db::fetch_driver(&pool, DRIVER).await.unwrap().unwrap();
    assert_eq!(driver.last_position, Some((31.20, 121.40)));
    assert_eq!(driver.last_seen_at, Some(at(8, 0, 0)));

    let err = phase::report_position(&pool, 404, 0.0, 0.0, at(8, 0, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, RideError::ReferenceError { .. }));
}
