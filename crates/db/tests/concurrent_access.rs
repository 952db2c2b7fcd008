use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use repairdesk_core::domain::actor::{Actor, Role};
use repairdesk_core::domain::booking::{
    Booking, BookingId, BookingStatus, CustomerId, NewBooking, RepairType, UrgencyLevel,
};
use repairdesk_core::domain::device::{DeviceCategory, DeviceModel, DeviceModelId};
use repairdesk_core::lifecycle::{BookingStateMachine, EffectResolution, TransitionOptions};
use repairdesk_core::money::Money;
use repairdesk_core::ports::BookingRepository;
use repairdesk_db::repositories::{SqlBookingRepository, SqlDeviceCatalog};
use repairdesk_db::{connect_with_settings, migrations};

const TOGGLES: u32 = 60;

fn step(machine: &BookingStateMachine, booking: &mut Booking, to: BookingStatus, minute: i64) {
    let staff = Actor::new("admin-1", Role::Admin);
    let when = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap() + Duration::minutes(minute);
    let plan = machine
        .plan(booking, to, &staff, &TransitionOptions::default(), when)
        .expect("legal transition");
    machine.apply(booking, &plan, EffectResolution::default()).expect("apply");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn loads_never_observe_a_half_written_save() {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("repairdesk.db").display());
    let pool = connect_with_settings(&url, 4, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("run migrations");

    SqlDeviceCatalog::new(pool.clone())
        .register(&DeviceModel {
            id: DeviceModelId("fairphone-5".to_string()),
            brand: "Fairphone".to_string(),
            name: "Fairphone 5".to_string(),
            category: DeviceCategory::Smartphone,
        })
        .await
        .expect("register device");

    let repository = Arc::new(SqlBookingRepository::new(pool.clone()));
    let machine = BookingStateMachine::default();
    let mut booking = Booking::open(
        BookingId("BK-concurrent".to_string()),
        NewBooking {
            customer_id: CustomerId("cust-1".to_string()),
            device_model_id: DeviceModelId("fairphone-5".to_string()),
            repair_type: RepairType::ScreenRepair,
            urgency: UrgencyLevel::Standard,
            scheduled_date: None,
            estimated_completion: None,
        },
        Money::from_major(120),
        Money::from_major(120),
        Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap(),
    )
    .expect("open booking");
    step(&machine, &mut booking, BookingStatus::Confirmed, 0);
    step(&machine, &mut booking, BookingStatus::InProgress, 1);
    repository.insert_booking(&booking).await.expect("insert booking");

    let done = Arc::new(AtomicBool::new(false));
    let writer = {
        let repository = Arc::clone(&repository);
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            for toggle in 0..TOGGLES {
                let to = if booking.status() == BookingStatus::InProgress {
                    BookingStatus::WaitingParts
                } else {
                    BookingStatus::InProgress
                };
                step(&machine, &mut booking, to, 2 + i64::from(toggle));
                let expected = booking.version;
                booking.version =
                    repository.save_booking(&booking, expected).await.expect("save booking");
            }
            done.store(true, Ordering::SeqCst);
            booking
        })
    };

    let id = BookingId("BK-concurrent".to_string());
    let mut loads = 0_u32;
    while !done.load(Ordering::SeqCst) || loads == 0 {
        let loaded = repository
            .load_booking(&id)
            .await
            .expect("load succeeds while saves run")
            .expect("booking exists");
        let last = loaded.status_history().last().expect("history").to;
        assert_eq!(loaded.status(), last);
        loads += 1;
        tokio::task::yield_now().await;
    }

    let written = writer.await.expect("writer task");
    let reloaded = repository.load_booking(&id).await.expect("final load").expect("booking");
    assert_eq!(reloaded.status(), written.status());
    assert_eq!(reloaded.version, written.version);
    assert_eq!(reloaded.status_history().len(), 2 + TOGGLES as usize);
    pool.close().await;
}
