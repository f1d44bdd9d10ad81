//! Orchestrator behaviour seen from outside the crate

use parking_lot::Mutex;
use phonelink_core::config::AppConfig;
use phonelink_core::core::simulator::VirtualPhone;
use phonelink_core::{
    ExchangeSettings, OperationReport, Orchestrator, PhoneAlarm, PhoneError, PortConfig,
    SerialChannel,
};
use std::collections::HashSet;
use std::sync::Arc;

fn settings() -> ExchangeSettings {
    ExchangeSettings {
        read_timeout_ms: 15,
        settle_delay_ms: 0,
        max_trials: 2,
        upload_chunk_size: 32,
    }
}

fn recording(phone: &VirtualPhone) -> (Orchestrator<VirtualPhone>, Arc<Mutex<Vec<OperationReport>>>) {
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    let orchestrator = Orchestrator::new(phone.clone(), PortConfig::new("virtual", 115_200), settings())
        .on_done(move |report| sink.lock().push(report.clone()));
    (orchestrator, reports)
}

#[tokio::test]
async fn every_operation_reports_exactly_once() {
    let phone = VirtualPhone::with_sample_content();
    let (orchestrator, reports) = recording(&phone);

    let handles = vec![
        orchestrator.test_alive().id(),
        orchestrator.hangup().id(),
        orchestrator.delete_alarm(5).id(),
    ];
    let pictures = orchestrator.list_elements("PICTURES");
    let signal = orchestrator.signal_power();
    let caps = orchestrator.capabilities("JPEG");

    assert_eq!(pictures.join().await.unwrap().len(), 2);
    signal.join().await.unwrap();
    caps.join().await.unwrap();

    // The first three were dropped without joining; wait until they finish
    for _ in 0..500 {
        if reports.lock().len() == 6 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let reports = reports.lock();
    assert_eq!(reports.len(), 6);
    let ids: HashSet<_> = reports.iter().map(|r| r.id).collect();
    assert_eq!(ids.len(), 6);
    for id in &handles {
        assert!(ids.contains(id));
    }

    let failed: Vec<_> = reports.iter().filter(|r| !r.is_success()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].operation, "delete_alarm");
    assert_eq!(failed[0].code, -9);
    assert!(!phone.is_open());
}

#[tokio::test]
async fn upload_failures_surface_their_code() {
    let phone = VirtualPhone::new();
    let (orchestrator, reports) = recording(&phone);
    let dir = tempfile::tempdir().unwrap();

    let err = orchestrator
        .upload_file(dir.path().join("absent.png"), None)
        .join()
        .await
        .unwrap_err();
    assert!(matches!(err, PhoneError::InvalidFile(_)));

    let path = dir.path().join("logo.png");
    std::fs::write(&path, b"\x89PNG\r\n\x1a\n\x00\x00").unwrap();
    phone.respond_to("AT+KDOBJ=2,1,0", b"\r\nERROR\r\n");
    let err = orchestrator
        .upload_file(path.clone(), None)
        .join()
        .await
        .unwrap_err();
    assert_eq!(err.code(), -5);

    let codes: Vec<i32> = reports.lock().iter().map(|r| r.code).collect();
    assert_eq!(codes, vec![-12, -5]);
    assert_eq!(
        reports.lock()[1].message,
        Orchestrator::<VirtualPhone>::describe(-5)
    );
}

#[tokio::test]
async fn alarms_through_the_orchestrator() {
    let phone = VirtualPhone::new();
    let (orchestrator, _) = recording(&phone);

    let slots = orchestrator.alarm_slots().join().await.unwrap();
    let last = *slots.end();
    let alarm = PhoneAlarm::from_fields(last, None, "06:45", Some("6,7")).unwrap();
    orchestrator.add_alarm(alarm.clone()).join().await.unwrap();

    let alarms = orchestrator.list_alarms().join().await.unwrap();
    assert_eq!(alarms, vec![alarm]);
    assert_eq!(phone.alarms().len(), 1);
}

#[tokio::test]
async fn settings_come_from_the_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let mut config = AppConfig::default();
    config.port = PortConfig::new("virtual", 9600);
    config.exchange = settings();
    config.save_to(&path).unwrap();

    let loaded = AppConfig::load_from(&path).unwrap();
    let phone = VirtualPhone::with_sample_content();
    let orchestrator = Orchestrator::new(phone.clone(), loaded.port.clone(), loaded.exchange.clone());
    assert_eq!(orchestrator.config().baud_rate, 9600);

    let info = orchestrator.device_info().join().await.unwrap();
    assert!(info.imei.is_some());
}
