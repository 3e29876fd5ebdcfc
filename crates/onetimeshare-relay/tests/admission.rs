//! Rate limiting as seen through the service operations

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use onetimeshare_relay::schema::CreateSecretRequest;
use onetimeshare_relay::{ClientIdentity, MemoryStore, RelayConfig, RelayError, SecretService};

fn service() -> SecretService {
    SecretService::from_config(&RelayConfig::default(), Arc::new(MemoryStore::new())).unwrap()
}

#[test_log::test(tokio::test(start_paused = true))]
async fn sixth_create_in_window_is_rejected_then_admitted_after_rollover() {
    let service = service();
    let client = ClientIdentity::from("203.0.113.9");

    for _ in 0..5 {
        service
            .create_secret(&client, CreateSecretRequest::new("c"))
            .await
            .unwrap();
    }

    match service
        .create_secret(&client, CreateSecretRequest::new("c"))
        .await
    {
        Err(RelayError::RateLimited { retry_after_secs }) => {
            assert!((1..=60).contains(&retry_after_secs))
        }
        other => panic!("expected rate limit, got {:?}", other),
    }

    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(service
        .create_secret(&client, CreateSecretRequest::new("c"))
        .await
        .is_ok());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn eleventh_read_in_window_is_rejected() {
    let service = service();
    let client = ClientIdentity::from("203.0.113.9");

    for _ in 0..10 {
        assert!(matches!(
            service.read_secret(&client, "0123456789abcdef").await,
            Err(RelayError::NotFound)
        ));
    }
    let err = service
        .read_secret(&client, "0123456789abcdef")
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::RateLimited { .. }));
    assert_eq!(err.status_code(), 429);
    assert!(err.is_retryable());

    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(matches!(
        service.read_secret(&client, "0123456789abcdef").await,
        Err(RelayError::NotFound)
    ));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn clients_behind_one_proxy_are_told_apart() {
    let service = service();
    let proxy = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    let admission = service.admission();

    let alice = admission.identify(Some("198.51.100.1, 10.0.0.1"), proxy);
    let bob = admission.identify(Some("198.51.100.2"), proxy);
    assert_ne!(alice, bob);

    for _ in 0..5 {
        service
            .create_secret(&alice, CreateSecretRequest::new("c"))
            .await
            .unwrap();
    }
    assert!(service
        .create_secret(&alice, CreateSecretRequest::new("c"))
        .await
        .is_err());
    assert!(service
        .create_secret(&bob, CreateSecretRequest::new("c"))
        .await
        .is_ok());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn idle_windows_are_reclaimed_by_purge_task() {
    let service = service().with_purge_task(Duration::from_secs(60));

    for i in 0..1000u32 {
        let client = ClientIdentity::from(format!("198.51.{}.{}", i / 256, i % 256).as_str());
        assert!(matches!(
            service.read_secret(&client, "0123456789abcdef").await,
            Err(RelayError::NotFound)
        ));
    }
    assert_eq!(service.admission().tracked(), 1000);

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(service.admission().tracked(), 0);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn windows_survive_without_purge_task_until_purged() {
    let service = service();
    service
        .read_secret(&ClientIdentity::from("198.51.100.1"), "0123456789abcdef")
        .await
        .unwrap_err();

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(service.admission().tracked(), 1);
    assert_eq!(service.admission().purge_expired(), 1);
}
