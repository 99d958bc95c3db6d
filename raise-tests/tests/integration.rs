//! End-to-end tests: real TLS sockets over loopback, a real broker accept
//! loop, real worker and client endpoints. No mocks.

mod support;

use raise_common::transport::Identity;

#[tokio::test]
async fn client_with_unpinned_certificate_is_rejected() {
    let (broker, _pinned_identity) = support::start_broker().await;

    let rogue = raise_common::certs::generate_self_signed("rogue-client").unwrap();
    let rogue_identity =
        Identity::from_pem_bytes(rogue.cert_pem.as_bytes(), rogue.key_pem.as_bytes()).unwrap();

    let result =
        raise_common::transport::dial_client(&broker.url, rogue_identity, broker.cert_der.clone()).await;
    assert!(result.is_err(), "unpinned client must not be able to upgrade to /client");
}

#[tokio::test]
async fn dialing_with_the_wrong_broker_cert_pin_fails_the_handshake() {
    let (broker, identity) = support::start_broker().await;

    let wrong_cert = raise_common::certs::generate_self_signed("impostor-broker").unwrap();
    let wrong_pin = rustls::pki_types::CertificateDer::from(wrong_cert.cert_der);

    let result = raise_common::transport::dial_client(&broker.url, identity, wrong_pin).await;
    assert!(result.is_err(), "a client must refuse to trust a broker presenting an unexpected certificate");
}

#[tokio::test]
async fn worker_registers_and_is_discoverable() {
    let (broker, identity) = support::start_broker().await;
    let _worker = support::connect_worker(&broker, "alpha").await;

    let client = support::connect_client(&broker, identity).await;
    let workers = client.get_workers().await.unwrap();

    assert_eq!(workers, vec!["alpha".to_string()]);
}

#[tokio::test]
async fn ping_is_forwarded_to_the_named_worker() {
    let (broker, identity) = support::start_broker().await;
    let _worker = support::connect_worker(&broker, "alpha").await;
    let client = support::connect_client(&broker, identity).await;

    let message = client.remote("alpha").ping().await.unwrap();
    assert_eq!(message, "Hello from worker alpha");
}

#[tokio::test]
async fn ping_with_no_target_answers_from_the_broker_itself() {
    let (broker, identity) = support::start_broker().await;
    let client = support::connect_client(&broker, identity).await;

    let message = client.ping_broker().await.unwrap();
    assert_eq!(message, "pong");
}

#[tokio::test]
async fn get_info_reports_plausible_host_facts() {
    let (broker, identity) = support::start_broker().await;
    let _worker = support::connect_worker(&broker, "alpha").await;
    let client = support::connect_client(&broker, identity).await;

    let info = client.remote("alpha").info().await.unwrap();
    assert!(!info.hostname.is_empty());
    assert!(!info.architecture.is_empty());
}

#[tokio::test]
async fn write_then_read_file_round_trips_exact_bytes() {
    let (broker, identity) = support::start_broker().await;
    let _worker = support::connect_worker(&broker, "alpha").await;
    let client = support::connect_client(&broker, identity).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("payload.bin");
    let payload = vec![0u8, 1, 2, 255, 254, 10, 13, 0];

    client
        .remote("alpha")
        .write_file(path.to_str().unwrap(), payload.clone())
        .await
        .unwrap();

    let read_back = client
        .remote("alpha")
        .read_file(path.to_str().unwrap())
        .await
        .unwrap();

    assert_eq!(read_back, payload);
}

#[tokio::test]
async fn run_script_returns_combined_stdout_and_stderr() {
    let (broker, identity) = support::start_broker().await;
    let _worker = support::connect_worker(&broker, "alpha").await;
    let client = support::connect_client(&broker, identity).await;

    let output = client
        .remote("alpha")
        .run_script(b"echo hello-from-worker".to_vec())
        .await
        .unwrap();

    let output = String::from_utf8(output).unwrap();
    assert!(output.contains("hello-from-worker"));
}

#[tokio::test]
async fn run_script_fails_when_the_shell_exits_nonzero() {
    let (broker, identity) = support::start_broker().await;
    let _worker = support::connect_worker(&broker, "alpha").await;
    let client = support::connect_client(&broker, identity).await;

    let result = client
        .remote("alpha")
        .run_script(b"echo oops >&2; exit 7".to_vec())
        .await;
    assert!(result.is_err(), "a nonzero exit status must surface as an error");
}

#[tokio::test]
async fn reading_a_nonexistent_file_surfaces_as_an_error() {
    let (broker, identity) = support::start_broker().await;
    let _worker = support::connect_worker(&broker, "alpha").await;
    let client = support::connect_client(&broker, identity).await;

    let result = client.remote("alpha").read_file("/does/not/exist/anywhere").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn calls_against_an_unknown_worker_fail_cleanly() {
    let (broker, identity) = support::start_broker().await;
    let client = support::connect_client(&broker, identity).await;

    let result = client.remote("does-not-exist").ping().await;
    assert!(result.is_err());
}

#[tokio::test]
async fn many_concurrent_calls_all_complete() {
    let (broker, identity) = support::start_broker().await;
    let _worker = support::connect_worker(&broker, "alpha").await;
    let client = support::connect_client(&broker, identity).await;

    let mut handles = Vec::new();
    for _ in 0..32 {
        let remote_ping = client.remote("alpha");
        handles.push(tokio::spawn(async move { remote_ping.ping().await }));
    }

    for handle in handles {
        let message = handle.await.unwrap().unwrap();
        assert_eq!(message, "Hello from worker alpha");
    }
}

#[tokio::test]
async fn worker_disconnect_removes_it_from_the_directory() {
    let (broker, identity) = support::start_broker().await;
    let worker = support::connect_worker(&broker, "alpha").await;
    let client = support::connect_client(&broker, identity).await;

    assert_eq!(client.get_workers().await.unwrap(), vec!["alpha".to_string()]);

    worker.close();
    drop(worker);

    // Give the broker's serve loop a moment to notice the closed socket and
    // deregister the worker.
    for _ in 0..50 {
        if client.get_workers().await.unwrap().is_empty() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("worker was not removed from the registry after disconnecting");
}
