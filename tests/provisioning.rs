use anyhow::Result;
use std::{
    fs,
    io::{Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};
use tempfile::TempDir;
use tronbyt_client::{
    board::Restarter,
    clock::SystemClock,
    device_config::{ConfigStore, DeviceConfig, FrameProfile},
    host::HostAccessPoint,
    provisioning::{PORTAL_URL, ProvisioningServer},
};

/// Restarter that only counts, so the flow returns to the caller.
#[derive(Clone, Default)]
struct CountingRestarter {
    calls: Arc<AtomicUsize>,
}

impl Restarter for CountingRestarter {
    fn restart(&mut self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn exchange(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).expect("failed to connect to portal");
    stream
        .write_all(request.as_bytes())
        .expect("failed to send request");

    let mut reply = String::new();
    stream
        .read_to_string(&mut reply)
        .expect("failed to read reply");
    reply
}

fn post_save(addr: SocketAddr, body: &str) -> String {
    exchange(
        addr,
        &format!(
            "POST /save HTTP/1.1\r\nHost: 192.168.4.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        ),
    )
}

#[test]
fn test_full_setup_over_the_portal() {
    // Create a temporary directory for the persisted record
    let temp_dir = TempDir::new().expect("failed to create temp directory");
    let store = ConfigStore::new(temp_dir.path().join("device.ini"));
    assert!(store.needs_provisioning());

    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind portal");
    let addr = listener.local_addr().expect("failed to get local address");

    let restarter = CountingRestarter::default();
    let calls = Arc::clone(&restarter.calls);

    // Run the provisioning flow in the background
    let server_store = store.clone();
    let handle = thread::spawn(move || {
        let mut restarter = restarter;
        let mut server =
            ProvisioningServer::new(HostAccessPoint::default(), SystemClock::new(), server_store)
                .with_profile(FrameProfile::Bridge);
        server.run(&listener, &mut restarter)
    });

    // The setup form
    let page = exchange(addr, "GET / HTTP/1.1\r\nHost: 192.168.4.1\r\n\r\n");
    assert!(page.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(page.contains("Content-Type: text/html"));
    assert!(page.contains("<form"));

    // Captive portal probes are sent to the portal
    let probe = exchange(addr, "GET /generate_204 HTTP/1.1\r\nHost: connectivitycheck\r\n\r\n");
    assert!(probe.starts_with("HTTP/1.1 302 Found\r\n"));
    assert!(probe.contains(&format!("Location: {PORTAL_URL}\r\n")));

    // A submission without display id is refused and nothing is written
    let refused = post_save(addr, r#"{"ssid":"home","password":"secret"}"#);
    assert!(refused.ends_with(r#"{"success":false,"message":"WiFi SSID and Display ID are required"}"#));
    assert!(store.needs_provisioning());

    // A complete submission is persisted and ends the flow
    let accepted = post_save(
        addr,
        r#"{"ssid":"home","password":"secret","display_id":"kitchen","server_url":"http://10.0.0.5:8000/"}"#,
    );
    assert!(accepted.ends_with(r#"{"success":true}"#));

    let config = handle
        .join()
        .expect("provisioning thread panicked")
        .expect("provisioning failed");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(config.ssid, "home");
    assert_eq!(config.server_url, "http://10.0.0.5:8000");
    assert_eq!(config.display_id, "kitchen");
    assert_eq!(config.profile, FrameProfile::Bridge);

    assert!(!store.needs_provisioning());
    assert_eq!(store.load().expect("load failed"), Some(config));
}

#[test]
fn test_saving_the_same_config_twice_is_byte_identical() {
    let temp_dir = TempDir::new().expect("failed to create temp directory");
    let store = ConfigStore::new(temp_dir.path().join("device.ini"));
    let config = DeviceConfig::new("home", "secret", "", "kitchen");

    store.save(&config).expect("first save failed");
    let first = fs::read(store.path()).expect("failed to read record");

    store.save(&config).expect("second save failed");
    let second = fs::read(store.path()).expect("failed to read record");

    assert_eq!(first, second);
    // no temporary file is left behind
    assert_eq!(
        fs::read_dir(temp_dir.path())
            .expect("failed to list temp directory")
            .count(),
        1
    );
}
