use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};
use log::{error, info, warn};
use std::{
    io::Write,
    net::{Ipv4Addr, TcpListener},
    thread,
    time::Duration,
};
use tronbyt_client::{
    clock::SystemClock,
    config::AppConfig,
    device_config::{ConfigStore, DeviceConfig},
    host::{self, ExecRestarter, HostAccessPoint},
    provisioning::ProvisioningServer,
    runtime::RuntimeLoop,
    transport::TransportClient,
};

/// Wake-up interval of the halted device.
const HALT_SLEEP: Duration = Duration::from_secs(3600);

fn main() {
    if let Err(e) = run() {
        error!("application error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    initialize();

    let app = AppConfig::get();
    let store =
        ConfigStore::new(&app.config_path).with_default_profile(host::HOST_PROFILE);

    let device = if store.needs_provisioning() {
        provision(app, &store)?
    } else {
        store
            .load()?
            .context(format!("config disappeared: {:?}", store.path()))?
    };

    let board = host::board(device.width, device.height, &app.trigger_dir)?;
    info!("board capabilities: {:?}", board.capabilities());

    let transport = TransportClient::new(app.transport.timeout, app.transport.max_redirects);
    let mut runtime = RuntimeLoop::new(board, device, app.runtime.clone(), transport);

    match runtime.run() {
        Ok(never) => match never {},
        Err(e) => {
            error!("halting: {e}");
            halt()
        }
    }
}

fn initialize() {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stdout).init();

    info!("module version: {}", env!("CARGO_PKG_VERSION"));
}

fn provision(app: &AppConfig, store: &ConfigStore) -> Result<DeviceConfig> {
    warn!("no usable configuration, entering setup mode");

    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, app.portal.port))
        .context(format!("failed to bind setup portal to port {}", app.portal.port))?;

    let mut server =
        ProvisioningServer::new(HostAccessPoint::default(), SystemClock::new(), store.clone())
            .with_profile(host::HOST_PROFILE);

    server
        .run(&listener, &mut ExecRestarter)
        .context("provisioning failed")
}

/// Stay idle until the device is reset from outside.
fn halt() -> ! {
    loop {
        thread::sleep(HALT_SLEEP);
    }
}
