//! Publie un root device fictif sur le réseau local jusqu'à Ctrl-C.
//!
//! ```bash
//! cargo run -p pmossdp --example publish
//! PMOSSDP_CONFIG__SSDP__UDA_VERSION=1.0 cargo run -p pmossdp --example publish
//! ```
//!
//! Les annonces sont visibles avec n'importe quel outil de découverte UPnP
//! (ou `tcpdump -A udp port 1900`).

use pmoconfig::get_config;
use pmossdp::net::{NetworkInterface, guess_local_ip};
use pmossdp::{
    Resource, ResourceGroup, Scheduler, SsdpConfigExt, TokioClock, UdpTransport, build_client_on,
};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = get_config();

    // Initialiser le logging (console seulement si host.logger.enable_console)
    if config.get_log_enable_console() {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.get_log_min_level().to_lowercase()));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let interface = match config.get_ssdp_interface()? {
        Some(name) => NetworkInterface::by_name(&name)
            .ok_or_else(|| anyhow::anyhow!("Network interface '{}' not found", name))?,
        None => NetworkInterface::guess(),
    };
    let transport = UdpTransport::bind(&interface)?;
    let client = build_client_on(&config, interface, transport, TokioClock)?;

    let udn = format!("uuid:{}", uuid::Uuid::new_v4());
    let location = format!("http://{}:8080/device/desc.xml", guess_local_ip());
    let max_age = config.get_ssdp_max_age()?;
    let device_type = "urn:schemas-upnp-org:device:Basic:1";

    let mut group = ResourceGroup::new(&client);
    for (nt, usn) in [
        ("upnp:rootdevice".to_string(), format!("{}::upnp:rootdevice", udn)),
        (udn.clone(), udn.clone()),
        (device_type.to_string(), format!("{}::{}", udn, device_type)),
    ] {
        group.add_resource(Resource::new(&nt, &usn, &location)?.with_max_age(max_age)?)?;
    }
    group.set_available(true);

    println!("📡 Publishing {} at {} (Ctrl-C to stop)", udn, location);

    let mut scheduler = Scheduler::new();
    scheduler.insert(group);
    scheduler
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    println!("👋 Bye");
    Ok(())
}
