//! Subscribe - stream notifications from one or more CMW-light servers.
//!
//! This example demonstrates:
//! - Building a connection factory with the fluent builder
//! - Resolving device names through a directory
//! - Multiplexing several connections with a `Poller`
//!
//! # Running
//!
//! ```text
//! CMW_DEVICES="GSCD001=tcp://fel0001:5000,GSCD002=tcp://fel0002:5000" \
//! RUST_LOG=cmwlight_client=debug \
//!     cargo run --example subscribe -- SnoopTriggerEvents FAIR.SELECTOR.ALL
//! ```

use std::ops::ControlFlow;
use std::time::Duration;

use cmwlight_client::protocol::{Message, ReplyKind};
use cmwlight_client::transport::TcpTransport;
use cmwlight_client::{Client, FairSelector, FieldMap, Poller, StaticDirectory};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let property = args.next().unwrap_or_else(|| "SnoopTriggerEvents".to_string());
    let selector: FairSelector = args
        .next()
        .unwrap_or_else(|| "FAIR.SELECTOR.ALL".to_string())
        .parse()?;

    let devices = std::env::var("CMW_DEVICES")
        .unwrap_or_else(|_| "GSCD001=tcp://localhost:5000".to_string());
    let mut directory = StaticDirectory::new();
    let mut names = Vec::new();
    for entry in devices.split(',') {
        let (name, address) = entry
            .split_once('=')
            .ok_or_else(|| format!("invalid CMW_DEVICES entry '{entry}'"))?;
        directory.insert(name, address);
        names.push(name.to_string());
    }

    let factory = Client::builder()
        .heartbeat_interval(Duration::from_secs(1))
        .build()?;

    let mut poller = Poller::new();
    for name in &names {
        let mut connection = factory.connection_for_device(&directory, name, TcpTransport::new())?;
        connection.subscribe(name, &property, &selector.to_string(), FieldMap::new())?;
        poller.add(connection);
    }

    poller
        .run(Duration::from_millis(100), |index, message| {
            let Message::Reply(reply) = message else {
                return ControlFlow::Continue(());
            };
            match reply.kind {
                ReplyKind::NotificationData {
                    notification_id,
                    data,
                    context,
                } => println!(
                    "[{}] {}/{} #{} cycle={} bytes={}",
                    names[index],
                    reply.header.device_name,
                    reply.header.property_name,
                    notification_id,
                    context.cycle_name,
                    data.len()
                ),
                ReplyKind::NotificationException(exception)
                | ReplyKind::SubscribeException(exception) => {
                    eprintln!("[{}] exception: {}", names[index], exception.message)
                }
                _ => {}
            }
            ControlFlow::Continue(())
        })
        .await?;
    Ok(())
}
