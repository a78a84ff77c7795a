//! Echo node: relays mesh traffic and answers every packet addressed to it.
//!
//! Run with:
//!   cargo run --example relay-node -- 0x0b /dev/ttyUSB0 /dev/ttyUSB1
//!
//! From a node on the other end of either link:
//!   cargo run --features cli -- send /dev/ttyUSB2 -a 0x01 --to 0x0b \
//!     --data hello --wait

use std::sync::{Arc, Weak};

use lineproto::router::{Address, Router, RouterConfig};
use lineproto::transport::SerialConfig;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let address = args.next().ok_or("usage: relay-node <address> <device>...")?;
    let address = u8::from_str_radix(address.trim_start_matches("0x"), 16)?;
    let devices: Vec<String> = args.collect();
    if devices.is_empty() {
        return Err("at least one device is required".into());
    }

    let config = RouterConfig::new(Address::new(address), 8);
    let router = Arc::new(Router::open(config, devices.as_slice(), &SerialConfig::default())?);

    let echo: Weak<Router> = Arc::downgrade(&router);
    router.register_callback(move |src, _dst, payload| {
        eprintln!("{} bytes from {src}", payload.len());
        if let Some(router) = echo.upgrade() {
            if let Err(err) = router.send(src, payload) {
                eprintln!("echo to {src} failed: {err}");
            }
        }
    })?;

    eprintln!("node {} up on {} link(s)", router.address(), devices.len());
    router.serve_forever()?;
    Ok(())
}
