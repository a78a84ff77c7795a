//! Three nodes in a line, joined by socket pairs instead of serial cables.
//!
//! Run with:
//!   cargo run --example socket-mesh
//!
//! Node `0x0a` sends to `0x0c`. Nothing is configured up front: the relay in
//! the middle floods the first packet, and the reply travels back over the
//! routes learned on the way.

#[cfg(unix)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use std::os::unix::net::UnixStream;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    use lineproto::router::{Address, Router, RouterConfig, Timing};
    use lineproto::transport::{FdLink, Link};

    fn wire(name: &str) -> std::io::Result<(Box<dyn Link>, Box<dyn Link>)> {
        let (a, b) = UnixStream::pair()?;
        a.set_nonblocking(true)?;
        b.set_nonblocking(true)?;
        Ok((
            Box::new(FdLink::new(format!("{name}:left"), a)),
            Box::new(FdLink::new(format!("{name}:right"), b)),
        ))
    }

    let config = |addr: u8| {
        RouterConfig::new(Address::new(addr), 4).with_timing(Timing {
            poll_timeout: Duration::from_millis(5),
            ..Timing::default()
        })
    };

    let (ab, ba) = wire("ab")?;
    let (bc, cb) = wire("bc")?;
    let a = Arc::new(Router::new(config(0x0A), vec![ab])?);
    let b = Router::new(config(0x0B), vec![ba, bc])?;
    let c = Arc::new(Router::new(config(0x0C), vec![cb])?);

    let (done_tx, done_rx) = mpsc::channel();
    a.register_callback(move |src, _dst, payload| {
        let _ = done_tx.send((src, payload.to_vec()));
    })?;

    let replier = Arc::downgrade(&c);
    c.register_callback(move |src, _dst, payload| {
        println!("0x0c got {:?} from {src}", String::from_utf8_lossy(payload));
        if let Some(c) = replier.upgrade() {
            let _ = c.send(src, b"pong");
        }
    })?;

    a.send(Address::new(0x0C), b"ping")?;
    for _ in 0..50 {
        a.process()?;
        b.process()?;
        c.process()?;
        if let Ok((src, payload)) = done_rx.try_recv() {
            println!("0x0a got {:?} from {src}", String::from_utf8_lossy(&payload));
            break;
        }
    }

    for route in b.get_lut() {
        println!("relay route: {} via {} ({} hops)", route.address, route.link, route.hops);
    }
    Ok(())
}

#[cfg(not(unix))]
fn main() {
    eprintln!("socket-mesh needs Unix domain sockets");
}
