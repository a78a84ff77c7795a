use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use lineproto_router::{DeliveryMode, Router};
use tracing::info;

use crate::cmd::{parse_duration, ServeArgs};
use crate::exit::{router_error, CliError, CliResult, SUCCESS};
use crate::output::{print_delivery, print_lut, print_stats, OutputFormat};

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let stats_interval = args
        .stats_interval
        .as_deref()
        .map(parse_duration)
        .transpose()?;

    let router = args.node.open(DeliveryMode::Queue)?;
    for addr in &args.broadcast {
        router
            .subscribe_broadcast(*addr)
            .map_err(|err| router_error("subscribe failed", err))?;
    }
    let queue = router
        .queue()
        .map_err(|err| router_error("delivery queue unavailable", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    info!(
        address = %router.address(),
        links = args.node.devices.len(),
        "node up"
    );

    let mut printed = 0usize;
    let mut last_report = Instant::now();

    'serve: while running.load(Ordering::SeqCst) {
        router
            .process()
            .map_err(|err| router_error("serve failed", err))?;

        while let Some(delivery) = queue.try_recv() {
            print_delivery(&delivery, format);
            printed = printed.saturating_add(1);
            if args.count.is_some_and(|count| printed >= count) {
                break 'serve;
            }
        }

        if let Some(interval) = stats_interval {
            if last_report.elapsed() >= interval {
                report(&router, format);
                last_report = Instant::now();
            }
        }
    }

    info!(printed, "node down");
    if args.stats {
        report(&router, format);
    }
    Ok(SUCCESS)
}

fn report(router: &Router, format: OutputFormat) {
    print_stats(&router.get_stats(), format);
    print_lut(&router.get_lut(), Instant::now(), format);
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
