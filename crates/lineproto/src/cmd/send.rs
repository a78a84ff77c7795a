use std::fs;
use std::time::{Duration, Instant};

use lineproto_router::{Address, Delivery, DeliveryMode, DeliveryQueue, Router};

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{router_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_delivery, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let linger = args.linger.as_deref().map(parse_duration).transpose()?;
    let payload = resolve_payload(&args)?;

    let router = args.node.open(DeliveryMode::Queue)?;
    let queue = router
        .queue()
        .map_err(|err| router_error("delivery queue unavailable", err))?;

    router
        .send(args.to, &payload)
        .map_err(|err| router_error("send failed", err))?;

    if args.wait {
        let reply = wait_for_reply(&router, &queue, args.to, wait_timeout)?;
        print_delivery(&reply, format);
    }

    if let Some(linger) = linger {
        let deadline = Instant::now() + linger;
        while Instant::now() < deadline {
            router
                .process()
                .map_err(|err| router_error("relay failed", err))?;
        }
    }

    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    let payload = if let Some(data) = &args.data {
        data.as_bytes().to_vec()
    } else if let Some(hex) = &args.hex {
        decode_hex(hex)?
    } else if let Some(path) = &args.file {
        fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        })?
    } else {
        Vec::new()
    };

    // A zero-length packet is a keepalive and never reaches the application.
    if payload.is_empty() {
        return Err(CliError::new(
            USAGE,
            "payload must not be empty (use --data, --hex or --file)",
        ));
    }
    Ok(payload)
}

fn decode_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: Vec<char> = input.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(CliError::new(USAGE, "--hex needs an even number of digits"));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let text: String = pair.iter().collect();
            u8::from_str_radix(&text, 16)
                .map_err(|_| CliError::new(USAGE, format!("--hex has invalid byte {text:?}")))
        })
        .collect()
}

fn wait_for_reply(
    router: &Router,
    queue: &DeliveryQueue,
    from: Address,
    timeout: Duration,
) -> CliResult<Delivery> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        router
            .process()
            .map_err(|err| router_error("receive failed", err))?;
        while let Some(delivery) = queue.try_recv() {
            if delivery.src == from {
                return Ok(delivery);
            }
        }
    }
    Err(CliError::new(
        TIMEOUT,
        format!("no reply from {from} within {timeout:?}"),
    ))
}
