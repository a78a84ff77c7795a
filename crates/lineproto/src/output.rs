use std::io::{IsTerminal, Write};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use lineproto_router::{Delivery, RouteSnapshot, RouterStats};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct DeliveryOutput {
    kind: &'static str,
    src: String,
    dst: String,
    broadcast: bool,
    payload_size: usize,
    payload: String,
    timestamp: String,
}

#[derive(Serialize)]
struct StatsOutput<'a> {
    kind: &'static str,
    #[serde(flatten)]
    stats: &'a RouterStats,
}

#[derive(Serialize)]
struct RouteOutput {
    address: String,
    link: String,
    hops: u8,
    age_ms: u128,
}

#[derive(Serialize)]
struct LutOutput {
    kind: &'static str,
    routes: Vec<RouteOutput>,
}

pub fn print_delivery(delivery: &Delivery, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = DeliveryOutput {
                kind: "delivery",
                src: delivery.src.to_string(),
                dst: delivery.dst.to_string(),
                broadcast: delivery.is_broadcast,
                payload_size: delivery.payload.len(),
                payload: payload_preview(&delivery.payload),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SRC", "DST", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    delivery.src.to_string(),
                    delivery.dst.to_string(),
                    delivery.payload.len().to_string(),
                    payload_preview(&delivery.payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "src={} dst={}{} size={} payload={}",
                delivery.src,
                delivery.dst,
                if delivery.is_broadcast { " (broadcast)" } else { "" },
                delivery.payload.len(),
                payload_preview(&delivery.payload)
            );
        }
        OutputFormat::Raw => print_raw(&delivery.payload),
    }
}

pub fn print_stats(stats: &RouterStats, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(&StatsOutput {
            kind: "stats",
            stats,
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["STAT", "VALUE"]);
            for (key, value) in stats_rows(stats) {
                table.add_row(vec![key, value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (key, value) in stats_rows(stats) {
                println!("{key}={value}");
            }
        }
    }
}

pub fn print_lut(routes: &[RouteSnapshot], now: Instant, format: OutputFormat) {
    let rows: Vec<RouteOutput> = routes
        .iter()
        .map(|route| RouteOutput {
            address: route.address.to_string(),
            link: route.link.clone(),
            hops: route.hops,
            age_ms: now.saturating_duration_since(route.last_seen).as_millis(),
        })
        .collect();

    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(&LutOutput {
            kind: "lut",
            routes: rows,
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ADDRESS", "LINK", "HOPS", "AGE"]);
            for row in rows {
                table.add_row(vec![
                    row.address,
                    row.link,
                    row.hops.to_string(),
                    format!("{}ms", row.age_ms),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in rows {
                println!(
                    "address={} link={} hops={} age={}ms",
                    row.address, row.link, row.hops, row.age_ms
                );
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

/// Flatten a stats snapshot into display rows.
fn stats_rows(stats: &RouterStats) -> Vec<(String, String)> {
    let mut rows = Vec::new();
    if let Ok(serde_json::Value::Object(counters)) = serde_json::to_value(stats.counters) {
        rows.extend(counters.into_iter().map(|(key, value)| (key, value.to_string())));
    }

    rows.push(("lut_len".to_string(), stats.lut_len.to_string()));
    rows.push(("callbacks_len".to_string(), stats.callbacks_len.to_string()));
    rows.push((
        "bcast_callbacks_len".to_string(),
        stats.bcast_callbacks_len.to_string(),
    ));
    rows.push(("queue_len".to_string(), stats.queue_len.to_string()));
    rows.push(("max_hop".to_string(), stats.max_hop.to_string()));
    rows.push((
        "last_keepalive_age".to_string(),
        format_age(stats.last_keepalive_age),
    ));

    for (addr, sent) in &stats.keepalives_sent {
        rows.push((
            format!("keepalives_sent[{addr}]"),
            format!("{} (last {} ago)", sent.counter, format_age(Some(sent.age))),
        ));
    }
    for link in &stats.links {
        rows.push((
            format!("link[{}]", link.name),
            format!(
                "buffered={} since_new_bytes={} since_pop={}",
                link.buffered,
                format_age(link.since_new_bytes),
                format_age(link.since_pop)
            ),
        ));
    }
    rows
}

fn format_age(age: Option<Duration>) -> String {
    match age {
        Some(age) => format!("{:.1}s", age.as_secs_f64()),
        None => "never".to_string(),
    }
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use lineproto_router::{Counters, KeepaliveSnapshot, LinkStats};

    use super::*;

    fn sample_stats() -> RouterStats {
        let mut keepalives_sent = BTreeMap::new();
        keepalives_sent.insert(
            "0x02".to_string(),
            KeepaliveSnapshot {
                counter: 2,
                age: Duration::from_millis(1500),
            },
        );
        RouterStats {
            counters: Counters {
                sent: 3,
                ..Counters::default()
            },
            links: vec![LinkStats {
                name: "/dev/ttyS0".to_string(),
                buffered: 12,
                since_new_bytes: Some(Duration::from_secs(2)),
                since_pop: None,
            }],
            lut_len: 1,
            callbacks_len: 0,
            bcast_callbacks_len: 0,
            queue_len: 0,
            last_keepalive_age: None,
            max_hop: 8,
            keepalives_sent,
        }
    }

    #[test]
    fn stats_rows_cover_counters_and_state() {
        let rows: BTreeMap<String, String> = stats_rows(&sample_stats()).into_iter().collect();
        assert_eq!(rows["sent_packets"], "3");
        assert_eq!(rows["dropped_packets"], "0");
        assert_eq!(rows["max_hop"], "8");
        assert_eq!(rows["last_keepalive_age"], "never");
        assert_eq!(rows["keepalives_sent[0x02]"], "2 (last 1.5s ago)");
        assert_eq!(
            rows["link[/dev/ttyS0]"],
            "buffered=12 since_new_bytes=2.0s since_pop=never"
        );
    }

    #[test]
    fn payload_preview_marks_binary() {
        assert_eq!(payload_preview(b"hello"), "hello");
        assert_eq!(payload_preview(&[0xff, 0xfe]), "<binary 2 bytes>");
    }
}
