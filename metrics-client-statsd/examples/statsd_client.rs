use std::time::{Duration, Instant};

use metrics::Label;
use metrics_client_statsd::ClientBuilder;

fn main() {
    tracing_subscriber::fmt::init();

    let client = ClientBuilder::default()
        .with_prefix("demo.")
        .with_error_handler(|e| eprintln!("statsd error: {e}"))
        .build("udp", "localhost:8125")
        .expect("failed to build StatsD client");

    let tags = [Label::new("host", "localhost")];

    for shard in 0..10 {
        let start = Instant::now();
        std::thread::sleep(Duration::from_millis(25));

        client.increment("requests", &tags);
        client.count("bytes_read", 512, &tags);
        client.gauge("shards.active", shard, &[]);
        client.timing_fmt(start, format_args!("shard{shard}.latency"), &tags);
    }

    client.close();

    let stats = client.stats();
    println!("sent {} packets ({} bytes), dropped {}", stats.packets_sent, stats.bytes_sent, stats.packets_dropped);
}
