use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_client_statsd::ClientBuilder;

fn main() {
    tracing_subscriber::fmt::init();

    ClientBuilder::default()
        .with_prefix("demo.")
        .with_flush_period(Duration::from_millis(500))
        .with_error_handler(|e| eprintln!("statsd error: {e}"))
        .install("udp", "localhost:8125")
        .expect("failed to install StatsD recorder");

    gauge!("testing").set(42.0);

    let server_loops = counter!("server_loops", "system" => "foo");
    let loop_delta_ms = histogram!("server_loop_delta_ms", "system" => "foo");

    // Loop over and over, pretending to do some work.
    let mut iteration = 0u64;
    loop {
        server_loops.increment(1);
        loop_delta_ms.record((iteration % 100) as f64 / 10.0);

        let gauge = gauge!("lucky_iterations");
        if iteration % 4 == 0 {
            gauge.decrement(1.0);
        } else {
            gauge.increment(1.0);
        }

        iteration += 1;
        std::thread::sleep(Duration::from_millis(10));
    }
}
