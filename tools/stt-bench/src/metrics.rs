use kyutai_stt_loadgen::RunOutcome;
use lazy_static::lazy_static;
use prometheus::{histogram_opts, register_histogram, register_int_counter};
use prometheus::{Histogram, IntCounter};

pub mod run {
    use super::*;
    lazy_static! {
        pub static ref RUNS: IntCounter =
            register_int_counter!("loadgen_runs_total", "Number of load runs started.").unwrap();
        pub static ref FAILURES: IntCounter = register_int_counter!(
            "loadgen_run_failures_total",
            "Number of runs that could not start a single session."
        )
        .unwrap();
        pub static ref DURATION: Histogram = register_histogram!(histogram_opts!(
            "loadgen_run_duration_seconds",
            "Wall time of completed runs.",
            vec![1.0, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0, 300.0],
        ))
        .unwrap();
    }
}

pub mod session {
    use super::*;
    lazy_static! {
        pub static ref REQUESTED: IntCounter = register_int_counter!(
            "loadgen_sessions_requested_total",
            "Sessions requested across all runs."
        )
        .unwrap();
        pub static ref ESTABLISHED: IntCounter = register_int_counter!(
            "loadgen_sessions_established_total",
            "Sessions whose websocket handshake succeeded."
        )
        .unwrap();
        pub static ref ERRORS: IntCounter = register_int_counter!(
            "loadgen_session_errors_total",
            "Sessions that ended with an error, cancellation included."
        )
        .unwrap();
        pub static ref SAMPLES: IntCounter = register_int_counter!(
            "loadgen_latency_samples_total",
            "Distinguishable recognition updates observed."
        )
        .unwrap();
        pub static ref AVG_DELAY: Histogram = register_histogram!(histogram_opts!(
            "loadgen_session_avg_delay_seconds",
            "Per-session average recognition delay.",
            vec![0.05, 0.1, 0.2, 0.3, 0.5, 0.75, 1.0, 2.0, 5.0],
        ))
        .unwrap();
    }
}

pub fn record_outcome(outcome: &RunOutcome) {
    run::RUNS.inc();
    run::DURATION.observe(outcome.wall_time.as_secs_f64());
    session::REQUESTED.inc_by(outcome.requested as u64);
    session::ESTABLISHED.inc_by(outcome.established() as u64);
    session::ERRORS.inc_by(outcome.failed() as u64);
    session::SAMPLES.inc_by(outcome.total_samples());
    for res in outcome.results.iter().filter(|r| r.samples > 0) {
        session::AVG_DELAY.observe(res.average_delay.as_secs_f64());
    }
}

pub fn record_failure(requested: usize) {
    run::RUNS.inc();
    run::FAILURES.inc();
    session::REQUESTED.inc_by(requested as u64);
}

/// Prometheus text exposition of the default registry.
pub fn render() -> anyhow::Result<(String, Vec<u8>)> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = vec![];
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok((encoder.format_type().to_string(), buffer))
}
