//! Round-trip latency between two endpoints.
//!
//! Endpoint 0 sends a message, endpoint 1 echoes it back; each round trip is
//! timed with the cycle counter.
//!
//! ```bash
//! cargo run --release --bin one2one -- --reps 1000000 --cores 0,1
//! ```

use clap::Parser;
use ssmp_benchmarks::{init_logging, launch, write_json_report, BenchmarkResult, CommonArgs};
use ssmp_benchmarks::{Statistics, TickCalibration};
use ssmp_core::{get_ticks, Message, OrExit, BARRIER_ALL};

#[derive(Parser, Debug)]
#[command(name = "one2one", about = "Ping-pong latency between two endpoints")]
struct Cli {
    /// Measured round trips
    #[arg(long, default_value_t = 1_000_000)]
    reps: u64,

    /// Unmeasured round trips before timing starts
    #[arg(long, default_value_t = 10_000)]
    warmup: u64,

    /// Keep preemption spikes in the statistics
    #[arg(long)]
    keep_outliers: bool,

    #[command(flatten)]
    common: CommonArgs,
}

const STOP: i32 = -1;

fn main() {
    init_logging();
    let cli = Cli::parse();
    let config = cli.common.to_config().or_exit("invalid configuration");
    let calibration = TickCalibration::measure(200);

    launch(config, 2, |ep| {
        if ep.id().get() == 1 {
            loop {
                let msg = ep.recv_from(0u32);
                if msg.w0() == STOP {
                    break;
                }
                ep.send(0u32, &msg);
            }
            ep.barrier_wait(BARRIER_ALL);
            return;
        }

        let mut msg = Message::new();
        for i in 0..cli.warmup {
            msg.set_word(0, i as i32 & i32::MAX);
            ep.send(1u32, &msg);
            ep.recv_from(1u32);
        }

        let mut samples = Vec::with_capacity(cli.reps as usize);
        let started = std::time::Instant::now();
        for i in 0..cli.reps {
            msg.set_word(0, i as i32 & i32::MAX);
            let start = get_ticks();
            ep.send(1u32, &msg);
            let reply = ep.recv_from(1u32);
            let end = get_ticks();
            debug_assert_eq!(reply.w0(), msg.w0());
            samples.push(calibration.ticks_to_ns(calibration.elapsed(start, end)));
        }
        let duration = started.elapsed();

        ep.send(1u32, &Message::with_w0(STOP));
        ep.barrier_wait(BARRIER_ALL);

        let mut result = BenchmarkResult::new("one2one", 2, std::mem::size_of::<Message>());
        result.iterations = cli.reps;
        result.duration_secs = duration.as_secs_f64();
        result.statistics = Statistics::from_samples(&samples, !cli.keep_outliers);
        result.print_summary();
        if let Some(path) = &cli.common.json {
            write_json_report(path, &result).or_exit("writing report");
        }
    })
    .or_exit("one2one");
}
