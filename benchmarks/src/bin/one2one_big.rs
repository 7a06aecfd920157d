//! Bulk transfer throughput between two endpoints.
//!
//! Endpoint 0 streams `--size` bytes through the chunk buffer of endpoint 1,
//! which acknowledges each payload with a small message.

use clap::Parser;
use ssmp_benchmarks::{init_logging, launch, write_json_report, BenchmarkResult, CommonArgs};
use ssmp_benchmarks::{Statistics, TickCalibration};
use ssmp_core::{chunk_count, get_ticks, Message, OrExit, BARRIER_ALL, CHUNK_SIZE};

#[derive(Parser, Debug)]
#[command(name = "one2one_big", about = "Chunked bulk transfer throughput")]
struct Cli {
    /// Payload size in bytes
    #[arg(long, default_value_t = 1024 * 1024)]
    size: usize,

    /// Payloads to transfer
    #[arg(long, default_value_t = 1000)]
    reps: u64,

    /// Compare every received payload with the sent pattern
    #[arg(long)]
    verify: bool,

    #[command(flatten)]
    common: CommonArgs,
}

fn main() {
    init_logging();
    let cli = Cli::parse();
    let config = cli.common.to_config().or_exit("invalid configuration");
    let calibration = TickCalibration::measure(200);
    log::info!(
        "{} bytes per payload, {} chunks of {}",
        cli.size,
        chunk_count(cli.size),
        CHUNK_SIZE
    );

    launch(config, 2, |ep| {
        let pattern: Vec<u8> = (0..cli.size).map(|i| (i % 251) as u8).collect();

        if ep.id().get() == 1 {
            let mut buf = vec![0u8; cli.size];
            for rep in 0..cli.reps {
                ep.recv_from_big(0u32, &mut buf).or_exit("bulk receive");
                if cli.verify && buf != pattern {
                    log::error!("payload {} corrupted", rep);
                    std::process::exit(1);
                }
                ep.send(0u32, &Message::with_w0(rep as i32));
            }
            ep.barrier_wait(BARRIER_ALL);
            return;
        }

        let mut samples = Vec::with_capacity(cli.reps as usize);
        let started = std::time::Instant::now();
        for _ in 0..cli.reps {
            let start = get_ticks();
            ep.send_big(1u32, &pattern);
            ep.recv_from(1u32);
            let end = get_ticks();
            samples.push(calibration.ticks_to_ns(calibration.elapsed(start, end)));
        }
        let duration = started.elapsed();
        ep.barrier_wait(BARRIER_ALL);

        let mut result = BenchmarkResult::new("one2one_big", 2, cli.size);
        result.iterations = cli.reps;
        result.duration_secs = duration.as_secs_f64();
        result.statistics = Statistics::from_samples(&samples, false);
        result.print_summary();
        if let Some(path) = &cli.common.json {
            write_json_report(path, &result).or_exit("writing report");
        }
    })
    .or_exit("one2one_big");
}
