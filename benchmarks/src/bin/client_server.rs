//! One server polling a color registry of clients.
//!
//! Every client issues `--reps` requests and waits for each reply. The server
//! serves them with `recv_color_start`, so no client is starved while the
//! others keep it busy.

use clap::Parser;
use ssmp_benchmarks::{init_logging, launch, write_json_report, BenchmarkResult, CommonArgs};
use ssmp_benchmarks::{Statistics, TickCalibration};
use ssmp_core::{get_ticks, EndpointId, Message, OrExit, Predicate, BARRIER_ALL};

#[derive(Parser, Debug)]
#[command(name = "client_server", about = "Server polling a color registry of clients")]
struct Cli {
    /// Endpoints in the run (one server plus clients)
    #[arg(short = 'n', long, default_value_t = 4)]
    endpoints: u32,

    /// Requests per client
    #[arg(long, default_value_t = 100_000)]
    reps: u64,

    #[command(flatten)]
    common: CommonArgs,
}

const SERVER: u32 = 0;

fn main() {
    init_logging();
    let cli = Cli::parse();
    if cli.endpoints < 2 {
        eprintln!("client_server needs at least 2 endpoints");
        std::process::exit(2);
    }
    let config = cli.common.to_config().or_exit("invalid configuration");
    let calibration = TickCalibration::measure(200);

    launch(config, cli.endpoints, |ep| {
        if ep.id().get() != SERVER {
            let mut samples = Vec::with_capacity(cli.reps as usize);
            for i in 0..cli.reps {
                let start = get_ticks();
                ep.send(SERVER, &Message::with_w0(i as i32 & i32::MAX));
                ep.recv_from(SERVER);
                let end = get_ticks();
                samples.push(calibration.ticks_to_ns(calibration.elapsed(start, end)));
            }
            let stats = Statistics::from_samples(&samples, true);
            log::info!(
                "client {}: median round trip {:.1} ns, p99 {} ns",
                ep.id(),
                stats.median,
                stats.p99
            );
            ep.barrier_wait(BARRIER_ALL);
            return;
        }

        let mut clients = ep.color_buf_init(&Predicate(|id: EndpointId| id.get() != SERVER));
        let total = cli.reps * clients.len() as u64;
        let mut served = vec![0u64; cli.endpoints as usize];

        let started = std::time::Instant::now();
        for _ in 0..total {
            let request = clients.recv_color_start();
            served[request.sender as usize] += 1;
            ep.send(request.sender, &Message::with_w0(request.w0()));
        }
        let duration = started.elapsed();
        clients.free();
        ep.barrier_wait(BARRIER_ALL);

        log::debug!("requests served per endpoint: {:?}", served);
        let mut result = BenchmarkResult::new("client_server", cli.endpoints, 0);
        result.iterations = total;
        result.duration_secs = duration.as_secs_f64();
        result.print_summary();
        if let Some(path) = &cli.common.json {
            write_json_report(path, &result).or_exit("writing report");
        }
    })
    .or_exit("client_server");
}
