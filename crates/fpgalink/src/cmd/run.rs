use std::sync::Arc;
use std::time::Duration;

use fpgalink_pipeline::{
    HardwareLink, LinkObserver, Pipeline, PipelineConfig, PipelineIo, SimBehavior,
    SimulatedAccelerator, TracingObserver,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cmd::RunArgs;
use crate::exit::{io_error, pipeline_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::ingest;
use crate::output::{print_summary, OutputFormat, ResultPrinter};

/// How long runtime shutdown waits for blocking reads still parked on stdin
/// or the serial port.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let config = build_config(&args)?;
    if args.print_config {
        println!(
            "{}",
            serde_json::to_string_pretty(&config).unwrap_or_else(|_| "{}".to_string())
        );
        return Ok(SUCCESS);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("fpgalink")
        .build()
        .map_err(|err| io_error("failed to start runtime", err))?;
    let outcome = runtime.block_on(stream(args, config, format));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    outcome
}

/// Config file first, then flags and environment on top.
fn build_config(args: &RunArgs) -> CliResult<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path).map_err(|err| {
            pipeline_error(&format!("failed to load {}", path.display()), err)
        })?,
        None => PipelineConfig::default(),
    };

    if let Some(device) = &args.device {
        config.link.device = device.clone();
    }
    if let Some(baud) = args.baud {
        config.link.baud = baud;
    }
    if args.no_exit_on_fail {
        config.link.exit_on_fail = false;
    }
    if args.no_checksum {
        config.codec.checksum = false;
    }
    if let Some(strategy) = args.packager {
        config.packager.strategy = strategy.into();
    }
    if let Some(window) = args.batch_window {
        config.packager.batch_window = window;
    }
    if let Some(linger) = args.batch_linger {
        config.packager.batch_linger = linger;
    }
    if let Some(timeout) = args.response_timeout {
        config.driver.response_timeout = timeout;
    }
    if let Some(attempts) = args.write_attempts {
        config.driver.write_attempts = attempts;
    }
    if let Some(backoff) = args.retry_backoff {
        config.driver.retry_backoff = backoff;
    }
    if args.await_busy {
        config.driver.await_busy = true;
    }
    if let Some(capacity) = args.queue_capacity {
        config.queue_capacity = capacity;
    }

    config
        .validate()
        .map_err(|err| pipeline_error("invalid configuration", err))?;
    Ok(config)
}

async fn stream(args: RunArgs, config: PipelineConfig, format: OutputFormat) -> CliResult<i32> {
    let input = ingest::open_input(args.input.as_deref()).await?;
    let cancel = CancellationToken::new();
    install_ctrlc_handler(cancel.clone())?;

    let observers: Vec<Arc<dyn LinkObserver>> = vec![Arc::new(TracingObserver)];
    let started = if args.simulate {
        start_simulated(config, args.sim_behavior.into(), observers, cancel.clone())
    } else {
        Pipeline::open(config, observers, cancel.clone()).await
    };
    let (pipeline, PipelineIo { instructions, mut results }) =
        started.map_err(|err| pipeline_error("failed to start pipeline", err))?;

    let ingest_cancel = cancel.clone();
    let ingestion =
        tokio::spawn(async move { ingest::ingest(input, instructions, &ingest_cancel).await });

    // Not tied to `cancel`: records already published are still printed, and
    // the queue closes once the driver exits.
    let printer = tokio::spawn(async move {
        let drain = CancellationToken::new();
        let mut printer = ResultPrinter::new(format);
        while let Ok(record) = results.recv(&drain).await {
            printer.print(&record);
        }
        printer.finish()
    });

    let summary = pipeline.join().await;
    let ingested = ingestion
        .await
        .map_err(|err| CliError::new(INTERNAL, format!("ingestion task failed: {err}")))?;
    let printed = printer
        .await
        .map_err(|err| CliError::new(INTERNAL, format!("output task failed: {err}")))?;

    let summary = summary.map_err(|err| pipeline_error("pipeline failed", err))?;
    let ingested = ingested?;

    if ingested.skipped > 0 {
        warn!(
            skipped = ingested.skipped,
            "some input lines were not valid instructions"
        );
    }
    if cancel.is_cancelled() {
        info!("run interrupted");
    }
    info!(
        lines = ingested.lines,
        submitted = ingested.submitted,
        printed,
        "run complete"
    );
    print_summary(&summary, format);
    Ok(SUCCESS)
}

fn start_simulated(
    config: PipelineConfig,
    behavior: SimBehavior,
    observers: Vec<Arc<dyn LinkObserver>>,
    cancel: CancellationToken,
) -> fpgalink_pipeline::Result<(Pipeline, PipelineIo)> {
    info!(behavior = ?behavior, "using simulated accelerator");
    let board = SimulatedAccelerator::with_behavior(behavior);
    let link = HardwareLink::from_port(
        Box::new(board),
        config.codec.max_payload,
        config.write_timeout(),
        observers,
    )?;
    Pipeline::start(config, link, cancel)
}

fn install_ctrlc_handler(cancel: CancellationToken) -> CliResult<()> {
    ctrlc::set_handler(move || {
        cancel.cancel();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
