use clap::{Arg, ArgAction, Command};
use log::{error, info};
use segmerge::config::{PipelineConfig, TransferMode, app_name, version};
use segmerge::error::PipelineError;
use segmerge::pipeline::{EventSink, Orchestrator, PcmGain};
use std::path::PathBuf;
use std::process;

fn cli() -> Command {
    Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("input")
                .value_name("INPUT_DIR")
                .help("Directory holding the numbered segment files.")
                .required(false),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("OUTPUT")
                .help("Merged output file, replaced if it exists."),
        )
        .arg(
            Arg::new("kind")
                .short('k')
                .long("kind")
                .value_name("KIND")
                .help("Track to merge (audio/video).")
                .ignore_case(true),
        )
        .arg(
            Arg::new("backend")
                .short('b')
                .long("backend")
                .value_name("BACKEND")
                .help("Media backend (wav/ffmpeg).")
                .ignore_case(true),
        )
        .arg(
            Arg::new("zero-copy")
                .long("zero-copy")
                .help("Render decoder output straight onto the encoder input surface.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("gain")
                .short('g')
                .long("gain")
                .value_name("FACTOR")
                .help("Scale 16-bit PCM samples by FACTOR before encoding.")
                .value_parser(clap::value_parser!(f32)),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("CONFIG")
                .help("JSON configuration file; flags override its values."),
        )
}

fn load_config(matches: &clap::ArgMatches) -> anyhow::Result<PipelineConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => PipelineConfig::load(&PathBuf::from(path))?,
        None => PipelineConfig::default(),
    };

    if let Some(input) = matches.get_one::<String>("input") {
        config.input_dir = PathBuf::from(input);
    }
    if let Some(output) = matches.get_one::<String>("output") {
        config.output = PathBuf::from(output);
    }
    if let Some(kind) = matches.get_one::<String>("kind") {
        config.kind = kind.parse().map_err(anyhow::Error::msg)?;
    }
    if let Some(backend) = matches.get_one::<String>("backend") {
        config.backend = backend.parse().map_err(anyhow::Error::msg)?;
    }
    if matches.get_flag("zero-copy") {
        config.transfer = TransferMode::ZeroCopy;
    }
    config.validate()?;
    Ok(config)
}

async fn run(matches: clap::ArgMatches) -> anyhow::Result<()> {
    let config = load_config(&matches)?;
    let backend = config.backend.create()?;
    info!("Using {} backend", backend.name());

    let (events, mut rx) = EventSink::channel(config.event_capacity);
    let mut orchestrator = Orchestrator::new(config, backend).with_events(events);
    if let Some(gain) = matches.get_one::<f32>("gain") {
        orchestrator = orchestrator.with_transform(Box::new(PcmGain::new(*gain)));
    }

    // gracefully cancel the run on SIGINT, SIGTERM, or SIGHUP
    let cancel = orchestrator.cancellation_token();
    ctrlc::set_handler(move || cancel.cancel())?;

    let listener = tokio::spawn(async move {
        while let Some(timed) = rx.recv().await {
            println!("[{}] {}", timed.at.format("%H:%M:%S%.3f"), timed.event);
        }
    });

    let report = tokio::task::spawn_blocking(move || orchestrator.run()).await??;
    listener.await?;

    println!("{report}");
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let matches = cli().get_matches();

    if let Err(e) = run(matches).await {
        if e.downcast_ref::<PipelineError>()
            .is_some_and(PipelineError::is_cancelled)
        {
            info!("Merge cancelled");
            eprintln!("{}: cancelled", app_name());
            process::exit(130);
        }
        error!("{:#}", e);
        eprintln!("{}: {:#}", app_name(), e);
        process::exit(1);
    }
}
