use denoiser::batch::{split_flow_file, BatchConfig};
use denoiser::cancel::CancelToken;
use denoiser::em::DenoiseConfig;
use denoiser::entry::{group_of, parse_manifest, FlowInput};
use pyrodenoise_cli::pipeline::{run_denoise, run_pipeline, set_logger, PipelineConfig};
use std::path::{Path, PathBuf};
#[macro_use]
extern crate log;

fn main() -> std::io::Result<()> {
    let matches = pyrodenoise_cli::pyrodenoise_commands::pyrodenoise_parser().get_matches();
    let token = CancelToken::new();
    let handler = token.clone();
    if let Err(why) = ctrlc::set_handler(move || handler.cancel()) {
        eprintln!("Could not set the interrupt handler: {}", why);
    }
    if let Some(("pipeline", sub_m)) = matches.subcommand() {
        let path: &String = sub_m.get_one("profile").unwrap();
        let file = std::fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&file)
            .map_err(|why| std::io::Error::new(std::io::ErrorKind::InvalidData, why))?;
        return run_pipeline(&config, &token);
    }
    if let Some((_, sub_m)) = matches.subcommand() {
        set_logger(sub_m.get_count("verbose") as usize);
    }
    match matches.subcommand() {
        Some(("denoise", sub_m)) => denoise(sub_m, &token),
        Some(("split", sub_m)) => split(sub_m),
        _ => unreachable!(),
    }
}

fn parse_arg<T: std::str::FromStr>(matches: &clap::ArgMatches, name: &str) -> std::io::Result<T> {
    let value: &String = matches.get_one(name).unwrap();
    value.parse().map_err(|_| {
        let message = format!("--{} {} can not be parsed", name, value);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, message)
    })
}

fn denoise(matches: &clap::ArgMatches, token: &CancelToken) -> std::io::Result<()> {
    debug!("START\tDenoise");
    let inputs: Vec<FlowInput> = match matches.get_one::<String>("manifest") {
        Some(manifest) => parse_manifest(Path::new(manifest))?,
        None => matches
            .get_many::<String>("flow")
            .unwrap()
            .map(|path| FlowInput::new(PathBuf::from(path)))
            .collect(),
    };
    let lookup: &String = matches.get_one("lookup").unwrap();
    let config = DenoiseConfig::new(
        parse_arg(matches, "cutoff")?,
        parse_arg(matches, "sigma")?,
        parse_arg(matches, "mindelta")?,
        parse_arg(matches, "maxiter")?,
    );
    let order: &String = matches.get_one("order").unwrap();
    let config = config.with_flow_order(order);
    let out_dir: &String = matches.get_one("out_dir").unwrap();
    let prefix: &String = matches.get_one("prefix").unwrap();
    let threads = parse_arg(matches, "threads")?;
    let mut batch = BatchConfig::new(threads, PathBuf::from(out_dir), prefix);
    if matches.contains_id("shard_size") {
        batch.shard_size = Some(parse_arg(matches, "shard_size")?);
    }
    let report = matches.get_one::<String>("report").map(Path::new);
    run_denoise(&inputs, Path::new(lookup), &config, &batch, report, token)
}

fn split(matches: &clap::ArgMatches) -> std::io::Result<()> {
    let flow: &String = matches.get_one("flow").unwrap();
    let size: usize = parse_arg(matches, "size")?;
    let out_dir: &String = matches.get_one("out_dir").unwrap();
    let flow = Path::new(flow);
    let shards = split_flow_file(flow, size, Path::new(out_dir), &group_of(flow))?;
    for shard in shards {
        println!("{}", shard.display());
    }
    Ok(())
}
