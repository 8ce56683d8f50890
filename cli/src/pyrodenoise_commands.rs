use clap::{Arg, ArgAction, Command};

fn verbose() -> Arg {
    Arg::new("verbose")
        .short('v')
        .action(ArgAction::Count)
        .help("Debug mode")
}

fn threads() -> Arg {
    Arg::new("threads")
        .short('t')
        .long("threads")
        .default_value("1")
        .help("number of threads")
}

fn subcommand_denoise() -> Command {
    Command::new("denoise")
        .version("0.1")
        .author("Bansho Masutani")
        .about("Denoise flow files and merge the results.")
        .arg(verbose())
        .arg(threads())
        .arg(
            Arg::new("flow")
                .short('f')
                .long("flow")
                .value_name("FLOW")
                .num_args(1..)
                .action(ArgAction::Append)
                .required_unless_present("manifest")
                .conflicts_with("manifest")
                .help("Flow files."),
        )
        .arg(
            Arg::new("manifest")
                .short('m')
                .long("manifest")
                .value_name("MANIFEST")
                .help("A file listing one flow file (and optionally its group) per line."),
        )
        .arg(
            Arg::new("lookup")
                .short('l')
                .long("lookup")
                .value_name("FILE")
                .required(true)
                .help("Calibration table of the intensities."),
        )
        .arg(
            Arg::new("cutoff")
                .long("cutoff")
                .default_value("0.01")
                .help("Distance cutoff of the seed clustering."),
        )
        .arg(
            Arg::new("sigma")
                .long("sigma")
                .default_value("60")
                .help("Sharpness of the soft assignment."),
        )
        .arg(
            Arg::new("mindelta")
                .long("mindelta")
                .default_value("0.000001")
                .help("Convergence threshold of the weights."),
        )
        .arg(
            Arg::new("maxiter")
                .long("maxiter")
                .default_value("1000")
                .help("Maximum number of EM rounds."),
        )
        .arg(
            Arg::new("order")
                .long("order")
                .default_value(definitions::DEFAULT_FLOW_ORDER)
                .help("Flow order."),
        )
        .arg(
            Arg::new("out_dir")
                .short('o')
                .long("out_dir")
                .value_name("DIR")
                .default_value(".")
                .help("Output directory."),
        )
        .arg(
            Arg::new("prefix")
                .short('p')
                .long("prefix")
                .default_value("pyrodenoise")
                .help("Prefix of the output files."),
        )
        .arg(
            Arg::new("shard_size")
                .long("shard_size")
                .value_name("READS")
                .help("Split each flow file into shards of at most this many reads."),
        )
        .arg(
            Arg::new("report")
                .long("report")
                .value_name("JSON")
                .help("Write the per-file summaries to this file."),
        )
}

fn subcommand_pipeline() -> Command {
    Command::new("pipeline")
        .version("0.1")
        .author("Bansho Masutani")
        .about("Run the denoiser as configured in a TOML file.")
        .arg(
            Arg::new("profile")
                .short('p')
                .long("profile")
                .value_name("TOML")
                .required(true),
        )
}

fn subcommand_split() -> Command {
    Command::new("split")
        .version("0.1")
        .author("Bansho Masutani")
        .about("Split a flow file into smaller flow files.")
        .arg(verbose())
        .arg(
            Arg::new("flow")
                .short('f')
                .long("flow")
                .value_name("FLOW")
                .required(true),
        )
        .arg(
            Arg::new("size")
                .short('s')
                .long("size")
                .value_name("READS")
                .required(true)
                .help("Maximum number of reads in a shard."),
        )
        .arg(
            Arg::new("out_dir")
                .short('o')
                .long("out_dir")
                .value_name("DIR")
                .default_value("."),
        )
}

pub fn pyrodenoise_parser() -> Command {
    Command::new("pyrodenoise")
        .version("0.1")
        .author("Bansho Masutani")
        .about("Flowgram denoiser for pyrosequencing reads.")
        .arg_required_else_help(true)
        .subcommand(subcommand_denoise())
        .subcommand(subcommand_pipeline())
        .subcommand(subcommand_split())
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn parse_denoise() {
        let matches = pyrodenoise_parser()
            .try_get_matches_from([
                "pyrodenoise",
                "denoise",
                "-f",
                "a.flow",
                "b.flow",
                "--lookup",
                "LookUp.pat",
                "-vv",
            ])
            .unwrap();
        let (name, sub_m) = matches.subcommand().unwrap();
        assert_eq!(name, "denoise");
        let flows: Vec<_> = sub_m.get_many::<String>("flow").unwrap().collect();
        assert_eq!(flows, vec!["a.flow", "b.flow"]);
        assert_eq!(sub_m.get_count("verbose"), 2);
        assert_eq!(sub_m.get_one::<String>("sigma").unwrap(), "60");
    }
    #[test]
    fn flow_or_manifest() {
        let both = ["pyrodenoise", "denoise", "-f", "a.flow", "-m", "list", "-l", "x"];
        assert!(pyrodenoise_parser().try_get_matches_from(both).is_err());
        let neither = ["pyrodenoise", "denoise", "-l", "x"];
        assert!(pyrodenoise_parser().try_get_matches_from(neither).is_err());
    }
}
