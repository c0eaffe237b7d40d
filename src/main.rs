use alloc_trace::TraceSummary;
use args::Args;
use getopts::Occur;
use glob::glob;
use std::{fs::File, io::BufReader};

const PROGRAM_DESC: &str = "Validate and summarize alloc_trace output";
const PROGRAM_NAME: &str = "trace_check";

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = Args::new(PROGRAM_NAME, PROGRAM_DESC);
    args.flag("h", "help", "Print the usage menu");
    args.option(
        "t",
        "trace",
        "Trace file, or a glob matching several trace files",
        "GLOB",
        Occur::Optional,
        None,
    );
    args.flag("y", "yaml", "Print the summary as YAML");

    args.parse_from_cli()?;

    let help: bool = args.value_of("help")?;
    if help {
        println!("{}", args.full_usage());
        return Ok(());
    }

    let pattern: String = args.value_of("trace")?;
    let yaml: bool = args.value_of("yaml")?;

    let mut files = 0;
    let mut aggregate = TraceSummary::new();

    for path in glob(pattern.as_str())? {
        let path = path?;
        log::info!("checking trace in {}", path.display());
        let reader = BufReader::new(File::open(&path)?);
        let summary = TraceSummary::scan(reader, |line_no, line, err| {
            log::warn!("{}:{}: {}: {:?}", path.display(), line_no, err, line)
        })?;
        aggregate.merge(&summary);
        files += 1;
    }

    if files == 0 {
        anyhow::bail!("no trace files match {}", pattern);
    }

    if yaml {
        print!("{}", serde_yaml::to_string(&aggregate)?);
    } else {
        println!("{}", aggregate);
    }

    if !aggregate.is_well_formed() {
        anyhow::bail!("{} malformed line(s)", aggregate.malformed());
    }

    Ok(())
}
