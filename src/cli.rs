use std::path::PathBuf;

/// What the binary should do after startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Poll until ctrl-c.
    Loop,
    /// Run a single change-checked cycle.
    Once,
    /// Sync everything once, skipping the change check.
    Force,
    /// Verify the API key and database, then exit.
    Check,
}

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub config_path: Option<PathBuf>,
    pub mode: Mode,
}

enum ParseOutcome {
    Args(CliArgs),
    Help,
}

fn usage() {
    eprintln!(
        "usage:
  callsync [--config <path>] [--once | --force | --check]

  --config <path>  JSON config (default ~/.callsync/config.json)
  --once           run one poll cycle and exit
  --force          sync all listed calls now and exit
  --check          test API and database connectivity and exit
"
    );
}

fn parse_args_impl(mut args: impl Iterator<Item = String>) -> Result<ParseOutcome, String> {
    let mut config_path: Option<PathBuf> = None;
    let mut mode: Option<Mode> = None;

    while let Some(arg) = args.next() {
        let selected = match arg.as_str() {
            "--config" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--config requires a value".to_string())?;
                config_path = Some(PathBuf::from(value));
                continue;
            }
            "--once" => Mode::Once,
            "--force" => Mode::Force,
            "--check" => Mode::Check,
            "-h" | "--help" | "help" => return Ok(ParseOutcome::Help),
            other => return Err(format!("unknown argument: {other}")),
        };
        if let Some(previous) = mode {
            if previous != selected {
                return Err("--once, --force and --check are mutually exclusive".to_string());
            }
        }
        mode = Some(selected);
    }

    Ok(ParseOutcome::Args(CliArgs {
        config_path,
        mode: mode.unwrap_or(Mode::Loop),
    }))
}

pub fn parse_args() -> CliArgs {
    match parse_args_impl(std::env::args().skip(1)) {
        Ok(ParseOutcome::Args(args)) => args,
        Ok(ParseOutcome::Help) => {
            usage();
            std::process::exit(0);
        }
        Err(error) => {
            eprintln!("error: {error}");
            usage();
            std::process::exit(2);
        }
    }
}
