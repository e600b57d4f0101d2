mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use bms_core::profile::BuiltinProfile;
use session::Session;

struct Options {
    profile: BuiltinProfile,
    transcript: Option<PathBuf>,
}

fn main() -> io::Result<()> {
    let options = parse_options().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: bms-emulator [--profile <lifepo4|lic>] [--transcript <path>]");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = match &options.transcript {
        Some(path) => Session::with_transcript(
            options.profile,
            path,
            "BMS protection emulator transcript",
        )?,
        None => Session::new(options.profile)?,
    };
    let mut line = String::new();

    writeln!(
        writer,
        "BMS Protection Emulator ready ({} profile). Type `help` for commands or `exit` to quit.",
        options.profile
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        let responses = session.handle_command(trimmed)?;
        for response in responses {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options() -> Result<Options, String> {
    let mut options = Options {
        profile: BuiltinProfile::LiFePO4,
        transcript: None,
    };

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--profile=") {
            options.profile = profile_from_tag(value)?;
        } else if arg == "--profile" {
            let value = args.next().ok_or("Expected value after --profile")?;
            options.profile = profile_from_tag(&value)?;
        } else if let Some(value) = arg.strip_prefix("--transcript=") {
            options.transcript = Some(PathBuf::from(value));
        } else if arg == "--transcript" {
            let value = args.next().ok_or("Expected value after --transcript")?;
            options.transcript = Some(PathBuf::from(value));
        } else {
            return Err(format!("Unknown argument `{arg}`"));
        }
    }

    Ok(options)
}

fn profile_from_tag(tag: &str) -> Result<BuiltinProfile, String> {
    BuiltinProfile::from_name(tag).ok_or_else(|| format!("Unknown battery profile `{tag}`"))
}
