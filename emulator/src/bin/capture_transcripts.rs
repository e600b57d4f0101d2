use std::io;
use std::path::Path;

#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use bms_core::profile::BuiltinProfile;
use session::Session;

const TRANSCRIPT_DIR: &str = "transcripts";

#[derive(Clone, Copy)]
enum Scenario {
    OverVoltage,
    DischargeBurst,
    UserReset,
}

impl Scenario {
    const ALL: [Scenario; 3] = [
        Scenario::OverVoltage,
        Scenario::DischargeBurst,
        Scenario::UserReset,
    ];

    fn file_name(self) -> &'static str {
        match self {
            Scenario::OverVoltage => "over-voltage.log",
            Scenario::DischargeBurst => "discharge-burst.log",
            Scenario::UserReset => "user-reset.log",
        }
    }

    fn header(self) -> &'static str {
        match self {
            Scenario::OverVoltage => "BMS emulator over-voltage trip and debounced clear",
            Scenario::DischargeBurst => "BMS emulator burst discharge trip",
            Scenario::UserReset => "BMS emulator short circuit cleared by long press",
        }
    }
}

fn main() -> io::Result<()> {
    for scenario in Scenario::ALL {
        record(scenario)?;
    }
    Ok(())
}

fn record(scenario: Scenario) -> io::Result<()> {
    let path = Path::new(TRANSCRIPT_DIR).join(scenario.file_name());
    let mut session = Session::with_transcript(BuiltinProfile::LiFePO4, &path, scenario.header())?;
    match scenario {
        Scenario::OverVoltage => record_over_voltage(&mut session),
        Scenario::DischargeBurst => record_discharge_burst(&mut session),
        Scenario::UserReset => record_user_reset(&mut session),
    }
}

fn record_over_voltage(session: &mut Session) -> io::Result<()> {
    session.handle_command("cycle")?;
    session.handle_command("afe stat=0x04 vmax=10300")?;
    session.handle_command("cycle")?;
    session.handle_command("faults")?;
    session.handle_command("afe stat=0 vmax=8638")?;
    session.handle_command("cycle 40")?;
    session.handle_command("status")?;
    session.handle_command("history")?;
    Ok(())
}

fn record_discharge_burst(session: &mut Session) -> io::Result<()> {
    session.handle_command("cycle")?;
    session.handle_command("afe current=-3600")?;
    session.handle_command("cycle 4")?;
    session.handle_command("status")?;
    session.handle_command("afe current=0")?;
    session.handle_command("cycle 8")?;
    session.handle_command("faults")?;
    Ok(())
}

fn record_user_reset(session: &mut Session) -> io::Result<()> {
    session.handle_command("cycle")?;
    session.handle_command("afe stat=0x02")?;
    session.handle_command("cycle")?;
    session.handle_command("afe stat=0")?;
    session.handle_command("press long")?;
    session.handle_command("status")?;
    session.handle_command("history")?;
    session.handle_command("help press")?;
    Ok(())
}
