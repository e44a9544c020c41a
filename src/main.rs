use std::{error::Error, thread};

use chrono::{Local, NaiveTime, Timelike};
use clap::{ArgAction, Parser, Subcommand};
use iskr_clock::{
    alarm::{parse_time, Alarm},
    app::{self, App},
    communication::Event,
    config::Config,
    sleep,
    station::{Station, StationSource},
    timer::{format_centis, format_hms, parse_duration},
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// write the default config file
    Init {
        #[clap(long, short)]
        force: bool,
    },
    /// show or change the alarm
    Alarm {
        #[clap(subcommand)]
        action: Option<AlarmAction>,
    },
    /// manage the stations the alarm can play
    Station {
        #[clap(subcommand)]
        action: StationAction,
    },
    /// suggest bedtimes or wake-up times in whole sleep cycles
    Sleep {
        #[clap(subcommand)]
        action: SleepAction,
    },
    /// count down `seconds`, `MM:SS` or `HH:MM:SS`, then ring
    Timer { duration: String },
    /// run with a stopwatch going; `lap`, `pause` and `resume` on stdin
    Stopwatch,
    /// keep the alarm armed and ring when it's due (the default)
    Run,
}

#[derive(Subcommand)]
enum AlarmAction {
    Show,
    /// set the time of day, `HH:MM`
    Set { time: String },
    Enable,
    Disable,
    SnoozeMinutes { minutes: u32 },
    Fade {
        #[arg(action = ArgAction::Set)]
        enabled: bool,
    },
    Station { id: String },
}

#[derive(Subcommand)]
enum StationAction {
    List,
    /// `locator` is an http(s) stream url or a path to a sound file
    Add {
        id: String,
        name: String,
        locator: String,
    },
    Update {
        id: String,
        name: String,
        locator: String,
    },
    Remove {
        id: String,
    },
}

#[derive(Subcommand)]
enum SleepAction {
    /// when to go to bed to wake up at `time`
    WakeAt { time: String },
    /// when to wake up after going to bed at `time`
    BedAt { time: String },
}

fn main() -> Result<(), Box<dyn Error>> {
    // initilize the logger
    if let Err(e) = simple_file_logger::init_logger!("iskr_clock") {
        eprintln!("couldn't initialize logger: {e:?}");
    }

    let args = Args::parse();
    let config_path = Config::config_path().ok_or("couldn't find a config directory")?;
    let config = Config::load(config_path.clone());

    match args.command {
        Some(Command::Init { force }) => {
            if force || !Config::is_config_present() {
                Config::new().save(config_path.clone())?;
                println!("wrote {}", config_path.display());
            } else {
                println!(
                    "{} already exists, use --force to overwrite it",
                    config_path.display()
                );
            }
            Ok(())
        }
        Some(Command::Sleep { action }) => {
            print_sleep(action, &config.time_format)?;
            Ok(())
        }
        Some(Command::Alarm { action }) => {
            let mut app = open(config)?;
            alarm(&mut app, action.unwrap_or(AlarmAction::Show))
        }
        Some(Command::Station { action }) => {
            let app = open(config)?;
            station(&app, action)
        }
        Some(Command::Timer { duration }) => {
            let seconds = parse_duration(&duration)?;
            let mut app = open(config)?;
            app.start_timer(seconds)?;
            println!("timer set for {}", format_hms(seconds));
            run(app);
            Ok(())
        }
        Some(Command::Stopwatch) => {
            let mut app = open(config)?;
            app.start_stopwatch();
            run(app);
            Ok(())
        }
        Some(Command::Run) | None => {
            run(open(config)?);
            Ok(())
        }
    }
}

fn open(config: Config) -> Result<App, Box<dyn Error>> {
    let data_dir = Config::data_dir().ok_or("couldn't find a data directory")?;
    Ok(App::open(config, data_dir)?)
}

fn alarm(app: &mut App, action: AlarmAction) -> Result<(), Box<dyn Error>> {
    let alarms = app.alarms_mut();
    match action {
        AlarmAction::Show => {}
        AlarmAction::Set { time } => {
            let time = parse_time(&time)?;
            alarms.set_time(time.hour(), time.minute())?;
        }
        AlarmAction::Enable => alarms.set_enabled(true),
        AlarmAction::Disable => alarms.set_enabled(false),
        AlarmAction::SnoozeMinutes { minutes } => alarms.set_snooze_minutes(minutes)?,
        AlarmAction::Fade { enabled } => alarms.set_fade_in(enabled),
        AlarmAction::Station { id } => {
            if app.stations().resolve(&id).is_none() {
                eprintln!("no station `{id}`, the alarm will play the built-in tone");
            }
            app.alarms_mut().set_station(&id);
        }
    }
    print_alarm(app.alarms().alarm(), &app.config().time_format);
    Ok(())
}

fn print_alarm(alarm: &Alarm, time_format: &str) {
    println!("alarm     {}", alarm.time_string(time_format));
    println!("enabled   {}", alarm.enabled);
    if let Some(next) = alarm.next_trigger_at {
        println!(
            "next      {} (in {})",
            next.format("%a %Y-%m-%d %H:%M"),
            alarm.time_remaining(Local::now())
        );
    }
    println!("snooze    {} min", alarm.snooze_minutes);
    println!("fade in   {}", alarm.volume_fade_in);
    println!("station   {}", alarm.station);
}

fn station(app: &App, action: StationAction) -> Result<(), Box<dyn Error>> {
    match action {
        StationAction::List => {
            let selected = &app.alarms().alarm().station;
            for station in app.stations().all() {
                let marker = if &station.id == selected { '*' } else { ' ' };
                let origin = if station.built_in { "built-in" } else { "custom" };
                println!("{marker} {station} ({origin})");
            }
        }
        StationAction::Add { id, name, locator } => {
            let source = StationSource::from_locator(&locator)?;
            app.stations_mut().add(Station::new(id, name, source))?;
        }
        StationAction::Update { id, name, locator } => {
            let source = StationSource::from_locator(&locator)?;
            app.stations_mut().update(Station::new(id, name, source))?;
        }
        StationAction::Remove { id } => {
            let removed = app.stations_mut().remove(&id)?;
            println!("removed {removed}");
        }
    }
    Ok(())
}

fn print_sleep(action: SleepAction, time_format: &str) -> Result<(), Box<dyn Error>> {
    let (options, heading) = match action {
        SleepAction::WakeAt { time } => (sleep::bedtimes(parse_time(&time)?), "go to bed at"),
        SleepAction::BedAt { time } => (sleep::wake_times(parse_time(&time)?), "wake up at"),
    };
    println!("{heading}:");
    for option in options {
        println!(
            "  {}  {} cycles, {} min of sleep",
            format_time(option.at, time_format),
            option.cycles,
            option.sleep_time().num_minutes()
        );
    }
    Ok(())
}

fn format_time(time: NaiveTime, time_format: &str) -> String {
    time.format(time_format).to_string()
}

/// Prints events as they happen and runs the control loop on stdin commands.
fn run(app: App) {
    let events = app.events().subscribe();
    let time_format = app.config().time_format.clone();
    thread::spawn(move || {
        for event in events {
            if let Some(line) = describe(&event, &time_format) {
                println!("{line}");
            }
        }
    });
    println!("{}", app.status());
    println!("commands: stop, snooze, toggle, lap, pause, resume, status, quit");
    app.run(app::stdin_commands());
}

fn describe(event: &Event, time_format: &str) -> Option<String> {
    Some(match event {
        Event::AlarmTriggered { at, .. } => format!("alarm ringing ({})", at.format(time_format)),
        Event::AlarmSnoozed { until, .. } => format!("snoozed until {}", until.format(time_format)),
        Event::AlarmStopped { .. } => "alarm stopped".to_string(),
        Event::PlaybackStarted { station, kind } => format!("playing {station} ({kind:?})"),
        Event::TimerTick { remaining_seconds } if remaining_seconds % 60 == 0 => {
            format!("timer {}", format_hms(*remaining_seconds))
        }
        Event::TimerCompleted => "timer done".to_string(),
        Event::StopwatchLap { index, elapsed } => format!("lap {index}  {}", format_centis(*elapsed)),
        // failover is logged by the engine and stays quiet here
        Event::AlarmChanged(_)
        | Event::PlaybackStopped
        | Event::PlaybackFailover { .. }
        | Event::TimerTick { .. } => return None,
    })
}
