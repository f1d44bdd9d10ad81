//! Phonelink CLI - Command-line interface
//!
//! Thin front end over the orchestrator: parses flags, runs one operation and
//! renders the result.

use anyhow::{anyhow, Context};
use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand, ValueEnum};
use phonelink_core::cli::{CliResult, ExitCodes};
use phonelink_core::config::AppConfig;
use phonelink_core::core::orchestrator::{OperationHandle, Orchestrator};
use phonelink_core::core::simulator::VirtualPhone;
use phonelink_core::core::transport::{list_ports, SerialChannel, SerialPortChannel};
use phonelink_core::{DialMode, PhoneAlarm, PhoneElement, PhoneError, PhoneMessage};
use std::path::PathBuf;
use std::process::ExitCode;

type PhoneOrchestrator = Orchestrator<Box<dyn SerialChannel>>;

/// Dialing method
#[derive(Debug, Clone, Copy, ValueEnum)]
enum DialMethod {
    /// Let the phone decide
    Default,
    /// Tone dialing
    Tone,
    /// Pulse dialing
    Pulse,
}

impl From<DialMethod> for DialMode {
    fn from(method: DialMethod) -> Self {
        match method {
            DialMethod::Default => DialMode::Default,
            DialMethod::Tone => DialMode::Tone,
            DialMethod::Pulse => DialMode::Pulse,
        }
    }
}

/// Phonelink CLI
#[derive(Parser, Debug)]
#[command(
    name = "phonelink",
    version,
    about = "Manage a mobile phone over its serial AT command interface",
    long_about = None
)]
struct Cli {
    /// Serial port name (e.g., COM3, /dev/ttyUSB0)
    #[arg(short, long, global = true, env = "PHONELINK_PORT")]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// Talk to a built-in virtual phone instead of a real port
    #[arg(long, global = true)]
    simulate: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true, env = "PHONELINK_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    Ports,

    /// Show phone identity
    Info,

    /// List the elements of a category
    List {
        /// Category (e.g. PICTURES, SOUNDS, CONTACTS)
        category: String,
    },

    /// Download one element
    Get {
        /// Category holding the element
        category: String,
        /// Element id or name
        element: String,
        /// Output file (defaults to the download directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Download every element of a category
    GetAll {
        /// Category
        category: String,
        /// Output directory (defaults to the download directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Upload a file
    Put {
        /// Local file
        file: PathBuf,
        /// Name on the phone (defaults to the file stem)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Delete one element
    Delete {
        /// Category holding the element
        category: String,
        /// Element id or name
        element: String,
    },

    /// List alarms
    Alarms,

    /// Set an alarm
    AlarmAdd {
        /// Alarm slot
        number: u32,
        /// Time of day, HH:MM or HH:MM:SS
        #[arg(short, long)]
        time: String,
        /// Date, yy/MM/dd
        #[arg(short, long)]
        date: Option<String>,
        /// Recurrence days, e.g. "1,3,5" (1 = Monday); every day when omitted
        #[arg(long, conflicts_with = "once")]
        days: Option<String>,
        /// Ring only once, at --date
        #[arg(long, requires = "date")]
        once: bool,
    },

    /// Delete an alarm
    AlarmDelete {
        /// Alarm slot
        number: u32,
    },

    /// List stored messages
    SmsList,

    /// Send a text message
    SmsSend {
        /// Recipient number
        recipient: String,
        /// Message text
        body: String,
    },

    /// Delete a stored message
    SmsDelete {
        /// Message index
        number: u32,
    },

    /// Dial a number
    Dial {
        /// Number to call
        number: String,
        /// Data call instead of voice
        #[arg(long)]
        data: bool,
        /// Dialing method
        #[arg(long, value_enum, default_value_t = DialMethod::Default)]
        method: DialMethod,
    },

    /// Hang up the current call
    Hangup,

    /// Show signal strength
    Signal,

    /// Show the PIN state
    Pin,

    /// Send a PIN (or a PUK together with a new PIN)
    PinSend {
        /// PIN or PUK
        code: String,
        /// New PIN, when unlocking with a PUK
        new_pin: Option<String>,
    },

    /// Show the formats the phone supports for an element type
    Caps {
        /// Element type tag (e.g. JPEG)
        element_type: String,
    },

    /// Switch the phone off
    PowerOff,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&cli).await {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(err) => {
            let result = match err.downcast_ref::<PhoneError>() {
                Some(phone) => CliResult::from(phone),
                None => CliResult::error(ExitCodes::ERROR, format!("{err:#}")),
            };
            eprintln!("Error: {}", result.message().unwrap_or("unknown error"));
            result.to_exit_code()
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
    .context("Failed to load configuration")?;
    let phone = orchestrator(cli, &config);

    match &cli.command {
        Commands::Ports => show_ports()?,
        Commands::Info => {
            let info = wait(phone.device_info()).await?;
            println!("Model:      {}", info.model.as_deref().unwrap_or("-"));
            println!("Firmware:   {}", info.firmware.as_deref().unwrap_or("-"));
            println!("Revision:   {}", info.revision.as_deref().unwrap_or("-"));
            println!("IMEI:       {}", info.imei.as_deref().unwrap_or("-"));
            for number in &info.subscriber_numbers {
                println!("Number:     {number}");
            }
        }
        Commands::List { category } => {
            let elements = wait(phone.list_elements(category)).await?;
            if elements.is_empty() {
                println!("No elements in {category}.");
            }
            for element in &elements {
                println!("{:<6} {:<5} {}", element.id, element.element_type, element.display_name);
            }
        }
        Commands::Get { category, element, output } => {
            let element = find_element(&phone, category, element).await?;
            let destination = match output {
                Some(path) => path.clone(),
                None => {
                    let dir = config.download_dir();
                    std::fs::create_dir_all(&dir)
                        .with_context(|| format!("Cannot create {}", dir.display()))?;
                    dir.join(element.file_name())
                }
            };
            let bytes = wait(phone.download_element(element, destination.clone())).await?;
            println!("Saved {} bytes to {}", bytes, destination.display());
        }
        Commands::GetAll { category, output } => {
            let dir = output.clone().unwrap_or_else(|| config.download_dir());
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Cannot create {}", dir.display()))?;

            let handle = phone.download_all(category, dir);
            let cancel = handle.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Stopping after the current element...");
                    cancel.cancel();
                }
            });

            let report = handle.join().await?;
            for path in &report.downloaded {
                println!("Saved {}", path.display());
            }
            for failure in &report.failed {
                eprintln!(
                    "Failed {} ({}): {}",
                    failure.element.display_name, failure.code, failure.message
                );
            }
            if report.skipped > 0 {
                eprintln!("Skipped {} elements", report.skipped);
            }
            if !report.is_complete() {
                return Err(anyhow!(
                    "{} of {} elements not downloaded",
                    report.failed.len() + report.skipped,
                    report.failed.len() + report.skipped + report.downloaded.len()
                ));
            }
        }
        Commands::Put { file, name } => {
            let report = wait(phone.upload_file(file.clone(), name.clone())).await?;
            println!(
                "Uploaded {} ({}, {} bytes) in {} attempt(s)",
                report.name, report.object_type, report.bytes, report.attempts
            );
        }
        Commands::Delete { category, element } => {
            let element = find_element(&phone, category, element).await?;
            let name = element.display_name.clone();
            wait(phone.delete_element(element)).await?;
            println!("Deleted {name}");
        }
        Commands::Alarms => {
            let alarms = wait(phone.list_alarms()).await?;
            if alarms.is_empty() {
                println!("No alarms set.");
            }
            for alarm in &alarms {
                println!("{alarm}");
            }
        }
        Commands::AlarmAdd { number, time, date, days, once } => {
            let alarm = build_alarm(*number, time, date.as_deref(), days.as_deref(), *once)?;
            wait(phone.add_alarm(alarm)).await?;
            println!("Alarm {number} set");
        }
        Commands::AlarmDelete { number } => {
            wait(phone.delete_alarm(*number)).await?;
            println!("Alarm {number} deleted");
        }
        Commands::SmsList => {
            for message in wait(phone.list_messages()).await? {
                println!(
                    "[{}] {} {} {}",
                    message.id.map_or_else(|| "-".to_string(), |id| id.to_string()),
                    message.status.as_deref().unwrap_or(""),
                    message.recipient_or_sender.as_deref().unwrap_or(""),
                    message.datetime.as_deref().unwrap_or("")
                );
                if let Some(body) = &message.body {
                    println!("    {body}");
                }
            }
        }
        Commands::SmsSend { recipient, body } => {
            let reference = wait(phone.send_message(PhoneMessage::outgoing(recipient, body))).await?;
            println!("Sent, reference {reference}");
        }
        Commands::SmsDelete { number } => {
            wait(phone.delete_message(*number)).await?;
            println!("Message {number} deleted");
        }
        Commands::Dial { number, data, method } => {
            wait(phone.dial(number, !data, (*method).into())).await?;
            println!("Dialing {number}");
        }
        Commands::Hangup => {
            wait(phone.hangup()).await?;
            println!("Call ended");
        }
        Commands::Signal => {
            println!("{}", wait(phone.signal_power()).await?);
        }
        Commands::Pin => match wait(phone.pin_status()).await? {
            Some(status) => println!("{status}"),
            None => println!("unknown"),
        },
        Commands::PinSend { code, new_pin } => {
            wait(phone.send_pin(code, new_pin.as_deref())).await?;
            println!("Accepted");
        }
        Commands::Caps { element_type } => {
            for capability in wait(phone.capabilities(element_type)).await? {
                println!("{capability}");
            }
        }
        Commands::PowerOff => {
            wait(phone.power_off()).await?;
            println!("Phone switched off");
        }
    }

    Ok(())
}

fn orchestrator(cli: &Cli, config: &AppConfig) -> PhoneOrchestrator {
    let mut port = config.port.clone();
    if let Some(name) = &cli.port {
        port.port = name.clone();
    }
    if let Some(baud) = cli.baud {
        port.baud_rate = baud;
    }

    let channel: Box<dyn SerialChannel> = if cli.simulate {
        tracing::info!("Using the virtual phone");
        Box::new(VirtualPhone::with_sample_content())
    } else {
        Box::new(SerialPortChannel::new())
    };

    Orchestrator::new(channel, port, config.exchange.clone()).on_done(|report| {
        tracing::debug!("{} [{}] -> {} {}", report.operation, report.id, report.code, report.message);
    })
}

async fn wait<T>(handle: OperationHandle<T>) -> Result<T, PhoneError> {
    handle.join().await
}

async fn find_element(
    phone: &PhoneOrchestrator,
    category: &str,
    key: &str,
) -> anyhow::Result<PhoneElement> {
    wait(phone.list_elements(category))
        .await?
        .into_iter()
        .find(|e| e.id == key || e.display_name == key)
        .ok_or_else(|| anyhow!("No element '{key}' in {category}"))
}

fn build_alarm(
    number: u32,
    time: &str,
    date: Option<&str>,
    days: Option<&str>,
    once: bool,
) -> anyhow::Result<PhoneAlarm> {
    if once {
        let date = date.ok_or_else(|| anyhow!("--once needs --date"))?;
        let date = NaiveDate::parse_from_str(date, "%y/%m/%d")
            .with_context(|| format!("Invalid date '{date}', expected yy/MM/dd"))?;
        let time = NaiveTime::parse_from_str(time, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M"))
            .with_context(|| format!("Invalid time '{time}'"))?;
        return Ok(PhoneAlarm::one_time(number, date, time));
    }

    PhoneAlarm::from_fields(number, date, time, days)
        .ok_or_else(|| anyhow!("Invalid alarm: time '{time}', days {days:?}"))
}

fn show_ports() -> anyhow::Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for port in &ports {
        println!("  {} [{:?}]", port.port_name, port.port_type);
    }
    Ok(())
}
