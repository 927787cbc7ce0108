// tools/senselink_cli/main.rs
//
// Command-line front end: list serial ports, capture a sensor stream into
// chunk logs (and optionally a text log), dump chunk logs.

use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::{Path, PathBuf};

use senselink::codec::{to_text, FieldLayoutTable, TextLogWriter};
use senselink::io::{list_ports, sleep_ms, RecordFramer, SerialEndpoint, SerialTransport};
use senselink::logging::{init_file_logging, stop_file_logging};
use senselink::{ChunkFileReader, ChunkLogger, SessionConfig};

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "senselink", about = "Sensor serial capture and log tools")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List serial ports
    Ports,

    /// Read records from the configured port into chunk logs
    Capture {
        /// Session config (TOML); defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,
        /// Stop after this many records
        #[arg(long)]
        count: Option<u64>,
        /// Also write records of this kind to a text log
        #[arg(long, requires = "text_out")]
        text_kind: Option<u32>,
        #[arg(long)]
        text_out: Option<PathBuf>,
        /// Field layout document; overrides `[text] layout_file`
        #[arg(long)]
        layouts: Option<PathBuf>,
    },

    /// Print the records of a chunk log file
    Dump {
        file: PathBuf,
        /// Render known kinds as text using this field layout document
        #[arg(long)]
        layouts: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    let result = match cli.cmd {
        Cmd::Ports => ports(),
        Cmd::Capture {
            config,
            count,
            text_kind,
            text_out,
            layouts,
        } => capture(config.as_deref(), count, text_kind, text_out, layouts),
        Cmd::Dump { file, layouts } => dump(&file, layouts.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn ports() -> CliResult {
    // '*' marks ports behind a known sensor USB bridge
    for port in list_ports()? {
        let marker = if port.likely_sensor { '*' } else { ' ' };
        let product = port.product.as_deref().unwrap_or("");
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{} {:<24} {:<10} {:04x}:{:04x} {}",
                marker, port.port_name, port.port_type, vid, pid, product
            ),
            _ => println!(
                "{} {:<24} {:<10} {}",
                marker, port.port_name, port.port_type, product
            ),
        }
    }
    Ok(())
}

fn load_layouts(path: Option<&Path>) -> Result<Option<FieldLayoutTable>, Box<dyn Error>> {
    match path {
        Some(path) => Ok(Some(FieldLayoutTable::load(path)?)),
        None => Ok(None),
    }
}

fn capture(
    config_path: Option<&Path>,
    count: Option<u64>,
    text_kind: Option<u32>,
    text_out: Option<PathBuf>,
    layouts: Option<PathBuf>,
) -> CliResult {
    let config = match config_path {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if config.log.file_logging {
        init_file_logging(&config.log.dir)?;
    }

    let layout_path = layouts.or_else(|| config.text.layout_file.clone());
    let table = load_layouts(layout_path.as_deref())?;
    let mut text_log = match (text_kind, text_out, table.as_ref()) {
        (Some(kind), Some(path), Some(table)) => Some(TextLogWriter::create(&path, kind, table)?),
        (Some(_), _, None) => return Err("--text-kind needs a field layout document".into()),
        _ => None,
    };

    let mut endpoint = SerialEndpoint::new();
    endpoint.open_with(&config.serial)?;
    let mut logger = ChunkLogger::from_config(&config)?;
    let mut framer = RecordFramer::new();
    let mut buf = vec![0u8; 4096];

    'capture: loop {
        let outcome = endpoint.read(&mut buf, -1);

        for frame in framer.feed(&buf[..outcome.bytes]) {
            let record = match frame {
                Ok(record) => record,
                Err(e) => {
                    eprintln!("dropped frame: {}", e);
                    continue;
                }
            };
            logger.log(&record)?;
            if let Some(writer) = text_log.as_mut() {
                if let Err(e) = writer.write_record(&record) {
                    if !e.is_line_error() {
                        return Err(e.into());
                    }
                }
            }
            if count.is_some_and(|n| logger.records_logged() >= n) {
                break 'capture;
            }
        }

        match outcome.error {
            Some(e) if e.is_disconnect() => {
                eprintln!("{} disconnected", endpoint.port_name());
                break;
            }
            Some(e) => eprintln!("read error: {}", e),
            None => {}
        }
        if outcome.bytes == 0 && !endpoint.is_blocking() {
            sleep_ms(10);
        }
    }

    endpoint.close();
    if let Some(writer) = text_log {
        writer.finish()?;
    }
    for path in logger.finish()? {
        println!("{}", path.display());
    }
    stop_file_logging();
    Ok(())
}

fn dump(file: &Path, layouts: Option<&Path>) -> CliResult {
    let table = load_layouts(layouts)?;

    for (index, chunk) in ChunkFileReader::open(file)?.enumerate() {
        let chunk = chunk?;
        println!(
            "# chunk {} {:?} tag={} bytes={}",
            index,
            chunk.variant(),
            chunk.tag(),
            chunk.cursor()
        );
        for record in chunk.records()? {
            let text = table.as_ref().and_then(|t| to_text(&record, t).ok());
            match text {
                Some(line) => println!("{} {}", record.kind(), line),
                None => println!(
                    "{} @{} {}",
                    record.kind(),
                    record.offset(),
                    hex::encode(record.payload())
                ),
            }
        }
    }
    Ok(())
}
