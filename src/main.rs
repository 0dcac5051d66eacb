use clap::Parser;
use flexi_logger::style;
use flexi_logger::{DeferredNow, Duplicate, FileSpec, Record};
use loris::cli;
use loris::constants::TS_DASHES_BLANK_COLONS_DOT_BLANK;
use loris::profile;
use std::path::{Path, PathBuf};
use sysinfo::System;

fn main() {
    let args = cli::Cli::parse();
    let _output_dir = initialize_setup(&args);

    log::info!("Starting profiling...");
    if let Err(e) = profile::run(&args) {
        log::error!("{}", e);
        std::process::exit(e.exit_code());
    }
    log::info!("Profiling complete!");
}

fn initialize_setup(args: &cli::Cli) -> PathBuf {
    if let Some(input) = &args.input {
        if !Path::new(input).exists() {
            eprintln!("ERROR [loris] Input file {} does not exist. Exiting.", input);
            std::process::exit(1);
        }
    }
    if let Some(sam_input) = &args.sam_input {
        if !Path::new(sam_input).exists() {
            eprintln!(
                "ERROR [loris] Alignment file {} does not exist. Exiting.",
                sam_input
            );
            std::process::exit(1);
        }
    }

    let output_dir = Path::new(args.output.as_str());
    if output_dir.exists() {
        if !output_dir.is_dir() {
            eprintln!(
                "ERROR [loris] Output directory specified by `-o` exists and is not a directory."
            );
            std::process::exit(1);
        }
        std::fs::remove_dir_all(output_dir)
            .expect("Could not clear existing output directory. Exiting.");
    }
    std::fs::create_dir_all(output_dir).expect("Could not create output directory. Exiting.");

    // Initialize logger
    let log_spec = format!("{}", args.log_level_filter().to_string());
    let filespec = FileSpec::default().directory(output_dir).basename("loris");
    let _logger_handle = flexi_logger::Logger::try_with_str(log_spec)
        .expect("Something went wrong with logging")
        .log_to_file(filespec)
        .duplicate_to_stderr(Duplicate::Info)
        .format(my_own_format_colored)
        .format_for_files(my_own_format)
        .create_symlink("loris_latest.log")
        .start()
        .expect("Something went wrong with creating log file");

    let command_args: Vec<String> = std::env::args().collect();
    log::info!("COMMAND: {}", command_args.join(" "));
    log::info!("VERSION: {}", env!("CARGO_PKG_VERSION"));
    log::info!("SYSTEM NAME: {}", System::name().unwrap_or(format!("Unknown")));
    log::info!(
        "SYSTEM HOST NAME: {}",
        System::host_name().unwrap_or(format!("Unknown"))
    );

    // Initialize thread pool
    rayon::ThreadPoolBuilder::new()
        .num_threads(args.num_threads)
        .stack_size(16 * 1024 * 1024)
        .build_global()
        .unwrap();

    output_dir.to_path_buf()
}

fn my_own_format_colored(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &Record,
) -> Result<(), std::io::Error> {
    let mut paintlevel = record.level();
    if paintlevel == log::Level::Info {
        paintlevel = log::Level::Debug;
    }
    write!(
        w,
        "({}) {} [{}] {}",
        now.format(TS_DASHES_BLANK_COLONS_DOT_BLANK),
        style(paintlevel).paint(record.level().to_string()),
        record.module_path().unwrap_or(""),
        &record.args()
    )
}

fn my_own_format(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &Record,
) -> Result<(), std::io::Error> {
    write!(
        w,
        "({}) {} [{}] {}",
        now.format(TS_DASHES_BLANK_COLONS_DOT_BLANK),
        record.level(),
        record.module_path().unwrap_or(""),
        &record.args()
    )
}
