// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::fs;
use std::io;
use std::path::Path;

fn save_args() -> [Arg; 2] {
    [
        Arg::new("save_dir")
            .long("save-dir")
            .value_name("DIR")
            .help("Write process, warning, caution and info logs to this directory"),
        Arg::new("buffers")
            .long("buffers")
            .value_name("LOGS")
            .value_delimiter(',')
            .requires("save_dir")
            .help("Logs to save, e.g. \"warning,caution\" (default: all)"),
    ]
}

fn build_cli() -> Command {
    Command::new("buildterm")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Buildterm Contributors")
        .about("Run queued package builds and classify their output")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .help("Configuration file (default: ~/.config/buildterm/config.toml)"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(clap::ArgAction::SetTrue)
                .help("Do not echo build output; print only the summary"),
        )
        .subcommand(
            Command::new("run")
                .about("Queue jobs and run them one after another")
                .arg(
                    Arg::new("jobs")
                        .required(true)
                        .num_args(1..)
                        .help("Jobs as NAME=COMMAND"),
                )
                .arg(
                    Arg::new("no_pty")
                        .long("no-pty")
                        .action(clap::ArgAction::SetTrue)
                        .help("Use a plain pipe instead of a pseudo-terminal"),
                )
                .args(save_args()),
        )
        .subcommand(
            Command::new("replay")
                .about("Replay a saved build log through the classifier")
                .arg(Arg::new("file").required(true).help("Log file to load"))
                .args(save_args()),
        )
        .subcommand(Command::new("show-config").about("Print the effective configuration as TOML"))
}

/// Render the man page into `<crate>/man/buildterm.1`
fn write_man_page(out: &Path) -> io::Result<()> {
    let mut page = Vec::new();
    Man::new(build_cli()).render(&mut page)?;
    fs::create_dir_all(out)?;
    fs::write(out.join("buildterm.1"), page)
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src/cli.rs");

    // A missing man page never fails the build
    let out = Path::new(env!("CARGO_MANIFEST_DIR")).join("man");
    if let Err(e) = write_man_page(&out) {
        println!("cargo:warning=man page not generated in {}: {}", out.display(), e);
    }
}
