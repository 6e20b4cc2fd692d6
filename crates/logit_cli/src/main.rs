//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `logit_core` linkage with a deterministic banner.
//! - Probe or migrate a `.logdb` file from the command line.

use logit_core::{migrate, probe_version, MigrateOptions};
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => {
            println!("logit_core ping={}", logit_core::ping());
            println!("logit_core version={}", logit_core::core_version());
            println!(
                "logit_core schema_version={}",
                logit_core::CURRENT_SCHEMA_VERSION
            );
            ExitCode::SUCCESS
        }
        [command, path] if command == "probe" => match probe_version(path) {
            Ok(report) => {
                println!(
                    "db_version={} app_version={} status={:?}",
                    report.db_version, report.app_version, report.status
                );
                ExitCode::SUCCESS
            }
            Err(err) => fail(&err),
        },
        [command, path] if command == "migrate" => {
            match migrate(path, &MigrateOptions::default()) {
                Ok(report) => {
                    println!(
                        "from_version={} to_version={} applied={}",
                        report.from_version,
                        report.to_version,
                        report.applied.join(",")
                    );
                    if let Some(backup) = &report.backup_path {
                        println!("backup={}", backup.display());
                    }
                    ExitCode::SUCCESS
                }
                Err(err) => fail(&err),
            }
        }
        _ => {
            eprintln!("usage: logit_cli [probe|migrate <path.logdb>]");
            ExitCode::from(2)
        }
    }
}

fn fail(err: &logit_core::DbError) -> ExitCode {
    eprintln!("error: {err}");
    ExitCode::FAILURE
}
