// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Command line companion for the power manager: inspect and edit the
//! persisted settings record.

use std::path::Path;

use getopts::Options;
use log::error;
use pwrmgr::logging;
use pwrmgr::settings::Settings;
use pwrmgr::settings::SETTINGS_PATH;

fn print_usage(message: &str, error: bool) {
    if error {
        eprintln!("{}", message)
    } else {
        println!("{}", message);
    }
}

fn settings_usage(error: bool, options: &Options) {
    let brief = r#"Usage: pwrmgr settings [options]
Show or edit the persisted power manager settings record. With no
options, prints the current contents. A missing or damaged record is
rebuilt with defaults.
"#;

    print_usage(&options.usage(brief), error);
}

fn pwrmgr_settings(args: &mut std::env::Args) -> std::result::Result<(), ()> {
    let mut opts = Options::new();
    opts.optopt("f", "file", "Path to the settings record", "path");
    opts.optflag("h", "help", "Print this help text");
    opts.optopt(
        "n",
        "network-standby",
        "Set the network standby mode",
        "on|off",
    );
    opts.optopt(
        "t",
        "timeout",
        "Set the deep sleep timeout, in seconds",
        "secs",
    );
    opts.optflag("v", "verbose", "Print more during the command");
    let args: Vec<String> = args.collect();
    let matches = match opts.parse(args) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Failed to parse arguments: {}", e);
            settings_usage(true, &opts);
            return Err(());
        }
    };

    if matches.opt_present("h") {
        settings_usage(false, &opts);
        return Ok(());
    }

    let verbosity = if matches.opt_present("v") { 9 } else { 1 };
    if logging::init_stderr(verbosity).is_err() {
        eprintln!("failed to initialize logging");
        return Err(());
    }

    let path_str = matches
        .opt_str("f")
        .unwrap_or_else(|| SETTINGS_PATH.to_string());
    let path = Path::new(&path_str);

    // Read the record verbatim; the restart and boot-to-standby rules only
    // apply inside the manager.
    let mut settings = match Settings::load(path, true, false) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load settings: {:#}", e);
            return Err(());
        }
    };

    let mut dirty = false;
    if let Some(secs) = matches.opt_str("t") {
        let secs: u32 = match secs.parse() {
            Ok(secs) => secs,
            Err(_) => {
                eprintln!("Invalid timeout: {}", secs);
                settings_usage(true, &opts);
                return Err(());
            }
        };
        settings.set_deep_sleep_timeout_secs(secs);
        dirty = true;
    }

    if let Some(mode) = matches.opt_str("n") {
        let enabled = match mode.as_str() {
            "on" => true,
            "off" => false,
            _ => {
                eprintln!("Invalid network standby mode: {}", mode);
                settings_usage(true, &opts);
                return Err(());
            }
        };
        settings.set_nw_standby_mode(enabled);
        dirty = true;
    }

    if dirty {
        if let Err(e) = settings.save(path) {
            error!("Failed to save settings: {:#}", e);
            return Err(());
        }
    }

    println!("{}", settings);
    Ok(())
}

fn app_usage(error: bool) {
    let usage_msg = r#"Usage: pwrmgr subcommand [options]
Power manager companion tool. Try pwrmgr <subcommand> --help for
details on specific subcommands.

Valid subcommands are:
    help -- Print this help text.
    settings -- Show or edit the persisted settings record.
"#;
    print_usage(usage_msg, error);
}

fn pwrmgr_main() -> std::result::Result<(), ()> {
    let mut args = std::env::args();
    if args.next().is_none() {
        eprintln!("Expected executable name");
        return Err(());
    }

    let subcommand = match args.next() {
        Some(subcommand) => subcommand,
        None => {
            eprintln!("Expected a subcommand");
            app_usage(true);
            return Err(());
        }
    };

    match subcommand.as_ref() {
        "--help" | "-h" | "help" => {
            app_usage(false);
            Ok(())
        }
        "settings" => pwrmgr_settings(&mut args),
        _ => {
            eprintln!("Unknown subcommand: {}", subcommand);
            app_usage(true);
            Err(())
        }
    }
}

fn main() {
    std::process::exit(if pwrmgr_main().is_ok() { 0 } else { 1 });
}
