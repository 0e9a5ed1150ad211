// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! netconsd entry point: parse options, start the listener, serve.

use clap::Parser;

use netconsd::{run_server, Config, DEFAULT_PORT};

#[derive(Parser, Debug)]
#[command(name = "netconsd", about = "Remote console service")]
struct Args {
    /// Disable all terminal control sequences.
    #[arg(long = "no-ctl")]
    no_ctl: bool,

    /// Disable RGB colors.
    #[arg(long = "no-rgb")]
    no_rgb: bool,

    /// Listening port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Command to attach to each session (whitespace separated).
    #[arg(long)]
    task: Option<String>,
}

fn main() -> std::process::ExitCode {
    env_logger::init();
    let args = Args::parse();

    let config = Config {
        port: args.port,
        no_ctl: args.no_ctl,
        no_rgb: args.no_rgb,
        task_argv: args
            .task
            .map(|task| task.split_whitespace().map(String::from).collect()),
    };

    match run_server(config) {
        Ok(server) => {
            server.wait();
            std::process::ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("netconsd: unable to listen: {err}");
            std::process::ExitCode::FAILURE
        }
    }
}
