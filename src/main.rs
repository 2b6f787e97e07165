/*
 * This file is part of SensorHub.
 *
 * Copyright (C) 2025 SensorHub contributors
 *
 * SensorHub is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * SensorHub is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with SensorHub. If not, see <https://www.gnu.org/licenses/>.
 */

use std::path::PathBuf;

use anyhow::{bail, Context};
use sensorhub::core::constants::paths;
use sensorhub::{load_config, HubClient};

fn usage() {
    eprintln!("sensorhub {} - SensorHub command line client", env!("CARGO_PKG_VERSION"));
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    sensorhub [--socket PATH] COMMAND");
    eprintln!();
    eprintln!("COMMANDS:");
    eprintln!("    list                         List sensors as JSON");
    eprintln!("    enable HANDLE                Activate a sensor");
    eprintln!("    disable HANDLE               Deactivate a sensor");
    eprintln!("    batch HANDLE PERIOD_NS [TIMEOUT_NS]");
    eprintln!("    flush HANDLE");
    eprintln!("    stream [COUNT]               Print events as JSON lines");
    eprintln!("    check-config [PATH]          Validate a hub configuration");
}

fn arg<T: std::str::FromStr>(args: &[String], index: usize, name: &str) -> anyhow::Result<T> {
    let raw = args
        .get(index)
        .with_context(|| format!("missing {}", name))?;
    raw.parse()
        .map_err(|_| anyhow::anyhow!("invalid {}: {}", name, raw))
}

fn main() -> anyhow::Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    let mut socket = PathBuf::from(paths::SOCKET_PATH);
    if args.first().map(String::as_str) == Some("--socket") {
        if args.len() < 2 {
            bail!("--socket requires a path argument");
        }
        socket = PathBuf::from(args.remove(1));
        args.remove(0);
    }

    let Some(command) = args.first().cloned() else {
        usage();
        std::process::exit(1);
    };

    if command == "check-config" {
        let path = args
            .get(1)
            .map(PathBuf::from)
            .unwrap_or_else(paths::default_config_path);
        let config = load_config(&path).with_context(|| format!("checking {}", path.display()))?;
        println!(
            "{}: ok ({} devices, {} virtual sensors)",
            path.display(),
            config.devices.len(),
            config.virtual_sensors.len()
        );
        return Ok(());
    }

    if command == "-h" || command == "--help" {
        usage();
        return Ok(());
    }

    let mut client = HubClient::connect(&socket)
        .with_context(|| format!("is sensorhubd running on {}?", socket.display()))?;

    match command.as_str() {
        "list" => {
            let sensors = client.sensors()?;
            println!("{}", serde_json::to_string_pretty(&sensors)?);
        }
        "enable" | "disable" => {
            let handle = arg(&args, 1, "handle")?;
            client.activate(handle, command == "enable")?;
        }
        "batch" => {
            let handle = arg(&args, 1, "handle")?;
            let period_ns = arg(&args, 2, "period")?;
            let timeout_ns = if args.len() > 3 { arg(&args, 3, "timeout")? } else { 0 };
            client.batch(handle, period_ns, timeout_ns)?;
        }
        "flush" => {
            let handle = arg(&args, 1, "handle")?;
            client.flush(handle)?;
        }
        "stream" => {
            let count: Option<u64> = if args.len() > 1 { Some(arg(&args, 1, "count")?) } else { None };
            client.subscribe()?;
            let mut seen = 0u64;
            while count.map_or(true, |c| seen < c) {
                let event = client.next_event()?;
                println!("{}", serde_json::to_string(&event)?);
                seen += 1;
            }
        }
        other => {
            usage();
            bail!("unknown command: {}", other);
        }
    }

    Ok(())
}
