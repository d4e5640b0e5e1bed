use std::{env::args, path::PathBuf};

use anyhow::{Context, anyhow};
use mds::Config;

mod commands;
mod logging;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const USAGE: &str = "usage: mds vars FILE | mds render FILE | mds run FILE ENTRY [name=value ...]";

fn next_arg(argv: &mut impl Iterator<Item = String>) -> anyhow::Result<String> {
    argv.next().context(USAGE)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init()?;

    let mut argv = args().skip(1);
    let task = argv.next();
    match task.as_deref() {
        Some("vars") => commands::vars(&PathBuf::from(next_arg(&mut argv)?)),
        Some("render") => commands::render(&PathBuf::from(next_arg(&mut argv)?)),
        Some("run") => {
            let path = PathBuf::from(next_arg(&mut argv)?);
            let entry = next_arg(&mut argv)?;
            let inputs = argv
                .map(|arg| commands::parse_input(&arg))
                .collect::<anyhow::Result<Vec<_>>>()?;
            commands::run(&path, &entry, inputs, &Config::from_env()).await
        }
        Some("help" | "-h" | "--help") => {
            println!("{USAGE}");
            Ok(())
        }
        _ => Err(anyhow!("unknown task\n{USAGE}")),
    }
}
