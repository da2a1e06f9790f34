//! Shared-memory Interface Commands

use anyhow::{Context, Result};
use clap::Subcommand;
use netbed_common::{CommandExecutor, EngineConfig, ShellExecutor};
use netbed_engine::parse::{find_by_socket, parse_memif, MemifRecord};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum MemifCommands {
    /// Parse saved `show memif` output
    Parse {
        /// Only show the interface bound to this socket
        #[arg(long)]
        socket: Option<String>,

        /// File holding the output; standard input when omitted
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Query the local forwarder
    Probe {
        /// Only show the interface bound to this socket
        #[arg(long)]
        socket: Option<String>,
    },
}

#[derive(Serialize)]
pub struct MemifDisplay {
    pub interface: String,
    pub key: String,
    pub socket: String,
}

impl From<&MemifRecord> for MemifDisplay {
    fn from(record: &MemifRecord) -> Self {
        Self {
            interface: record.interface.clone(),
            key: format!("0x{:x}", record.key),
            socket: record.path.clone(),
        }
    }
}

impl TableDisplay for MemifDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Interface", "Key", "Socket"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.interface.clone(), self.key.clone(), self.socket.clone()]
    }
}

fn select(text: &str, socket: Option<&str>) -> Result<Vec<MemifDisplay>> {
    let records = parse_memif(text)?;
    let rows = match socket {
        Some(socket) => {
            let found = find_by_socket(&records, socket);
            if found.is_none() {
                warn!("No interface uses socket {}", socket);
            }
            found.into_iter().map(MemifDisplay::from).collect()
        }
        None => records.iter().map(MemifDisplay::from).collect(),
    };
    Ok(rows)
}

pub async fn execute(cmd: MemifCommands, config_path: &Path, format: OutputFormat) -> Result<()> {
    match cmd {
        MemifCommands::Parse { socket, input } => {
            let text = match input {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                None => {
                    let mut text = String::new();
                    std::io::stdin().read_to_string(&mut text)?;
                    text
                }
            };
            print_list(&select(&text, socket.as_deref())?, format)?;
        }

        MemifCommands::Probe { socket } => {
            let config = EngineConfig::load(config_path)?;
            let shell = ShellExecutor::new("localhost", config.shell.program.as_str());
            let command = format!("{} show memif", config.forwarder.ctl);
            debug!("Probing forwarder with '{}'", command);

            let output = shell.execute(&command, true).await?.check(&command)?;
            print_list(&select(output.stdout_str(), socket.as_deref())?, format)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTPUT: &str = "\
interface memif0/0 key 0x4 file /run/vpp/memif-a.sock
interface memif0/1 key 0x1f file /run/vpp/memif-b.sock
";

    #[test]
    fn test_select_all() {
        let rows = select(OUTPUT, None).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].key, "0x1f");
    }

    #[test]
    fn test_select_by_socket() {
        let rows = select(OUTPUT, Some("/run/vpp/memif-b.sock")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].interface, "memif0/1");
        assert!(select(OUTPUT, Some("/run/vpp/other.sock")).unwrap().is_empty());
    }
}
