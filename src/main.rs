//! nfs4 CLI - Main entry point.

use anyhow::Context;
use nfs41_client::cli::{Cli, Commands};
use nfs41_client::nfs::NfsFtype4;
use nfs41_client::{observability, ClientConfig, Nfs4Client, Nfs4Error};
use std::io::Write;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();

    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(server) = cli.server {
        config.server.address = server;
    }
    if let Some(export) = cli.export {
        config.server.export = export;
    }
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }
    if cli.no_pnfs {
        config.pnfs.enabled = false;
    }

    observability::init(&config.observability)?;

    let server = config.server.address;
    let client = Nfs4Client::mount(config)
        .await
        .with_context(|| format!("mounting {}", server))?;

    let result = run(&client, cli.command).await;
    let unmounted = client.unmount().await;

    result?;
    unmounted.context("unmounting")?;
    Ok(())
}

async fn run(client: &Nfs4Client, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Ls { path, long } => {
            let mut entries = client.readdir(&path).await?;
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            for entry in &entries {
                if long {
                    let type_char = if entry.is_directory { 'd' } else { '-' };
                    println!(
                        "{}{:04o}  {:>8}  {:>8}  {:>10}  {}",
                        type_char,
                        entry.attrs.mode & 0o7777,
                        entry.attrs.owner,
                        entry.attrs.group,
                        entry.attrs.size,
                        entry.name
                    );
                } else {
                    println!("{}", entry.name);
                }
            }
        }

        Commands::Mkdir { path } => {
            client.mkdir(&path).await?;
            println!("Created directory: {}", path);
        }

        Commands::Stat { path } => {
            let attrs = client.getattr(&path).await?;
            let type_str = match attrs.file_type {
                Some(NfsFtype4::Dir) => "directory",
                Some(NfsFtype4::Reg) => "regular file",
                Some(NfsFtype4::Lnk) => "symbolic link",
                Some(_) => "special file",
                None => "unknown",
            };
            println!("  Path: {}", path);
            println!("  File ID: {}", attrs.fileid);
            println!("  Type: {}", type_str);
            println!("  Mode: {:04o}", attrs.mode & 0o7777);
            println!("  Size: {}", attrs.size);
            println!("  Used: {}", attrs.space_used);
            println!("  Links: {}", attrs.numlinks);
            println!("  Owner: {}", attrs.owner);
            println!("  Group: {}", attrs.group);
            println!("  Modified: {}.{:09}", attrs.time_modify.seconds, attrs.time_modify.nseconds);
        }

        Commands::Get { path, output } => {
            let data = client.read_file(&path).await?;
            match output {
                Some(local) => {
                    std::fs::write(&local, &data)
                        .with_context(|| format!("writing {}", local.display()))?;
                    println!("Read {} bytes into {}", data.len(), local.display());
                }
                None => std::io::stdout().write_all(&data)?,
            }
        }

        Commands::Put { local, path } => {
            let data = std::fs::read(&local).with_context(|| format!("reading {}", local.display()))?;
            let len = data.len();
            client.write_file(&path, data.into()).await?;
            println!("Wrote {} bytes to {}", len, path);
        }

        Commands::Rm { path } => {
            client.remove(&path).await?;
            println!("Removed: {}", path);
        }

        Commands::Locations { path } => match client.fs_locations(&path).await {
            Ok(locations) => {
                println!("  Root: /{}", locations.fs_root.join("/"));
                for location in &locations.locations {
                    println!("  {} -> /{}", location.server.join(","), location.rootpath.join("/"));
                }
            }
            Err(Nfs4Error::Protocol { status, .. }) => {
                anyhow::bail!("server did not report locations for {}: {}", path, status);
            }
            Err(e) => return Err(e.into()),
        },
    }

    Ok(())
}
