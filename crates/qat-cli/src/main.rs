//! `qat-fw`: inspect, verify and bundle QAT firmware containers.
//!
//! ```text
//! USAGE:
//!   qat-fw inspect <file> [--name <obj>]      Describe a UOF, SUOF or MOF
//!   qat-fw verify <file> [--family <f>]       Check checksums and compatibility
//!   qat-fw bundle -o <out.mof> <name=path>... Pack objects into a MOF archive
//! ```

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use qat_chip::DeviceFamily;
use qat_firmware::writer::MofBuilder;
use qat_firmware::{ChunkInfo, Container, ContainerKind, DeviceTarget, MofArchive, ObjectKind, SuofContainer, UofObject};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "qat-fw", about = "QAT firmware container tool", version)]
struct Cli {
    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Describe a container: chunks, images and memory-init records.
    Inspect {
        /// Container file.
        file: PathBuf,
        /// Object name inside a MOF archive.
        #[arg(long)]
        name: Option<String>,
    },
    /// Verify every checksum, and compatibility when a family is given.
    Verify {
        /// Container file.
        file: PathBuf,
        /// Device family (dh895xcc, c6xx, c3xxx, c4xxx, 4xxx).
        #[arg(long)]
        family: Option<String>,
        /// Device revision.
        #[arg(long, default_value_t = 0)]
        revision: u16,
    },
    /// Pack UOF and SUOF objects into a MOF archive.
    Bundle {
        /// Output archive.
        #[arg(short, long)]
        output: PathBuf,
        /// Objects as `name=path`.
        #[arg(required = true)]
        objects: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Cmd::Inspect { file, name } => cmd_inspect(&file, name.as_deref()),
        Cmd::Verify {
            file,
            family,
            revision,
        } => cmd_verify(&file, family.as_deref(), revision),
        Cmd::Bundle { output, objects } => cmd_bundle(&output, &objects),
    }
}

fn read(path: &Path) -> Result<Bytes> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(Bytes::from(data))
}

fn kind_of(path: &Path, buf: &[u8]) -> Result<ContainerKind> {
    ContainerKind::detect(buf).ok_or_else(|| anyhow!("{}: not a UOF, SUOF or MOF container", path.display()))
}

// ── inspect ──────────────────────────────────────────────────────────────────

fn cmd_inspect(path: &Path, name: Option<&str>) -> Result<()> {
    let buf = read(path)?;
    if kind_of(path, &buf)? == ContainerKind::Mof && name.is_none() {
        let archive = MofArchive::parse(buf).with_context(|| format!("parsing {}", path.display()))?;
        println!("MOF archive, {} objects", archive.entries.len());
        print_chunks(&archive.chunks);
        for entry in &archive.entries {
            println!();
            println!("── {} ({}, {} bytes) ──", entry.name, entry.kind, entry.size);
            let bytes = archive.object_bytes(entry);
            match entry.kind {
                ObjectKind::Uof => print_uof(&UofObject::parse(bytes)?),
                ObjectKind::Suof => print_suof(&SuofContainer::parse(bytes)?),
            }
        }
        return Ok(());
    }

    match Container::parse(buf, name).with_context(|| format!("parsing {}", path.display()))? {
        Container::Uof(uof) => print_uof(&uof),
        Container::Suof(suof) => print_suof(&suof),
    }
    Ok(())
}

fn print_chunks(chunks: &[ChunkInfo]) {
    for c in chunks {
        match c.checksum {
            Some(crc) => println!("  chunk {:<8} @{:#08x} {:>8} bytes  crc {crc:#010x}", c.name(), c.offset, c.size),
            None => println!("  chunk {:<8} @{:#08x} {:>8} bytes", c.name(), c.offset, c.size),
        }
    }
}

fn print_uof(uof: &UofObject) {
    println!(
        "UOF {}.{}  dev types {:#x}  cpu rev {}..={}",
        uof.maj_ver, uof.min_ver, uof.ac_dev_type, uof.min_cpu_ver, uof.max_cpu_ver
    );
    print_chunks(&uof.file_chunks);
    print_chunks(&uof.obj_chunks);
    for image in &uof.images {
        println!(
            "  image {:<24} AEs {:#06x} ctx {:#04x} entry {:#x} page {:#x}+{} words, {} reg inits, mode {:#06x}",
            image.name,
            image.ae_assigned,
            image.ctx_assigned,
            image.entry_address,
            image.page.beg_addr_p,
            image.page.micro_words_num,
            image.init_regs.len(),
            image.ae_mode.0
        );
    }
    for mem in &uof.init_mem {
        println!(
            "  init {:<24} AE {} {:?} @{:#x} {} bytes, {} values",
            mem.symbol,
            mem.ae,
            mem.region,
            mem.addr,
            mem.num_in_bytes,
            mem.values.len()
        );
    }
}

fn print_suof(suof: &SuofContainer) {
    println!("SUOF fw type {}, {} images", suof.fw_type, suof.images.len());
    print_chunks(&suof.chunks);
    for image in &suof.images {
        println!(
            "  image {:<24} AEs {:#06x} dev type {:#x} rev {}..={} ctx mode {} ({} bytes)",
            image.name,
            image.ae_mask,
            image.dev_type,
            image.devmin_ver,
            image.devmax_ver,
            image.ctx_mode,
            image.len()
        );
    }
}

// ── verify ───────────────────────────────────────────────────────────────────

fn cmd_verify(path: &Path, family: Option<&str>, revision: u16) -> Result<()> {
    let target = family
        .map(|f| {
            f.parse::<DeviceFamily>()
                .map(|family| DeviceTarget::new(family, revision))
                .map_err(|e| anyhow!("{e}"))
        })
        .transpose()?;
    let buf = read(path)?;

    let objects: Vec<(String, Container)> = match kind_of(path, &buf)? {
        ContainerKind::Mof => {
            let archive = MofArchive::parse(buf)?;
            archive
                .entries
                .iter()
                .map(|e| {
                    let bytes = archive.object_bytes(e);
                    let object = match e.kind {
                        ObjectKind::Uof => UofObject::parse(bytes).map(Container::Uof),
                        ObjectKind::Suof => SuofContainer::parse(bytes).map(Container::Suof),
                    };
                    object
                        .map(|o| (e.name.clone(), o))
                        .with_context(|| format!("object {:?}", e.name))
                })
                .collect::<Result<_>>()?
        }
        _ => vec![(path.display().to_string(), Container::parse(buf, None)?)],
    };

    for (name, object) in &objects {
        if let Some(target) = &target {
            object
                .check_compat(target)
                .with_context(|| format!("{name} on {} rev {}", target.family, target.revision))?;
        }
        println!("{name}: OK");
    }
    Ok(())
}

// ── bundle ───────────────────────────────────────────────────────────────────

fn cmd_bundle(output: &Path, objects: &[String]) -> Result<()> {
    let mut builder = MofBuilder::new();
    for spec in objects {
        let Some((name, file)) = spec.split_once('=') else {
            bail!("expected name=path, got {spec:?}");
        };
        let path = Path::new(file);
        let buf = read(path)?;
        let kind = match kind_of(path, &buf)? {
            ContainerKind::Uof => {
                UofObject::parse(buf.clone()).with_context(|| format!("parsing {file}"))?;
                ObjectKind::Uof
            }
            ContainerKind::Suof => {
                SuofContainer::parse(buf.clone()).with_context(|| format!("parsing {file}"))?;
                ObjectKind::Suof
            }
            ContainerKind::Mof => bail!("{file}: archives cannot be nested"),
        };
        tracing::debug!("Adding {kind} object {name:?} from {file}");
        builder = builder.object(name, kind, buf.to_vec());
    }
    std::fs::write(output, builder.build()).with_context(|| format!("writing {}", output.display()))?;
    println!("{}: {} objects", output.display(), builder.len());
    Ok(())
}
