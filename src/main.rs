use clap::{value_parser, Arg, ArgMatches, Command};
use log::info;
use sfs::{FileStore, FsError, Volume, VolumeConfig};

use std::error::Error;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

fn cli() -> Command {
    Command::new("sfs")
        .about("Simple file system on a disk image")
        .arg(Arg::new("image").required(true).help("Path of the disk image"))
        .arg(
            Arg::new("sectors")
                .long("sectors")
                .value_parser(value_parser!(usize))
                .default_value("10000")
                .help("Sectors in the image (mkfs only)"),
        )
        .arg(
            Arg::new("sector-size")
                .long("sector-size")
                .value_parser(value_parser!(usize))
                .default_value("512"),
        )
        .arg(
            Arg::new("inodes")
                .long("inodes")
                .value_parser(value_parser!(usize))
                .default_value("2000")
                .help("Inode records (mkfs only)"),
        )
        .arg(
            Arg::new("open-files")
                .long("open-files")
                .value_parser(value_parser!(usize))
                .default_value("2000"),
        )
        .subcommand_required(true)
        .subcommand(Command::new("mkfs").about("Create or wipe the image and format it"))
        .subcommand(Command::new("shell").about("Run commands read from stdin"))
        .subcommand(Command::new("fsck").about("Check bitmap and inode consistency"))
}

fn arg(matches: &ArgMatches, name: &str) -> usize {
    // every numeric arg has a default value
    matches.get_one::<usize>(name).copied().unwrap_or_default()
}

fn main() {
    env_logger::init();
    if let Err(e) = run(cli().get_matches()) {
        eprintln!("sfs: {}", e);
        std::process::exit(1);
    }
}

fn run(matches: ArgMatches) -> Result<(), Box<dyn Error>> {
    let image = matches
        .get_one::<String>("image")
        .ok_or("missing image path")?
        .clone();
    let sector_size = arg(&matches, "sector-size");
    let config = VolumeConfig::default()
        .with_inodes(arg(&matches, "inodes"))
        .with_open_files(arg(&matches, "open-files"));

    match matches.subcommand() {
        Some(("mkfs", _)) => {
            let dev = FileStore::create(&image, sector_size, arg(&matches, "sectors"))?;
            let vol = Volume::create(Arc::new(dev), config)?;
            info!("formatted {}", image);
            println!("{}: {} sectors free", image, vol.free_sectors());
        }
        Some(("fsck", _)) => {
            let vol = Volume::mount(Arc::new(FileStore::open(&image, sector_size)?), config)?;
            let report = vol.fsck()?;
            if report.is_clean() {
                println!("{}: clean", image);
            } else {
                println!("{}: {:#?}", image, report);
            }
        }
        Some(("shell", _)) => {
            let mut vol = Volume::mount(Arc::new(FileStore::open(&image, sector_size)?), config)?;
            shell(&mut vol)?;
        }
        _ => unreachable!("subcommand is required"),
    }
    Ok(())
}

fn shell(vol: &mut Volume) -> io::Result<()> {
    let stdin = io::stdin();
    let mut out = io::stdout();
    write!(out, "sfs:{}> ", vol.cwd())?;
    out.flush()?;
    for line in stdin.lock().lines() {
        let line = line?;
        let mut words = line.split_whitespace();
        if let Some(cmd) = words.next() {
            let args: Vec<&str> = words.collect();
            if cmd == "exit" || cmd == "quit" {
                break;
            }
            match execute(vol, cmd, &args) {
                Ok(reply) if reply.is_empty() => {}
                Ok(reply) => writeln!(out, "{}", reply)?,
                Err(e) => writeln!(out, "{}: {}", cmd, e)?,
            }
        }
        write!(out, "sfs:{}> ", vol.cwd())?;
        out.flush()?;
    }
    writeln!(out)?;
    Ok(())
}

fn number(word: Option<&&str>) -> Result<usize, Box<dyn Error>> {
    Ok(word.ok_or("missing number")?.parse()?)
}

fn name<'a>(word: Option<&&'a str>) -> Result<&'a str, Box<dyn Error>> {
    Ok(*word.ok_or("missing name")?)
}

fn execute(vol: &mut Volume, cmd: &str, args: &[&str]) -> Result<String, Box<dyn Error>> {
    let reply = match cmd {
        "mkfs" => {
            vol.mkfs()?;
            String::new()
        }
        "mkdir" => {
            vol.mkdir(name(args.first())?)?;
            String::new()
        }
        "cd" => {
            vol.cd(args.first().copied().unwrap_or("/"))?;
            String::new()
        }
        "ls" => vol.ls()?.join("\n"),
        "open" => vol.open(name(args.first())?)?.to_string(),
        "close" => {
            vol.close(number(args.first())?)?;
            String::new()
        }
        "read" => {
            let fd = number(args.first())?;
            let len = number(args.get(1))?;
            String::from_utf8_lossy(&vol.read(fd, len)?).into_owned()
        }
        "write" => {
            let fd = number(args.first())?;
            let text = args.get(1..).unwrap_or_default().join(" ");
            format!("{} bytes", vol.write(fd, text.as_bytes())?)
        }
        "seek" => vol.seek(number(args.first())?, number(args.get(1))?)?.to_string(),
        "rm" => {
            vol.rm(name(args.first())?)?;
            String::new()
        }
        "stat" => {
            let st = vol.stat(args.first().copied().unwrap_or("."))?;
            format!(
                "inode {} {:?} size {} sectors {}",
                st.ino, st.kind, st.size, st.nsector
            )
        }
        "df" => format!("{} sectors free", vol.free_sectors()),
        "fsck" => format!("{:?}", vol.fsck()?),
        _ => return Err(FsError::NotFound(cmd.to_string()).into()),
    };
    Ok(reply)
}
