use serde::Serialize;
use virtine_coproc::regs::{RegAccess, REGISTERS, WINDOW_SIZE};

#[derive(Debug, Serialize)]
struct LayoutEntry {
    name: &'static str,
    offset: u64,
    width: u64,
    access: Vec<&'static str>,
}

fn access_names(access: RegAccess) -> Vec<&'static str> {
    access
        .iter_names()
        .map(|(name, _)| match name {
            "READ" => "read",
            "WRITE" => "write",
            _ => "side-effect",
        })
        .collect()
}

pub fn print(json: bool) -> anyhow::Result<()> {
    if json {
        let entries: Vec<LayoutEntry> = REGISTERS
            .iter()
            .map(|info| LayoutEntry {
                name: info.name,
                offset: info.offset,
                width: info.width,
                access: access_names(info.access),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!("{:<14} {:>7} {:>6}  access", "register", "offset", "width");
    for info in REGISTERS.iter() {
        println!(
            "{:<14} {:>#7x} {:>6}  {}",
            info.name,
            info.offset,
            info.width,
            access_names(info.access).join(",")
        );
    }
    println!("window size: {WINDOW_SIZE:#x}");
    Ok(())
}
