use anyhow::Result;
use reis_sync::cache::Partition;
use reis_sync::config::Config;

use super::open_store;

pub fn status(config: Config) -> Result<()> {
    let store = open_store(&config)?;

    println!("Store: {}", config.storage.sqlite_path.display());
    match store.last_sync()? {
        Some(at) => println!("Last sync: {}", at.with_timezone(&chrono::Local).format("%d.%m.%Y %H:%M:%S")),
        None => println!("Last sync: never"),
    }

    println!();
    for partition in Partition::ALL {
        let keys = store.keys(partition)?;
        println!("{partition:<14} {:>4} entries", keys.len());
    }
    Ok(())
}
