use {
    anyhow::{Context, Result},
    clap::Subcommand,
    gridctl_runtime::builder::{clean_cache_in, repos_cache_dir},
};

#[derive(Subcommand)]
pub enum CacheAction {
    /// Remove all cached source checkouts.
    Clean,
}

pub fn handle_cache(action: CacheAction) -> Result<()> {
    match action {
        CacheAction::Clean => clean(),
    }
}

fn clean() -> Result<()> {
    let dir = repos_cache_dir();
    let removed =
        clean_cache_in(&dir).with_context(|| format!("failed to remove {}", dir.display()))?;
    if removed {
        println!("Removed build cache at {}", dir.display());
    } else {
        println!("Build cache is already empty.");
    }
    Ok(())
}
