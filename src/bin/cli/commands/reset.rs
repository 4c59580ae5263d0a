use anyhow::{bail, Result};

use crate::app::App;

pub fn run(app: &App, yes: bool) -> Result<()> {
    if !yes {
        bail!("This deletes every indexed chunk. Re-run with --yes to confirm.");
    }

    app.library.store().reset()?;
    println!("Node store reset");
    Ok(())
}
